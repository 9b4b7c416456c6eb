use serde::Deserialize;

pub mod queue;
pub mod store;

pub const DEFAULT_LIMIT: i64 = 500;
pub const MAX_LIMIT: i64 = 5000;

#[derive(Deserialize, Debug, Default)]
pub struct PageQuery {
    pub limit: Option<String>,
    pub offset: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub fn clamp(limit: Option<&str>, offset: Option<&str>) -> Self {
        Self {
            limit: int_or_default(limit, DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
            offset: int_or_default(offset, 0).max(0),
        }
    }
}

impl From<&PageQuery> for Page {
    fn from(query: &PageQuery) -> Self {
        Self::clamp(query.limit.as_deref(), query.offset.as_deref())
    }
}

pub fn int_or_default(value: Option<&str>, default: i64) -> i64 {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
