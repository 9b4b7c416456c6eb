use axum::Json;
use serde::Serialize;
use serde_json::{Map, Value};

/// Wraps a payload as `{"status": "ok", ...payload}`.
#[derive(Serialize, Debug)]
pub struct StatusOk<V> {
    status: &'static str,
    #[serde(flatten)]
    value: V,
}

impl<V: Serialize> StatusOk<V> {
    pub fn of(value: V) -> Json<Self> {
        Json(Self {
            status: "ok",
            value,
        })
    }
}

/// Loose truthiness for flags and optional fields sent by spreadsheet macros:
/// `null`, `false`, `0`, `""`, `[]` and `{}` are all falsy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

pub fn flag(map: &Map<String, Value>, key: &str, default: bool) -> bool {
    map.get(key).map_or(default, truthy)
}

/// Renders a JSON value the way it should land in a text column.
pub fn text_of(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(items) => items.iter().map(text_of).collect::<Vec<_>>().join(","),
        Value::Object(_) => value.to_string(),
    }
}

/// The text of the first key whose value is truthy.
pub fn first_truthy_text(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| map.get(*key))
        .find(|value| truthy(value))
        .map(text_of)
}
