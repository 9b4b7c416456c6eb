use crate::{
    auth::SuppliedToken,
    data::{Page, PageQuery},
    error::{BadQuerySnafu, IntakeResult},
    json_conveniences::StatusOk,
    state::IntakeState,
};
use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
};
use serde::Serialize;
use serde_json::Value;
use snafu::ResultExt;

#[derive(Serialize, Debug)]
pub struct Listing {
    table: &'static str,
    limit: i64,
    offset: i64,
    count: usize,
    rows: Vec<Value>,
}

impl Listing {
    fn new(table: &'static str, page: Page, rows: Vec<Value>) -> Json<StatusOk<Self>> {
        StatusOk::of(Self {
            table,
            limit: page.limit,
            offset: page.offset,
            count: rows.len(),
            rows,
        })
    }
}

pub async fn get_students(
    State(state): State<IntakeState>,
    token: SuppliedToken,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> IntakeResult<Json<StatusOk<Listing>>> {
    state.config().api_config().token_source.require(&token).await?;

    let Query(query) = query.context(BadQuerySnafu)?;
    let page = Page::from(&query);
    let rows = state.store().student_rows(page).await?;
    Ok(Listing::new("student_info", page, rows))
}

pub async fn get_users(
    State(state): State<IntakeState>,
    token: SuppliedToken,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> IntakeResult<Json<StatusOk<Listing>>> {
    state.config().api_config().token_source.require(&token).await?;

    let Query(query) = query.context(BadQuerySnafu)?;
    let page = Page::from(&query);
    let rows = state.store().user_rows(page).await?;
    Ok(Listing::new("auth_user", page, rows))
}
