use crate::{
    auth::SuppliedToken,
    error::{BodyNotAnObjectSnafu, IntakeResult, MalformedBodySnafu, ReadBodySnafu},
    import::{ImportOutcome, ImportRoute, run_import},
    json_conveniences::StatusOk,
    state::IntakeState,
};
use axum::{
    Json,
    body::Bytes,
    extract::{State, rejection::BytesRejection},
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value, json};
use snafu::ResultExt;
use time::OffsetDateTime;

pub async fn post_api_student_import(
    State(state): State<IntakeState>,
    token: SuppliedToken,
    body: Result<Bytes, BytesRejection>,
) -> IntakeResult<Response> {
    let body = body.context(ReadBodySnafu)?;
    import_students(&state, ImportRoute::Api, token, &body).await
}

pub async fn post_legacy_student_import(
    State(state): State<IntakeState>,
    token: SuppliedToken,
    body: Result<Bytes, BytesRejection>,
) -> IntakeResult<Response> {
    let body = body.context(ReadBodySnafu)?;
    import_students(&state, ImportRoute::Legacy, token, &body).await
}

async fn import_students(
    state: &IntakeState,
    route: ImportRoute,
    token: SuppliedToken,
    raw_body: &[u8],
) -> IntakeResult<Response> {
    let body = parse_body(raw_body)?;
    let token = token.or_from_body(&body);
    state.config().api_config().token_source.require(&token).await?;

    Ok(
        match run_import(state, route, &body, OffsetDateTime::now_utc()).await? {
            ImportOutcome::NoStudents => Json(json!({
                "status": "error",
                "message": "No students provided",
            }))
            .into_response(),
            ImportOutcome::Imported(summary) => StatusOk::of(summary).into_response(),
        },
    )
}

/// An empty body counts as `{}`.
fn parse_body(raw: &[u8]) -> IntakeResult<Map<String, Value>> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }

    match serde_json::from_slice(raw).context(MalformedBodySnafu)? {
        Value::Object(map) => Ok(map),
        _ => BodyNotAnObjectSnafu.fail(),
    }
}
