use crate::{
    routes::{
        discovery::get_api_discovery,
        listings::{get_students, get_users},
        student_import::{post_api_student_import, post_legacy_student_import},
    },
    state::IntakeState,
};
use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{StatusCode, Uri},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

pub mod discovery;
pub mod listings;
pub mod student_import;

/// Large enough for a few thousand students in one batch.
const BODY_LIMIT: usize = 16 * 1024 * 1024;

pub fn router(state: IntakeState) -> Router {
    Router::new()
        .route("/api.json", get(get_api_discovery))
        .route("/api_student_import.json", post(post_api_student_import))
        .route("/import/student_import_api", post(post_legacy_student_import))
        .route("/api_students.json", get(get_students))
        .route("/api_users.json", get(get_users))
        .fallback(handler404)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn handler404(path: Uri) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "status": "error",
            "message": format!("Invalid path: {path}"),
        })),
    )
}
