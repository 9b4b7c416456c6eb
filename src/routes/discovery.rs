use crate::{
    auth::SuppliedToken, error::IntakeResult, json_conveniences::StatusOk, state::IntakeState,
};
use axum::{Json, extract::State};
use serde::Serialize;

#[derive(Serialize, Debug)]
pub struct Endpoints {
    student_import: &'static str,
    student_import_legacy: &'static str,
    students: &'static str,
    users: &'static str,
}

#[derive(Serialize, Debug)]
pub struct Discovery {
    endpoints: Endpoints,
    auth: &'static str,
}

pub async fn get_api_discovery(
    State(state): State<IntakeState>,
    token: SuppliedToken,
) -> IntakeResult<Json<StatusOk<Discovery>>> {
    state.config().api_config().token_source.require(&token).await?;

    Ok(StatusOk::of(Discovery {
        endpoints: Endpoints {
            student_import: "POST /api_student_import.json",
            student_import_legacy: "POST /import/student_import_api",
            students: "GET /api_students.json?limit=500&offset=0",
            users: "GET /api_users.json?limit=500&offset=0",
        },
        auth: "X-Api-Token header OR token query param OR token in JSON body",
    }))
}
