use axum::{
    Json,
    extract::rejection::{BytesRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use snafu::Snafu;
use std::{num::ParseIntError, path::PathBuf};

pub type IntakeResult<T> = Result<T, IntakeError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum IntakeError {
    #[snafu(display("Error opening database"))]
    OpenDatabase { source: sqlx::Error },
    #[snafu(display("Error getting db connection"))]
    GetDatabaseConnection { source: sqlx::Error },
    #[snafu(display("Error making SQL query"))]
    MakeQuery { source: sqlx::Error },
    #[snafu(display("Error commiting SQL transaction"))]
    CommitTransaction { source: sqlx::Error },
    #[snafu(display("Error migrating DB schema"))]
    Migrate { source: sqlx::migrate::MigrateError },
    #[snafu(display("Unable to retrieve env var `{}`", name))]
    BadEnvVar {
        source: dotenvy::Error,
        name: &'static str,
    },
    #[snafu(display("Unable to parse env var `{}` as a number", name))]
    ParseNumber {
        source: ParseIntError,
        name: &'static str,
    },
    #[snafu(display("Unable to parse env var `{}` as a boolean: {:?}", name, found))]
    ParseFlag { name: &'static str, found: String },
    #[snafu(display("Server misconfigured: API token file missing or empty"))]
    MissingApiToken { path: Option<PathBuf> },
    #[snafu(display("Forbidden: invalid token"))]
    InvalidToken,
    #[snafu(display("Invalid query string: {}", source.body_text()))]
    BadQuery { source: QueryRejection },
    #[snafu(display("Unable to read request body: {}", source.body_text()))]
    ReadBody { source: BytesRejection },
    #[snafu(display("Request body is not valid JSON: {}", source))]
    MalformedBody { source: serde_json::Error },
    #[snafu(display("Request body must be a JSON object"))]
    BodyNotAnObject,
    #[snafu(display("Error formatting timestamp"))]
    FormatTime { source: time::error::Format },
    #[snafu(display("Error with hashing passwords"))]
    Bcrypt { source: bcrypt::BcryptError },
    #[snafu(display("Error joining blocking task"))]
    JoinTask { source: tokio::task::JoinError },
    #[snafu(display("Unable to build an email address for {:?}", user_id))]
    Email {
        source: email_address::Error,
        user_id: String,
    },
}

impl IntakeError {
    pub fn status_code(&self) -> StatusCode {
        const ISE: StatusCode = StatusCode::INTERNAL_SERVER_ERROR; //internal server error
        const NA: StatusCode = StatusCode::FORBIDDEN; //not allowed
        const BI: StatusCode = StatusCode::BAD_REQUEST; //bad input

        match self {
            Self::OpenDatabase { .. } | Self::GetDatabaseConnection { .. } => ISE,
            Self::MakeQuery { .. } | Self::CommitTransaction { .. } | Self::Migrate { .. } => ISE,
            Self::BadEnvVar { .. } | Self::ParseNumber { .. } | Self::ParseFlag { .. } => ISE,
            Self::MissingApiToken { .. } => ISE,
            Self::InvalidToken => NA,
            Self::BadQuery { source } => source.status(),
            Self::ReadBody { source } => source.status(),
            Self::MalformedBody { .. } | Self::BodyNotAnObject => BI,
            Self::FormatTime { .. } | Self::Bcrypt { .. } | Self::JoinTask { .. } => ISE,
            Self::Email { .. } => BI,
        }
    }
}

impl IntoResponse for IntakeError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();

        if status_code.is_server_error() {
            error!(?self, "Error!");
        } else {
            warn!(%self, "Rejected request");
        }

        (
            status_code,
            Json(json!({
                "status": "error",
                "message": self.to_string(),
            })),
        )
            .into_response()
    }
}
