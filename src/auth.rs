use crate::error::{IntakeResult, InvalidTokenSnafu, MissingApiTokenSnafu};
use axum::{
    extract::{FromRequestParts, Query},
    http::{HeaderMap, request::Parts},
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value};
use snafu::ensure;
use std::{convert::Infallible, path::PathBuf};
use subtle::ConstantTimeEq;

pub const TOKEN_HEADER: &str = "x-api-token";

/// Where the expected shared secret comes from.
///
/// The file variant is re-read on every check, so the token can be rotated
/// without restarting the server.
#[derive(Debug)]
pub enum TokenSource {
    File(PathBuf),
    Fixed(SecretString),
}

impl TokenSource {
    pub async fn load(&self) -> IntakeResult<SecretString> {
        let raw = match self {
            Self::File(path) => match tokio::fs::read_to_string(path).await {
                Ok(contents) => contents,
                Err(e) => {
                    warn!(?e, ?path, "Unable to read API token file");
                    return MissingApiTokenSnafu {
                        path: Some(path.clone()),
                    }
                    .fail();
                }
            },
            Self::Fixed(token) => token.expose_secret().to_string(),
        };

        let trimmed = raw.trim();
        ensure!(
            !trimmed.is_empty(),
            MissingApiTokenSnafu {
                path: self.path().cloned()
            }
        );

        Ok(SecretString::from(trimmed))
    }

    const fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::File(path) => Some(path),
            Self::Fixed(_) => None,
        }
    }

    /// Loads the expected token and compares it with what the caller sent.
    ///
    /// A missing or empty expected token is a server error even when the
    /// caller sent nothing.
    pub async fn require(&self, supplied: &SuppliedToken) -> IntakeResult<()> {
        let expected = self.load().await?;
        let supplied = supplied.0.as_deref().unwrap_or_default();

        ensure!(
            !supplied.is_empty()
                && bool::from(
                    supplied
                        .as_bytes()
                        .ct_eq(expected.expose_secret().as_bytes())
                ),
            InvalidTokenSnafu
        );
        Ok(())
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// The token a caller presented, taken from the `X-Api-Token` header or the
/// `token` query parameter. Bodies are consulted separately via
/// [`SuppliedToken::or_from_body`].
#[derive(Debug, Clone, Default)]
pub struct SuppliedToken(pub Option<String>);

impl SuppliedToken {
    pub fn from_parts(headers: &HeaderMap, query_token: Option<String>) -> Self {
        let from_header = headers
            .get(TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        Self(from_header.or_else(|| query_token.filter(|token| !token.is_empty())))
    }

    #[must_use]
    pub fn or_from_body(self, body: &Map<String, Value>) -> Self {
        if self.0.is_some() {
            return self;
        }

        Self(
            body.get("token")
                .and_then(Value::as_str)
                .filter(|token| !token.is_empty())
                .map(str::to_string),
        )
    }
}

impl<S: Send + Sync> FromRequestParts<S> for SuppliedToken {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let query_token = Query::<TokenQuery>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(TokenQuery { token })| token);

        Ok(Self::from_parts(&parts.headers, query_token))
    }
}
