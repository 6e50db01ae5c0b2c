use axum::{http::StatusCode, Json};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database request to {target} failed: {source}")]
    Transport {
        target: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("database returned {status} for {target}: {message}")]
    Remote {
        status: u16,
        target: String,
        message: String,
    },
    #[error("failed to decode database response for {target}: {source}")]
    Decode {
        target: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("text model request failed: {0}")]
    Transport(reqwest::Error),
    #[error("text model returned {status}: {message}")]
    Remote { status: u16, message: String },
    #[error("text model returned no text")]
    EmptyResponse,
    #[error("failed to decode text model response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The request URL is dropped so endpoint details never reach the logs.
impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.without_url())
    }
}

pub type ApiError = (StatusCode, Json<Value>);

pub fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(json!({
            "error": {
                "code": code,
                "message": message.into()
            }
        })),
    )
}

pub fn not_configured() -> ApiError {
    error_response(
        StatusCode::SERVICE_UNAVAILABLE,
        "NOT_CONFIGURED",
        "Supabase not configured. Set SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY.",
    )
}

pub fn internal(message: impl Into<String>) -> ApiError {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
}
