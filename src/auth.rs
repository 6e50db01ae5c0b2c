use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};

use crate::error::{error_response, ApiError};

/// Checks the bearer token when a key is configured; open otherwise.
pub fn verify_bearer(headers: &HeaderMap, expected_key: Option<&str>) -> Result<(), ApiError> {
    let Some(expected_key) = expected_key else {
        return Ok(());
    };

    let token = extract_bearer_token(headers)?;
    if token.trim() != expected_key {
        return Err(unauthorized("Invalid API key"));
    }

    Ok(())
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, ApiError> {
    let Some(raw_header) = headers.get(AUTHORIZATION) else {
        return Err(unauthorized("Missing Authorization header"));
    };

    let Ok(value) = raw_header.to_str() else {
        return Err(unauthorized("Invalid Authorization header"));
    };

    let Some(token) = value.strip_prefix("Bearer ") else {
        return Err(unauthorized("Authorization must use Bearer token"));
    };

    Ok(token.to_string())
}

fn unauthorized(message: &str) -> ApiError {
    error_response(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
}
