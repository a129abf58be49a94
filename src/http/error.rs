//! Rendering of [`AppError`] as HTTP responses.
//!
//! Every failure becomes `{"error": <code>, "message": <text>}` with a status
//! derived from the error kind. Messages are the relay's own text; raw OS
//! errors never reach the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::AppError;

/// JSON error body returned for every failed request.
#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    /// Stable error code, see [`AppError::code`].
    pub error: &'static str,
    /// Human-readable detail.
    pub message: &'a str,
}

/// HTTP status for an error kind.
#[must_use]
pub fn status_for(err: &AppError) -> StatusCode {
    match err {
        AppError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
        AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        AppError::DuplicateId(_) => StatusCode::CONFLICT,
        AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        AppError::ProcessExited(_)
        | AppError::Spawn(_)
        | AppError::Config(_)
        | AppError::Io(_)
        | AppError::MalformedOutput(_)
        | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code(),
            message: self.message(),
        };
        (status_for(&self), Json(body)).into_response()
    }
}
