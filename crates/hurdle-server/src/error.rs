//! API error types with HTTP status code mapping.
//!
//! [`ApiError`] is the error type of every endpoint. It renders as
//! `{ "success": false, "error": { "code", "message" } }`.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use hurdle_trace::TraceError;

/// Structured error detail in API responses.
#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorDetail {
    /// Machine-readable error code (`BAD_REQUEST`, `INTERNAL_ERROR`).
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Rejected before any code ran (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A trace worker failed unexpectedly (500).
    #[error("internal error: {0}")]
    InternalError(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> ApiErrorDetail {
        let (code, message) = match self {
            ApiError::BadRequest(msg) => ("BAD_REQUEST", msg),
            ApiError::InternalError(msg) => ("INTERNAL_ERROR", msg),
        };
        ApiErrorDetail {
            code: code.to_string(),
            message: message.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::InternalError(msg) = &self {
            tracing::error!(%msg, "request failed");
        }
        let body = serde_json::json!({
            "success": false,
            "error": self.detail(),
        });
        (self.status(), axum::Json(body)).into_response()
    }
}

impl From<TraceError> for ApiError {
    fn from(err: TraceError) -> Self {
        match &err {
            TraceError::UnsupportedLanguage(_) => ApiError::BadRequest(err.to_string()),
            TraceError::Worker(_) => ApiError::InternalError(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_errors_map_to_status_codes() {
        let unsupported = ApiError::from(TraceError::UnsupportedLanguage("rust".into()));
        assert_eq!(unsupported.status(), StatusCode::BAD_REQUEST);
        assert_eq!(unsupported.detail().message, "unsupported language 'rust'");

        let worker = ApiError::from(TraceError::Worker("died".into()));
        assert_eq!(worker.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(worker.detail().code, "INTERNAL_ERROR");
    }
}
