//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use fswap_models::{IntakeError, ProcessOutcome};
use fswap_worker::ResourceError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Server busy: {0}")]
    Busy(#[from] ResourceError),

    #[error("Processing failed: {}", .0.error.as_deref().unwrap_or("unknown"))]
    Processing(ProcessOutcome),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Processing(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<IntakeError> for ApiError {
    fn from(e: IntakeError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

/// Error body matching the processing response shape.
#[derive(Serialize)]
struct ErrorResponse {
    status: &'static str,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    traceback: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // A failed job already carries its full outcome; pass it through.
        if let ApiError::Processing(outcome) = self {
            return (status, Json(outcome)).into_response();
        }

        // Don't expose internal error details in production
        let error = match &self {
            ApiError::Internal(_) => {
                if std::env::var("ENVIRONMENT").unwrap_or_default() == "production" {
                    "An internal error occurred".to_string()
                } else {
                    self.to_string()
                }
            }
            _ => self.to_string(),
        };

        let body = ErrorResponse {
            status: "error",
            error,
            traceback: None,
        };
        (status, Json(body)).into_response()
    }
}
