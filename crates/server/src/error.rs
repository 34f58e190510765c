//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::sync::Arc;
use warden_restore::{ErrorKind, RestoreError};

/// Non-standard status for a request whose restore was aborted, as used by
/// nginx for client-closed requests.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Restore(Arc<RestoreError>),

    #[error("core error: {0}")]
    Core(#[from] warden_core::Error),
}

impl From<RestoreError> for ApiError {
    fn from(err: RestoreError) -> Self {
        Self::Restore(Arc::new(err))
    }
}

impl From<Arc<RestoreError>> for ApiError {
    fn from(err: Arc<RestoreError>) -> Self {
        Self::Restore(err)
    }
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Internal(_) => "internal_error",
            Self::Core(_) => "invalid_argument",
            Self::Restore(err) => match err.kind() {
                ErrorKind::InvalidArgument => "invalid_argument",
                ErrorKind::FailedPrecondition => "failed_precondition",
                ErrorKind::Canceled => "canceled",
                ErrorKind::DeadlineExceeded => "deadline_exceeded",
                ErrorKind::NotFound => "not_found",
                ErrorKind::Internal => "internal_error",
            },
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) | Self::Core(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Restore(err) => match err.kind() {
                ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
                ErrorKind::FailedPrecondition => StatusCode::CONFLICT,
                ErrorKind::Canceled => StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                ErrorKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
