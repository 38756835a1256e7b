//! API error types.

use crate::coordinator::RefreshError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

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

    #[error("metadata error: {0}")]
    Metadata(#[from] easel_metadata::MetadataError),

    #[error("core error: {0}")]
    Core(#[from] easel_core::Error),

    #[error("refresh error: {0}")]
    Refresh(#[from] RefreshError),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Internal(_) => "internal_error",
            Self::Metadata(_) => "metadata_error",
            Self::Core(_) => "invalid_request",
            Self::Refresh(e) => match e {
                RefreshError::Core(_) => "invalid_request",
                RefreshError::NotTracked(_) | RefreshError::OperationNotFound(_) => "not_found",
                RefreshError::FollowerTimeout { .. } => "refresh_timeout",
                RefreshError::Metadata(_) => "metadata_error",
            },
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Metadata(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Core(_) => StatusCode::BAD_REQUEST,
            Self::Refresh(e) => match e {
                RefreshError::Core(_) => StatusCode::BAD_REQUEST,
                RefreshError::NotTracked(_) | RefreshError::OperationNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                RefreshError::FollowerTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                RefreshError::Metadata(_) => StatusCode::INTERNAL_SERVER_ERROR,
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
