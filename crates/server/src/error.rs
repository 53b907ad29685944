//! API error types.

use crate::content::{FindError, PopulateError};
use crate::tape::TapeError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// API error response body.
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

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("item store use is disabled")]
    TapeDisabled,

    #[error("timed out waiting for content")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] stacks_storage::StorageError),

    #[error("cache error: {0}")]
    Cache(#[from] stacks_cache::CacheError),

    #[error("fragment error: {0}")]
    Fragment(#[from] stacks_fragment::FragmentError),
}

impl From<TapeError> for ApiError {
    fn from(e: TapeError) -> Self {
        match e {
            TapeError::Disabled => Self::TapeDisabled,
            TapeError::NoBlob(blob) => Self::NotFound(format!("no blob {blob}")),
            TapeError::Storage(e) => Self::Storage(e),
        }
    }
}

impl From<FindError> for ApiError {
    fn from(e: FindError) -> Self {
        match e {
            FindError::Cache(e) => e.into(),
            FindError::Tape(e) => e.into(),
            // a recent failure recorded in the ledger fails this
            // request the same way the original attempt failed
            FindError::Recent(PopulateError::NoBlob(blob)) => {
                Self::NotFound(format!("no blob {blob}"))
            }
            FindError::Recent(e) => Self::Internal(e.to_string()),
        }
    }
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Conflict(_) => "conflict",
            Self::ChecksumMismatch { .. } => "checksum_mismatch",
            Self::TapeDisabled => "tape_disabled",
            Self::Timeout => "timeout",
            Self::Internal(_) => "internal_error",
            Self::Storage(_) => "storage_error",
            Self::Cache(_) => "cache_error",
            Self::Fragment(_) => "fragment_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ChecksumMismatch { .. } => StatusCode::PRECONDITION_FAILED,
            Self::TapeDisabled => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(e) => match e {
                stacks_storage::StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Cache(e) => match e {
                stacks_cache::CacheError::PutPending => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Fragment(e) => match e {
                stacks_fragment::FragmentError::AlreadyExists(_) => StatusCode::CONFLICT,
                stacks_fragment::FragmentError::NotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
