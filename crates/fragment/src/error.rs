//! Fragment store error types.

use thiserror::Error;

/// Fragment store operation errors.
#[derive(Debug, Error)]
pub enum FragmentError {
    #[error("staged file already exists: {0}")]
    AlreadyExists(String),

    #[error("no staged file: {0}")]
    NotFound(String),

    #[error("metadata encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] stacks_storage::StorageError),
}

/// Result type for fragment store operations.
pub type FragmentResult<T> = std::result::Result<T, FragmentError>;
