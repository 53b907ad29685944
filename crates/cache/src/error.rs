//! Cache error types.

use thiserror::Error;

/// Cache operation errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A `put` for the same key is already open.
    #[error("a put for this key is already in progress")]
    PutPending,

    #[error("storage error: {0}")]
    Storage(#[from] stacks_storage::StorageError),
}

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;
