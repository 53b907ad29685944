//! The bundle store ("tape") interface.
//!
//! Bundle resolution lives outside this daemon; the read path only needs
//! to ask for a blob's size and open it as a positional stream. Tape is
//! slow, so callers are expected to route results through the cache.

use async_trait::async_trait;
use stacks_core::BlobRef;
use stacks_storage::{BlobRead, BlobStore};
use std::sync::Arc;
use thiserror::Error;

/// Bundle store errors.
#[derive(Debug, Error)]
pub enum TapeError {
    /// The bundle store is administratively offline.
    #[error("item store use is disabled")]
    Disabled,

    #[error("no blob {0}")]
    NoBlob(BlobRef),

    #[error("storage error: {0}")]
    Storage(#[from] stacks_storage::StorageError),
}

/// Source of blob content on slow storage.
#[async_trait]
pub trait BundleSource: Send + Sync + 'static {
    /// The declared size of a blob, without fetching it.
    async fn stat(&self, blob: &BlobRef) -> Result<u64, TapeError>;

    /// Open a blob for reading. Returns a positional reader and the
    /// blob length.
    async fn open_blob(&self, blob: &BlobRef) -> Result<(Box<dyn BlobRead>, u64), TapeError>;
}

/// A bundle store that is switched off. Every call answers
/// [`TapeError::Disabled`]; cache hits keep being served above it.
pub struct DisabledSource;

#[async_trait]
impl BundleSource for DisabledSource {
    async fn stat(&self, _blob: &BlobRef) -> Result<u64, TapeError> {
        Err(TapeError::Disabled)
    }

    async fn open_blob(&self, _blob: &BlobRef) -> Result<(Box<dyn BlobRead>, u64), TapeError> {
        Err(TapeError::Disabled)
    }
}

/// Bundle source backed by a plain blob store, one stream per blob
/// under the blob's cache key. Stands in for the real bundle reader on
/// deployments whose tape mount presents extracted blobs, and in tests.
pub struct StoreSource {
    store: Arc<dyn BlobStore>,
}

impl StoreSource {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BundleSource for StoreSource {
    async fn stat(&self, blob: &BlobRef) -> Result<u64, TapeError> {
        match self.store.open(&blob.cache_key()).await {
            Ok((_, size)) => Ok(size),
            Err(e) if e.is_not_found() => Err(TapeError::NoBlob(blob.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn open_blob(&self, blob: &BlobRef) -> Result<(Box<dyn BlobRead>, u64), TapeError> {
        match self.store.open(&blob.cache_key()).await {
            Ok(found) => Ok(found),
            Err(e) if e.is_not_found() => Err(TapeError::NoBlob(blob.clone())),
            Err(e) => Err(e.into()),
        }
    }
}
