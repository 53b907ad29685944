//! Backing byte-stream store abstraction for Stacks.
//!
//! This crate provides:
//! - Named byte-stream storage with atomic, single-use writers
//! - Positional (offset-addressed) readers
//! - Backends: local filesystem and in-memory
//!
//! The cache, fragment store, and server all talk to storage through the
//! [`BlobStore`] trait, so slow network-mapped mounts, local scratch
//! disks, and test memories are interchangeable.

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, memory::MemoryBackend};
pub use error::{StorageError, StorageResult};
pub use traits::{BlobRead, BlobStore, BlobWriter, COPY_CHUNK_SIZE};

use stacks_core::config::StorageConfig;
use std::sync::Arc;

/// Create a blob store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn BlobStore>> {
    match config {
        StorageConfig::Filesystem { root } => {
            let backend = FilesystemBackend::new(root).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::Memory => Ok(Arc::new(MemoryBackend::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::tempdir;

    #[tokio::test]
    async fn from_config_filesystem_ok() {
        let temp = tempdir().unwrap();
        let config = StorageConfig::Filesystem {
            root: temp.path().join("store"),
        };

        let store = from_config(&config).await.unwrap();
        let mut w = store.create("hello").await.unwrap();
        w.write(Bytes::from_static(b"hi")).await.unwrap();
        w.finish().await.unwrap();
        assert!(store.open("hello").await.is_ok());
    }

    #[tokio::test]
    async fn from_config_memory_ok() {
        let store = from_config(&StorageConfig::Memory).await.unwrap();
        assert_eq!(store.backend_name(), "memory");
    }
}
