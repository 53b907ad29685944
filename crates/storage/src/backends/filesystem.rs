//! Local filesystem storage backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{BlobRead, BlobStore, BlobWriter};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Directory under the root that holds in-flight writer temp files.
/// Hidden from listings; leftovers from a crash are harmless.
const TEMP_DIR: &str = ".tmp";

/// Filesystem blob store rooted at a single directory.
///
/// Keys are flat file names under the root. Writers stage their data in a
/// temp directory and rename into place on finish, so a stream is either
/// fully visible or absent.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend, creating the root if needed.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(TEMP_DIR)).await?;
        Ok(Self { root })
    }

    /// Validate a key and return its path under the root.
    ///
    /// Keys are flat: no separators, no leading dot, no traversal.
    fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty()
            || key.starts_with('.')
            || key.contains('/')
            || key.contains('\\')
            || key.contains("..")
        {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn create(&self, key: &str) -> StorageResult<Box<dyn BlobWriter>> {
        let final_path = self.key_path(key)?;
        if fs::try_exists(&final_path).await? {
            return Err(StorageError::AlreadyExists(key.to_string()));
        }

        let temp_path = self.root.join(TEMP_DIR).join(Uuid::new_v4().to_string());
        let file = fs::File::create(&temp_path).await?;

        Ok(Box::new(FilesystemWriter {
            file,
            temp_path,
            final_path,
            bytes_written: 0,
        }))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn open(&self, key: &str) -> StorageResult<(Box<dyn BlobRead>, u64)> {
        let path = self.key_path(key)?;
        let file = fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        let size = file.metadata().await?.len();
        let file = file.into_std().await;

        let reader = FilesystemRead {
            file: Arc::new(Mutex::new(file)),
        };
        Ok((Box::new(reader), size))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key)?;
        fs::remove_file(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut results = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            if name.starts_with(prefix) {
                results.push(name.to_string());
            }
        }
        Ok(results)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}

/// Streaming writer for the filesystem backend.
struct FilesystemWriter {
    file: fs::File,
    temp_path: PathBuf,
    final_path: PathBuf,
    bytes_written: u64,
}

#[async_trait]
impl BlobWriter for FilesystemWriter {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.file.write_all(&data).await?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> StorageResult<u64> {
        // Flush to disk before the rename makes the stream visible.
        self.file.sync_all().await?;
        drop(self.file);
        fs::rename(&self.temp_path, &self.final_path).await?;
        Ok(self.bytes_written)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
        Ok(())
    }
}

/// Positional reader for the filesystem backend.
///
/// The file cursor is shared, so reads serialize on a mutex and run on
/// the blocking pool.
#[derive(Debug)]
struct FilesystemRead {
    file: Arc<Mutex<std::fs::File>>,
}

#[async_trait]
impl BlobRead for FilesystemRead {
    async fn read_at(&self, offset: u64, len: usize) -> StorageResult<Bytes> {
        let file = self.file.clone();
        let data = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
            let mut file = file.lock().expect("file lock poisoned");
            file.seek(SeekFrom::Start(offset))?;
            let mut buf = vec![0u8; len];
            let mut filled = 0;
            while filled < len {
                let n = file.read(&mut buf[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            buf.truncate(filled);
            Ok(buf)
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(e)))??;
        Ok(Bytes::from(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn put(backend: &FilesystemBackend, key: &str, data: &[u8]) {
        let mut w = backend.create(key).await.unwrap();
        w.write(Bytes::copy_from_slice(data)).await.unwrap();
        let n = w.finish().await.unwrap();
        assert_eq!(n, data.len() as u64);
    }

    #[tokio::test]
    async fn test_create_open_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        put(&backend, "greeting", b"hello world").await;

        let (r, size) = backend.open("greeting").await.unwrap();
        assert_eq!(size, 11);
        assert_eq!(r.read_at(0, 5).await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(r.read_at(6, 100).await.unwrap(), Bytes::from_static(b"world"));
        assert!(r.read_at(11, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_existing_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        put(&backend, "dup", b"one").await;
        match backend.create("dup").await {
            Err(StorageError::AlreadyExists(_)) => {}
            other => panic!("expected AlreadyExists, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_abort_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        let mut w = backend.create("partial").await.unwrap();
        w.write(Bytes::from_static(b"oops")).await.unwrap();
        w.abort().await.unwrap();

        assert!(backend.open("partial").await.unwrap_err().is_not_found());
        assert!(backend.list_prefix("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unfinished_writer_invisible() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        let mut w = backend.create("pending").await.unwrap();
        w.write(Bytes::from_static(b"half")).await.unwrap();
        assert!(backend.open("pending").await.unwrap_err().is_not_found());
        w.finish().await.unwrap();
        assert!(backend.open("pending").await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        assert!(backend.delete("ghost").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        put(&backend, "mdalpha", b"{}").await;
        put(&backend, "mdbeta", b"{}").await;
        put(&backend, "falpha+0000", b"data").await;

        let mut md = backend.list_prefix("md").await.unwrap();
        md.sort();
        assert_eq!(md, vec!["mdalpha", "mdbeta"]);

        let frags = backend.list_prefix("falpha+").await.unwrap();
        assert_eq!(frags, vec!["falpha+0000"]);

        assert_eq!(backend.list_prefix("").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_bad_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        for key in ["", "..", "a/b", "a\\b", ".hidden"] {
            match backend.open(key).await {
                Err(StorageError::InvalidKey(_)) => {}
                other => panic!("key {key:?}: expected InvalidKey, got {:?}", other.map(|_| ())),
            }
        }
    }
}
