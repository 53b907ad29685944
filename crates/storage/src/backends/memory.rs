//! In-memory storage backend, for tests and ephemeral deployments.

use crate::error::{StorageError, StorageResult};
use crate::traits::{BlobRead, BlobStore, BlobWriter};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type Objects = Arc<Mutex<HashMap<String, Bytes>>>;

/// Blob store holding every stream in process memory.
#[derive(Default)]
pub struct MemoryBackend {
    objects: Objects,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBackend {
    async fn create(&self, key: &str) -> StorageResult<Box<dyn BlobWriter>> {
        if self.objects.lock().unwrap().contains_key(key) {
            return Err(StorageError::AlreadyExists(key.to_string()));
        }
        Ok(Box::new(MemoryWriter {
            key: key.to_string(),
            buf: BytesMut::new(),
            objects: self.objects.clone(),
        }))
    }

    async fn open(&self, key: &str) -> StorageResult<(Box<dyn BlobRead>, u64)> {
        let data = self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        let size = data.len() as u64;
        Ok((Box::new(MemoryRead { data }), size))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects
            .lock()
            .unwrap()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryWriter {
    key: String,
    buf: BytesMut,
    objects: Objects,
}

#[async_trait]
impl BlobWriter for MemoryWriter {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.buf.extend_from_slice(&data);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        let size = self.buf.len() as u64;
        self.objects
            .lock()
            .unwrap()
            .insert(self.key, self.buf.freeze());
        Ok(size)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryRead {
    data: Bytes,
}

#[async_trait]
impl BlobRead for MemoryRead {
    async fn read_at(&self, offset: u64, len: usize) -> StorageResult<Bytes> {
        let start = (offset as usize).min(self.data.len());
        let end = start.saturating_add(len).min(self.data.len());
        Ok(self.data.slice(start..end))
    }
}
