//! Storage trait definitions.
//!
//! A [`BlobStore`] is a flat mapping from string key to an opaque byte
//! stream. Streams are written once through a [`BlobWriter`] and become
//! visible atomically when the writer finishes; after that they are
//! immutable and are read through a positional [`BlobRead`].
//!
//! Key naming is the caller's concern. The daemon partitions keys by
//! prefix: staged-file metadata under `md`, fragments under `f`, cache
//! entries under whatever key the cache was given.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;

/// Named byte-stream store.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Start writing a new stream under `key`.
    ///
    /// Fails with `AlreadyExists` if the key is present. The stream is
    /// not visible to `open` or `list_prefix` until the writer finishes.
    async fn create(&self, key: &str) -> StorageResult<Box<dyn BlobWriter>>;

    /// Open the stream stored under `key`, returning a positional reader
    /// and the stream length in bytes.
    async fn open(&self, key: &str) -> StorageResult<(Box<dyn BlobRead>, u64)>;

    /// Remove the stream stored under `key`.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List every key starting with `prefix`. An empty prefix lists all
    /// keys. No ordering is guaranteed.
    async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Static identifier for the backend type, for logging.
    fn backend_name(&self) -> &'static str;
}

/// Single-use streaming writer returned by [`BlobStore::create`].
///
/// The store promises atomic visibility: either `finish` succeeds and the
/// full stream is readable, or nothing is.
#[async_trait]
pub trait BlobWriter: Send {
    /// Append a chunk of data.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Seal the stream and make it visible. Returns total bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Discard the partial stream.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}

/// Positional reader over a sealed stream.
///
/// Readers are cheap handles; multiple may be open on the same key at
/// once, and `read_at` takes `&self` so a single handle may serve
/// concurrent reads.
#[async_trait]
pub trait BlobRead: Send + Sync + std::fmt::Debug {
    /// Read up to `len` bytes starting at `offset`.
    ///
    /// A short (or empty) result signals end of stream; it is not an
    /// error.
    async fn read_at(&self, offset: u64, len: usize) -> StorageResult<Bytes>;
}

/// Buffer size used when copying a stream chunk by chunk.
pub const COPY_CHUNK_SIZE: usize = 64 * 1024;
