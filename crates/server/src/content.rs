//! The find-content state machine.
//!
//! Every blob read lands here. The outcome is one of: serve from the
//! cache, serve straight from tape because the blob is too big to be
//! worth caching, or wait while exactly one populate copies the blob
//! into the cache. Repeated failures for a key fail fast through the
//! error ledger instead of queueing more tape work.

use crate::flight::Flight;
use crate::ledger::ErrorLedger;
use crate::ranged::RangedReader;
use crate::tape::{BundleSource, TapeError};
use stacks_cache::{CacheError, CacheWriter, TimeCache};
use stacks_core::BlobRef;
use stacks_storage::{StorageError, COPY_CHUNK_SIZE};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// Why a populate failed. Stored in the error ledger, so it must be
/// cheap to clone.
#[derive(Clone, Debug, Error)]
pub enum PopulateError {
    #[error("no blob {0}")]
    NoBlob(String),

    #[error("length mismatch: copied {actual} bytes, expected {expected}")]
    LengthMismatch { expected: u64, actual: u64 },

    #[error("tape error: {0}")]
    Tape(String),

    #[error("cache error: {0}")]
    Cache(String),
}

impl From<TapeError> for PopulateError {
    fn from(e: TapeError) -> Self {
        match e {
            TapeError::NoBlob(blob) => Self::NoBlob(blob.to_string()),
            other => Self::Tape(other.to_string()),
        }
    }
}

/// Errors surfaced synchronously by [`ContentFinder::find_content`].
#[derive(Debug, Error)]
pub enum FindError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Tape(#[from] TapeError),

    /// The error ledger reports a recent populate failure for this key.
    #[error("recent failure: {0}")]
    Recent(PopulateError),
}

/// Where a request's content is coming from.
pub enum Content {
    /// Served from the cache.
    Cached(RangedReader),
    /// Too large to cache; served straight from tape.
    Large(RangedReader),
    /// A populate is (or may be) in flight. `done` is `None` when the
    /// caller asked not to trigger loading.
    Waiting {
        size: u64,
        done: Option<broadcast::Receiver<()>>,
    },
}

/// Decides per request how to source a blob, coalescing duplicate
/// populates and remembering recent failures.
pub struct ContentFinder {
    cache: Arc<TimeCache>,
    tape: Arc<dyn BundleSource>,
    ledger: ErrorLedger,
    inflight: Flight<()>,
}

impl ContentFinder {
    pub fn new(cache: Arc<TimeCache>, tape: Arc<dyn BundleSource>) -> Self {
        Self {
            cache,
            tape,
            ledger: ErrorLedger::new(),
            inflight: Flight::new(),
        }
    }

    /// Look in the cache and on tape for `blob`. A miss triggers a
    /// populate only when `do_load` is set, so metadata-only requests
    /// never recall content.
    pub async fn find_content(
        self: &Arc<Self>,
        blob: &BlobRef,
        do_load: bool,
    ) -> Result<Content, FindError> {
        let key = blob.cache_key();
        if let Some((reader, size)) = self.cache.get(&key).await? {
            return Ok(Content::Cached(RangedReader::new(Box::new(reader), size)));
        }

        // content has to come from tape
        let size = self.tape.stat(blob).await?;
        if !do_load {
            return Ok(Content::Waiting { size, done: None });
        }
        if let Some(err) = self.ledger.find(&key) {
            return Err(FindError::Recent(err));
        }

        // cache the blob unless it would swamp the cache. The 1/8
        // cutoff is arbitrary; max_size 0 means unbounded.
        let max_size = self.cache.max_size();
        if max_size == 0 || size < max_size / 8 {
            let finder = self.clone();
            let blob = blob.clone();
            let populate_key = key.clone();
            let done = self.inflight.do_chan(&key, async move {
                finder.populate(&populate_key, &blob).await;
            });
            return Ok(Content::Waiting {
                size,
                done: Some(done),
            });
        }

        let (reader, size) = self.tape.open_blob(blob).await?;
        Ok(Content::Large(RangedReader::new(reader, size)))
    }

    /// Copy a blob from tape into the cache under `key`. Never returns
    /// an error to the triggering request; failures go to the ledger
    /// and the partial entry is removed.
    async fn populate(&self, key: &str, blob: &BlobRef) {
        let start = std::time::Instant::now();
        let mut writer = match self.cache.put(key).await {
            Ok(writer) => writer,
            // another copy already exists or is arriving; keep it
            Err(CacheError::PutPending) => return,
            Err(CacheError::Storage(StorageError::AlreadyExists(_))) => return,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "cache put failed");
                return;
            }
        };

        match self.copy_blob(&mut writer, blob).await {
            Ok(()) => {
                if let Err(e) = writer.finish().await {
                    tracing::error!(key = %key, error = %e, "cache writer close failed");
                    self.cache.delete(key).await;
                }
            }
            Err(e) => {
                tracing::error!(key = %key, error = %e, "populate failed");
                self.ledger.add(key, e);
                let _ = writer.abort().await;
                self.cache.delete(key).await;
            }
        }
        tracing::info!(key = %key, elapsed = ?start.elapsed(), "populate finished");
    }

    async fn copy_blob(
        &self,
        writer: &mut CacheWriter,
        blob: &BlobRef,
    ) -> Result<(), PopulateError> {
        let (reader, expected) = self.tape.open_blob(blob).await?;
        let mut copied = 0u64;
        loop {
            let chunk = reader
                .read_at(copied, COPY_CHUNK_SIZE)
                .await
                .map_err(|e| PopulateError::Tape(e.to_string()))?;
            if chunk.is_empty() {
                break;
            }
            copied += chunk.len() as u64;
            writer
                .write(chunk)
                .await
                .map_err(|e| PopulateError::Cache(e.to_string()))?;
        }
        if copied != expected {
            return Err(PopulateError::LengthMismatch {
                expected,
                actual: copied,
            });
        }
        Ok(())
    }
}
