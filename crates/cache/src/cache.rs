//! Time-based blob cache.
//!
//! [`TimeCache`] fronts a slow backing store with a keyed byte-stream
//! cache. Entries live for a TTL (refreshed on every get), the total
//! size is capped, and the index survives restarts through a persisted
//! manifest. Readers pin entries so eviction never yanks a stream out
//! from under an open request.

use crate::error::{CacheError, CacheResult};
use crate::manifest::{self, ManifestEntry};
use async_trait::async_trait;
use bytes::Bytes;
use stacks_storage::{BlobRead, BlobStore, BlobWriter, StorageResult};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Backing-store key the manifest is written under. Cache keys have the
/// form `<item>+<n>`, so this cannot collide.
const INDEX_KEY: &str = "index";

/// One cached entry. The byte stream itself lives in the backing store
/// under the entry's key.
struct Entry {
    size: u64,
    expires: OffsetDateTime,
    created: OffsetDateTime,
    /// Open reader count. Nonzero pins the entry against eviction.
    use_count: u32,
    /// Deleted while pinned; the last reader to drop removes it.
    condemned: bool,
}

struct State {
    entries: HashMap<String, Entry>,
    total_size: u64,
    /// Keys with an open put writer.
    pending_puts: HashSet<String>,
    /// Index has diverged from the persisted manifest.
    dirty: bool,
}

struct Shared {
    store: Arc<dyn BlobStore>,
    ttl: Duration,
    max_size: u64,
    state: Mutex<State>,
    /// Serializes manifest writes (delete + create of the index key).
    manifest_write: tokio::sync::Mutex<()>,
    sweep: Notify,
    shutdown: Notify,
}

/// Fixed-size content cache with time-based eviction.
pub struct TimeCache {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TimeCache {
    /// Create a cache over `store` with the given TTL and size cap
    /// (`max_size` 0 means unbounded). A background eviction worker is
    /// started; call [`TimeCache::stop`] to shut it down.
    pub fn new(store: Arc<dyn BlobStore>, ttl: Duration, max_size: u64) -> Self {
        let shared = Arc::new(Shared {
            store,
            ttl,
            max_size,
            state: Mutex::new(State {
                entries: HashMap::new(),
                total_size: 0,
                pending_puts: HashSet::new(),
                dirty: false,
            }),
            manifest_write: tokio::sync::Mutex::new(()),
            sweep: Notify::new(),
            shutdown: Notify::new(),
        });

        let worker = tokio::spawn(eviction_worker(shared.clone()));

        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Start writing a new cache entry under `key`.
    ///
    /// The entry becomes visible when the returned writer finishes. At
    /// most one writer per key may be open; a second `put` fails with
    /// [`CacheError::PutPending`].
    pub async fn put(&self, key: &str) -> CacheResult<CacheWriter> {
        {
            let mut state = self.shared.state.lock().unwrap();
            if !state.pending_puts.insert(key.to_string()) {
                return Err(CacheError::PutPending);
            }
        }

        match self.shared.store.create(key).await {
            Ok(writer) => Ok(CacheWriter {
                shared: self.shared.clone(),
                key: key.to_string(),
                inner: Some(writer),
            }),
            Err(e) => {
                let mut state = self.shared.state.lock().unwrap();
                state.pending_puts.remove(key);
                Err(e.into())
            }
        }
    }

    /// Look up `key`. On a hit the entry's clock is refreshed and a
    /// pinned reader plus the entry size is returned; a miss is
    /// `Ok(None)`, not an error.
    pub async fn get(&self, key: &str) -> CacheResult<Option<(CacheReader, u64)>> {
        let now = OffsetDateTime::now_utc();
        let hit = {
            let mut state = self.shared.state.lock().unwrap();
            let Some(entry) = state.entries.get_mut(key) else {
                return Ok(None);
            };
            if entry.condemned {
                return Ok(None);
            }
            if entry.expires <= now {
                // Lapsed but not yet swept. Treat as a miss and, when
                // nothing is reading it, reclaim it before returning so
                // a fresh put can take the key.
                if entry.use_count > 0 {
                    return Ok(None);
                }
                let size = entry.size;
                state.entries.remove(key);
                state.total_size -= size;
                state.dirty = true;
                false
            } else {
                entry.expires = now + self.shared.ttl;
                entry.use_count += 1;
                true
            }
        };
        if !hit {
            self.shared.delete_stream(key).await;
            return Ok(None);
        }

        match self.shared.store.open(key).await {
            Ok((reader, size)) => Ok(Some((
                CacheReader {
                    shared: self.shared.clone(),
                    key: key.to_string(),
                    inner: reader,
                },
                size,
            ))),
            Err(e) => {
                self.shared.release(key);
                if e.is_not_found() {
                    // Index said yes but the stream is gone; drop the
                    // stale entry.
                    let mut state = self.shared.state.lock().unwrap();
                    if let Some(entry) = state.entries.remove(key) {
                        state.total_size -= entry.size;
                        state.dirty = true;
                    }
                    Ok(None)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    /// Remove `key` from the cache. The index entry goes away
    /// immediately; the byte stream follows once no reader holds it.
    /// Unknown keys are ignored.
    pub async fn delete(&self, key: &str) {
        let reclaim = {
            let mut state = self.shared.state.lock().unwrap();
            let Some(entry) = state.entries.get_mut(key) else {
                return;
            };
            if entry.use_count > 0 {
                entry.condemned = true;
                false
            } else {
                let entry = state.entries.remove(key).unwrap();
                state.total_size -= entry.size;
                state.dirty = true;
                true
            }
        };
        if reclaim {
            self.shared.delete_stream(key).await;
            self.shared.write_manifest().await;
        }
    }

    /// Current total size of cached entries in bytes.
    pub fn size(&self) -> u64 {
        self.shared.state.lock().unwrap().total_size
    }

    /// Configured size cap; 0 means unbounded.
    pub fn max_size(&self) -> u64 {
        self.shared.max_size
    }

    /// Rebuild the in-memory index from the backing store, for use
    /// after a cold start. Manifest entries whose stream is missing are
    /// dropped; streams with no manifest entry are removed.
    pub async fn scan(&self) -> CacheResult<()> {
        let keys = self.shared.store.list_prefix("").await?;
        let manifest_text = match self.shared.store.open(INDEX_KEY).await {
            Ok((reader, size)) => read_all(reader.as_ref(), size).await?,
            Err(e) if e.is_not_found() => Bytes::new(),
            Err(e) => return Err(e.into()),
        };
        let records = manifest::parse(&String::from_utf8_lossy(&manifest_text));

        let now = OffsetDateTime::now_utc();
        let present: HashSet<&str> = keys
            .iter()
            .map(String::as_str)
            .filter(|k| *k != INDEX_KEY)
            .collect();
        let listed: HashSet<&str> = records.iter().map(|r| r.key.as_str()).collect();

        let orphans: Vec<String> = present
            .iter()
            .filter(|k| !listed.contains(**k))
            .map(|k| k.to_string())
            .collect();

        {
            let mut state = self.shared.state.lock().unwrap();
            state.entries.clear();
            state.total_size = 0;
            let mut dropped = false;
            for record in records {
                if !present.contains(record.key.as_str()) {
                    tracing::warn!(key = %record.key, "cache manifest entry has no stream, dropping");
                    dropped = true;
                    continue;
                }
                state.total_size += record.size;
                state.entries.insert(
                    record.key,
                    Entry {
                        size: record.size,
                        expires: record.expires,
                        created: now,
                        use_count: 0,
                        condemned: false,
                    },
                );
            }
            state.dirty = dropped;
        }

        for key in orphans {
            tracing::warn!(key = %key, "removing orphan cache stream");
            self.shared.delete_stream(&key).await;
        }
        Ok(())
    }

    /// Shut down the background eviction worker, flushing the manifest
    /// first. Idempotent.
    pub async fn stop(&self) {
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            self.shared.shutdown.notify_one();
            let _ = handle.await;
        }
    }
}

impl Drop for TimeCache {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.lock().unwrap().take() {
            handle.abort();
        }
    }
}

/// Background eviction loop: wake every TTL/4 or on demand, sweep, and
/// flush the manifest on the way out.
async fn eviction_worker(shared: Arc<Shared>) {
    let tick = shared.ttl / 4;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(tick) => {}
            _ = shared.sweep.notified() => {}
            _ = shared.shutdown.notified() => break,
        }
        shared.evict_pass().await;
    }
    let dirty = shared.state.lock().unwrap().dirty;
    if dirty {
        shared.write_manifest().await;
    }
}

impl Shared {
    /// One eviction pass: drop everything expired and unpinned, then if
    /// still over budget drop eligible entries in ascending expiry order
    /// until under it. Stream deletion happens outside the index lock.
    async fn evict_pass(&self) {
        let now = OffsetDateTime::now_utc();
        let mut doomed = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            let expired: Vec<String> = state
                .entries
                .iter()
                .filter(|(_, e)| e.expires <= now && e.use_count == 0 && !e.condemned)
                .map(|(k, _)| k.clone())
                .collect();
            for key in expired {
                let entry = state.entries.remove(&key).unwrap();
                state.total_size -= entry.size;
                tracing::debug!(key = %key, age = ?(now - entry.created), "evicting expired cache entry");
                doomed.push(key);
            }

            if self.max_size > 0 && state.total_size > self.max_size {
                let mut eligible: Vec<(OffsetDateTime, String)> = state
                    .entries
                    .iter()
                    .filter(|(_, e)| e.use_count == 0 && !e.condemned)
                    .map(|(k, e)| (e.expires, k.clone()))
                    .collect();
                eligible.sort();
                for (_, key) in eligible {
                    if state.total_size <= self.max_size {
                        break;
                    }
                    let entry = state.entries.remove(&key).unwrap();
                    state.total_size -= entry.size;
                    tracing::debug!(key = %key, "evicting cache entry to meet size cap");
                    doomed.push(key);
                }
            }

            if !doomed.is_empty() {
                state.dirty = true;
            }
        }

        if !doomed.is_empty() {
            for key in &doomed {
                self.delete_stream(key).await;
            }
            self.write_manifest().await;
        }
    }

    /// Delete a backing stream, tolerating its absence.
    async fn delete_stream(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            if !e.is_not_found() {
                tracing::warn!(key = %key, error = %e, "failed to delete cache stream");
            }
        }
    }

    /// Serialize the index to the manifest key. Failures are logged,
    /// not propagated: the cache keeps serving and the next write
    /// retries.
    async fn write_manifest(&self) {
        let _guard = self.manifest_write.lock().await;
        let entries: Vec<ManifestEntry> = {
            let mut state = self.state.lock().unwrap();
            state.dirty = false;
            state
                .entries
                .iter()
                .filter(|(_, e)| !e.condemned)
                .map(|(k, e)| ManifestEntry {
                    key: k.clone(),
                    size: e.size,
                    expires: e.expires,
                })
                .collect()
        };
        let text = manifest::render(entries);

        let result: StorageResult<()> = async {
            match self.store.delete(INDEX_KEY).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            let mut writer = self.store.create(INDEX_KEY).await?;
            writer.write(Bytes::from(text)).await?;
            writer.finish().await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            tracing::error!(error = %e, "failed to write cache manifest");
            self.state.lock().unwrap().dirty = true;
        }
    }

    /// Drop a reader's pin. Returns stream cleanup work to the caller's
    /// executor when the last reader of a condemned entry lets go.
    fn release(&self, key: &str) {
        let reclaim = {
            let mut state = self.state.lock().unwrap();
            let Some(entry) = state.entries.get_mut(key) else {
                return;
            };
            entry.use_count = entry.use_count.saturating_sub(1);
            if entry.condemned && entry.use_count == 0 {
                let entry = state.entries.remove(key).unwrap();
                state.total_size -= entry.size;
                state.dirty = true;
                true
            } else {
                false
            }
        };
        if reclaim {
            let shared_key = key.to_string();
            let store = self.store.clone();
            tokio::spawn(async move {
                if let Err(e) = store.delete(&shared_key).await {
                    if !matches!(e, stacks_storage::StorageError::NotFound(_)) {
                        tracing::warn!(key = %shared_key, error = %e, "failed to delete condemned cache stream");
                    }
                }
            });
        }
    }
}

/// Writer for a cache entry under construction, returned by
/// [`TimeCache::put`].
pub struct CacheWriter {
    shared: Arc<Shared>,
    key: String,
    inner: Option<Box<dyn BlobWriter>>,
}

impl CacheWriter {
    /// Append data to the entry.
    pub async fn write(&mut self, data: Bytes) -> CacheResult<()> {
        let writer = self.inner.as_mut().expect("writer already closed");
        writer.write(data).await?;
        Ok(())
    }

    /// Seal the entry: measure its size, stamp its expiry, insert it
    /// into the index, persist the manifest, and evict if the insert
    /// pushed the cache over budget.
    pub async fn finish(mut self) -> CacheResult<()> {
        let writer = self.inner.take().expect("writer already closed");
        let size = match writer.finish().await {
            Ok(size) => size,
            Err(e) => {
                self.shared.state.lock().unwrap().pending_puts.remove(&self.key);
                return Err(e.into());
            }
        };

        let now = OffsetDateTime::now_utc();
        let over_budget = {
            let mut state = self.shared.state.lock().unwrap();
            state.pending_puts.remove(&self.key);
            state.total_size += size;
            state.entries.insert(
                self.key.clone(),
                Entry {
                    size,
                    expires: now + self.shared.ttl,
                    created: now,
                    use_count: 0,
                    condemned: false,
                },
            );
            state.dirty = true;
            self.shared.max_size > 0 && state.total_size > self.shared.max_size
        };

        if over_budget {
            // Synchronous pass so the size invariant holds when we
            // return; the background worker handles the clock.
            self.shared.evict_pass().await;
        } else {
            self.shared.write_manifest().await;
        }
        Ok(())
    }

    /// Abandon the entry and discard what was written.
    pub async fn abort(mut self) -> CacheResult<()> {
        let writer = self.inner.take().expect("writer already closed");
        let result = writer.abort().await;
        self.shared.state.lock().unwrap().pending_puts.remove(&self.key);
        result?;
        Ok(())
    }
}

impl Drop for CacheWriter {
    fn drop(&mut self) {
        // Dropped without finish or abort: release the put slot and let
        // the partial stream be discarded in the background.
        if let Some(writer) = self.inner.take() {
            self.shared.state.lock().unwrap().pending_puts.remove(&self.key);
            tokio::spawn(async move {
                let _ = writer.abort().await;
            });
        }
    }
}

/// Pinned reader over a cache entry, returned by [`TimeCache::get`].
/// Dropping it releases the pin.
pub struct CacheReader {
    shared: Arc<Shared>,
    key: String,
    inner: Box<dyn BlobRead>,
}

impl std::fmt::Debug for CacheReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheReader").field("key", &self.key).finish()
    }
}

#[async_trait]
impl BlobRead for CacheReader {
    async fn read_at(&self, offset: u64, len: usize) -> StorageResult<Bytes> {
        self.inner.read_at(offset, len).await
    }
}

impl Drop for CacheReader {
    fn drop(&mut self) {
        self.shared.release(&self.key);
    }
}

/// Slurp a whole stream.
async fn read_all(reader: &dyn BlobRead, size: u64) -> StorageResult<Bytes> {
    reader.read_at(0, size as usize).await
}
