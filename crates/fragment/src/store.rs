//! The fragment store.
//!
//! Staged files are uploaded in consecutive pieces of arbitrary size.
//! Each piece lands in the backing store as its own fragment stream, and
//! the file's metadata record is re-persisted on every mutation, so a
//! restarted daemon rebuilds the exact staging state with [`FragmentStore::load`].
//! If a fragment upload fails partway it is rolled back and the client
//! tries that piece again.

use crate::error::{FragmentError, FragmentResult};
use crate::meta::{FileMeta, Fragment, FILE_KEY_PREFIX};
use bytes::{Bytes, BytesMut};
use md5::Md5;
use sha2::{Digest, Sha256};
use stacks_storage::{BlobRead, BlobStore, BlobWriter, COPY_CHUNK_SIZE};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{Mutex, MutexGuard, RwLock};

struct Inner {
    files: HashMap<String, Arc<StagedFile>>,
    /// Label -> sorted file ids carrying it.
    labels: BTreeMap<String, Vec<String>>,
}

/// Store of staged files, keyed by id.
///
/// The in-memory map is the authoritative view; metadata records under
/// `md*` keys exist so [`FragmentStore::load`] can rebuild it after a
/// restart. Lock order is always store before file.
pub struct FragmentStore {
    store: Arc<dyn BlobStore>,
    inner: RwLock<Inner>,
}

impl FragmentStore {
    /// Create a fragment store over `store`. Call
    /// [`FragmentStore::load`] before use to pick up persisted state.
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            inner: RwLock::new(Inner {
                files: HashMap::new(),
                labels: BTreeMap::new(),
            }),
        }
    }

    /// Rebuild the in-memory state from the `md*` records in the
    /// backing store. Records that fail to decode are skipped, not
    /// fatal; their fragments are left in place for inspection.
    pub async fn load(&self) -> FragmentResult<()> {
        let keys = self.store.list_prefix(FILE_KEY_PREFIX).await?;
        let mut inner = self.inner.write().await;
        inner.files.clear();
        inner.labels.clear();
        for key in keys {
            let data = match self.read_record(&key).await {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "cannot read staged file record, skipping");
                    continue;
                }
            };
            let meta: FileMeta = match serde_json::from_slice(&data) {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "cannot decode staged file record, skipping");
                    continue;
                }
            };
            for label in &meta.labels {
                index_label(&mut inner.labels, label, &meta.id);
            }
            let id = meta.id.clone();
            let file = Arc::new(StagedFile {
                id: id.clone(),
                store: self.store.clone(),
                state: Mutex::new(meta),
            });
            inner.files.insert(id, file);
        }
        Ok(())
    }

    async fn read_record(&self, key: &str) -> FragmentResult<Bytes> {
        let (reader, size) = self.store.open(key).await?;
        let mut buf = BytesMut::with_capacity(size as usize);
        let mut offset = 0u64;
        loop {
            let chunk = reader.read_at(offset, COPY_CHUNK_SIZE).await?;
            if chunk.is_empty() {
                return Ok(buf.freeze());
            }
            offset += chunk.len() as u64;
            buf.extend_from_slice(&chunk);
        }
    }

    /// Create a new empty staged file. It is not persisted until its
    /// first fragment is written. Fails if the id is taken.
    pub async fn create(&self, id: &str) -> FragmentResult<Arc<StagedFile>> {
        let mut inner = self.inner.write().await;
        if inner.files.contains_key(id) {
            return Err(FragmentError::AlreadyExists(id.to_string()));
        }
        let file = Arc::new(StagedFile {
            id: id.to_string(),
            store: self.store.clone(),
            state: Mutex::new(FileMeta::new(id)),
        });
        inner.files.insert(id.to_string(), file.clone());
        Ok(file)
    }

    /// Look up a staged file by id.
    pub async fn lookup(&self, id: &str) -> Option<Arc<StagedFile>> {
        self.inner.read().await.files.get(id).cloned()
    }

    /// Ids of every staged file.
    pub async fn list(&self) -> Vec<String> {
        self.inner.read().await.files.keys().cloned().collect()
    }

    /// Ids of staged files carrying every one of `labels`, sorted. An
    /// empty label set lists everything.
    pub async fn list_filtered(&self, labels: &[String]) -> Vec<String> {
        let inner = self.inner.read().await;
        if labels.is_empty() {
            let mut all: Vec<String> = inner.files.keys().cloned().collect();
            all.sort();
            return all;
        }
        let mut lists: Vec<&[String]> = Vec::with_capacity(labels.len());
        for label in labels {
            match inner.labels.get(label) {
                Some(ids) => lists.push(ids),
                None => return Vec::new(),
            }
        }
        intersect_sorted(&lists)
    }

    /// Delete a staged file: its metadata record and every fragment.
    /// Unknown ids are ignored.
    pub async fn delete(&self, id: &str) {
        let (file, doomed_keys) = {
            let mut inner = self.inner.write().await;
            let Some(file) = inner.files.remove(id) else {
                return;
            };
            let meta = file.state.lock().await;
            for label in &meta.labels {
                unindex_label(&mut inner.labels, label, id);
            }
            let mut keys = vec![meta.metadata_key()];
            keys.extend(meta.fragments.iter().map(|f| f.id.clone()));
            drop(meta);
            (file, keys)
        };
        drop(file);

        for key in doomed_keys {
            if let Err(e) = self.store.delete(&key).await {
                if !e.is_not_found() {
                    tracing::warn!(key = %key, error = %e, "failed to delete staged file stream");
                }
            }
        }
    }

    /// Replace a file's labels: sort, dedupe, reindex, re-persist.
    pub async fn set_labels(&self, id: &str, labels: &[String]) -> FragmentResult<()> {
        let mut inner = self.inner.write().await;
        let file = inner
            .files
            .get(id)
            .cloned()
            .ok_or_else(|| FragmentError::NotFound(id.to_string()))?;
        let mut meta = file.state.lock().await;

        let mut new_labels = labels.to_vec();
        new_labels.sort();
        new_labels.dedup();

        let old_labels = std::mem::replace(&mut meta.labels, new_labels);
        for label in &old_labels {
            unindex_label(&mut inner.labels, label, id);
        }
        for label in &meta.labels {
            index_label(&mut inner.labels, label, id);
        }
        meta.modified = OffsetDateTime::now_utc();
        file.save_locked(&meta).await
    }
}

fn index_label(labels: &mut BTreeMap<String, Vec<String>>, label: &str, id: &str) {
    let list = labels.entry(label.to_string()).or_default();
    if let Err(pos) = list.binary_search_by(|probe| probe.as_str().cmp(id)) {
        list.insert(pos, id.to_string());
    }
}

fn unindex_label(labels: &mut BTreeMap<String, Vec<String>>, label: &str, id: &str) {
    if let Some(list) = labels.get_mut(label) {
        if let Ok(pos) = list.binary_search_by(|probe| probe.as_str().cmp(id)) {
            list.remove(pos);
        }
        if list.is_empty() {
            labels.remove(label);
        }
    }
}

/// Intersect k sorted lists by advancing one cursor per list. A value
/// is emitted when every cursor points at it.
fn intersect_sorted(lists: &[&[String]]) -> Vec<String> {
    let mut cursors = vec![0usize; lists.len()];
    let mut out = Vec::new();
    'outer: loop {
        let Some(mut candidate) = lists[0].get(cursors[0]) else {
            break;
        };
        loop {
            let mut candidate_moved = false;
            for (i, list) in lists.iter().enumerate() {
                while list.get(cursors[i]).is_some_and(|v| v < candidate) {
                    cursors[i] += 1;
                }
                match list.get(cursors[i]) {
                    None => break 'outer,
                    Some(v) if v > candidate => {
                        candidate = v;
                        candidate_moved = true;
                    }
                    Some(_) => {}
                }
            }
            if !candidate_moved {
                break;
            }
        }
        out.push(candidate.clone());
        for cursor in cursors.iter_mut() {
            *cursor += 1;
        }
    }
    out
}

/// One staged file. Obtained from [`FragmentStore::create`] or
/// [`FragmentStore::lookup`]; shared handles are fine, mutations
/// serialize on the file's own lock.
pub struct StagedFile {
    id: String,
    store: Arc<dyn BlobStore>,
    state: Mutex<FileMeta>,
}

impl StagedFile {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Snapshot of the file's metadata.
    pub async fn meta(&self) -> FileMeta {
        self.state.lock().await.clone()
    }

    /// Start appending one fragment. The fragment index is claimed and
    /// the metadata persisted before the writer is handed out, so
    /// indices are never reused even if this upload dies.
    pub async fn append(self: &Arc<Self>) -> FragmentResult<FragmentWriter> {
        let key = {
            let mut meta = self.state.lock().await;
            let key = meta.fragment_key(meta.next_fragment_index);
            meta.next_fragment_index += 1;
            meta.modified = OffsetDateTime::now_utc();
            self.save_locked(&meta).await?;
            key
        };
        let writer = self.store.create(&key).await?;
        Ok(FragmentWriter {
            file: self.clone(),
            key,
            size: 0,
            inner: Some(writer),
        })
    }

    /// Open a read stream spanning all current fragments in order.
    pub async fn open(&self) -> FragmentReader {
        let fragments = self.state.lock().await.fragments.clone();
        FragmentReader {
            store: self.store.clone(),
            fragments: fragments.into(),
            current: None,
            offset: 0,
        }
    }

    /// Remove the trailing fragment.
    pub async fn rollback(&self) -> FragmentResult<()> {
        let last = {
            let meta = self.state.lock().await;
            match meta.fragments.len() {
                0 => return Ok(()),
                n => n - 1,
            }
        };
        self.remove_fragment(last).await
    }

    /// Remove fragment number `n` (0 is the first). Out-of-range is a
    /// no-op. Use [`StagedFile::rollback`] for the trailing fragment.
    pub async fn remove_fragment(&self, n: usize) -> FragmentResult<()> {
        let mut meta = self.state.lock().await;
        let Some(frag) = meta.fragments.get(n).cloned() else {
            return Ok(());
        };
        self.store.delete(&frag.id).await?;
        meta.fragments.remove(n);
        meta.size -= frag.size;
        meta.modified = OffsetDateTime::now_utc();
        self.save_locked(&meta).await
    }

    /// Record who is performing this upload.
    pub async fn set_creator(&self, creator: &str) -> FragmentResult<()> {
        let mut meta = self.state.lock().await;
        meta.creator = creator.to_string();
        meta.modified = OffsetDateTime::now_utc();
        self.save_locked(&meta).await
    }

    pub async fn set_md5(&self, md5: Vec<u8>) -> FragmentResult<()> {
        let mut meta = self.state.lock().await;
        meta.md5 = md5;
        meta.modified = OffsetDateTime::now_utc();
        self.save_locked(&meta).await
    }

    pub async fn set_sha256(&self, sha256: Vec<u8>) -> FragmentResult<()> {
        let mut meta = self.state.lock().await;
        meta.sha256 = sha256;
        meta.modified = OffsetDateTime::now_utc();
        self.save_locked(&meta).await
    }

    /// Attach an opaque client payload, persisted verbatim.
    pub async fn set_extra(&self, extra: &str) -> FragmentResult<()> {
        let mut meta = self.state.lock().await;
        meta.extra = extra.to_string();
        meta.modified = OffsetDateTime::now_utc();
        self.save_locked(&meta).await
    }

    /// Stream-hash the concatenated content and compare against
    /// whichever of MD5 and SHA-256 are recorded. True when every
    /// recorded hash matches (vacuously true when none are).
    pub async fn verify(&self) -> FragmentResult<bool> {
        let (want_md5, want_sha256) = {
            let meta = self.state.lock().await;
            (meta.md5.clone(), meta.sha256.clone())
        };
        if want_md5.is_empty() && want_sha256.is_empty() {
            return Ok(true);
        }

        let mut reader = self.open().await;
        let mut md5 = Md5::new();
        let mut sha256 = Sha256::new();
        loop {
            let chunk = reader.read(COPY_CHUNK_SIZE).await?;
            if chunk.is_empty() {
                break;
            }
            md5.update(&chunk);
            sha256.update(&chunk);
        }

        if !want_md5.is_empty() {
            let got = md5.finalize();
            if got.as_slice() != want_md5.as_slice() {
                tracing::info!(
                    id = %self.id,
                    expected = %hex::encode(&want_md5),
                    actual = %hex::encode(got),
                    "staged file MD5 mismatch"
                );
                return Ok(false);
            }
        }
        if !want_sha256.is_empty() {
            let got = sha256.finalize();
            if got.as_slice() != want_sha256.as_slice() {
                tracing::info!(
                    id = %self.id,
                    expected = %hex::encode(&want_sha256),
                    actual = %hex::encode(got),
                    "staged file SHA256 mismatch"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Persist the metadata record. Caller holds the file lock. On
    /// failure the in-memory state stands; `load` reconciles from disk.
    async fn save_locked(&self, meta: &MutexGuard<'_, FileMeta>) -> FragmentResult<()> {
        let key = meta.metadata_key();
        let body = serde_json::to_vec(&**meta)?;
        match self.store.delete(&key).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        let mut writer = self.store.create(&key).await?;
        writer.write(Bytes::from(body)).await?;
        writer.finish().await?;
        Ok(())
    }
}

/// Writer for one fragment, returned by [`StagedFile::append`]. The
/// fragment joins the file when `finish` returns.
pub struct FragmentWriter {
    file: Arc<StagedFile>,
    key: String,
    size: u64,
    inner: Option<Box<dyn BlobWriter>>,
}

impl FragmentWriter {
    pub async fn write(&mut self, data: Bytes) -> FragmentResult<()> {
        let writer = self.inner.as_mut().expect("writer already closed");
        self.size += data.len() as u64;
        writer.write(data).await?;
        Ok(())
    }

    /// Seal the fragment, account its size, and re-persist metadata.
    pub async fn finish(mut self) -> FragmentResult<()> {
        let writer = self.inner.take().expect("writer already closed");
        let size = writer.finish().await?;
        let mut meta = self.file.state.lock().await;
        meta.fragments.push(Fragment {
            id: self.key.clone(),
            size,
        });
        meta.size += size;
        meta.modified = OffsetDateTime::now_utc();
        self.file.save_locked(&meta).await
    }

    /// Discard this fragment. Its index is not reused.
    pub async fn abort(mut self) -> FragmentResult<()> {
        let writer = self.inner.take().expect("writer already closed");
        writer.abort().await?;
        Ok(())
    }
}

impl Drop for FragmentWriter {
    fn drop(&mut self) {
        if let Some(writer) = self.inner.take() {
            tokio::spawn(async move {
                let _ = writer.abort().await;
            });
        }
    }
}

/// Reader spanning a staged file's fragments. Each fragment is opened
/// and exhausted in turn, so at most one backing stream is open at any
/// time.
pub struct FragmentReader {
    store: Arc<dyn BlobStore>,
    fragments: VecDeque<Fragment>,
    current: Option<Box<dyn BlobRead>>,
    offset: u64,
}

impl FragmentReader {
    /// Read up to `len` bytes. An empty result is end of file.
    pub async fn read(&mut self, len: usize) -> FragmentResult<Bytes> {
        loop {
            if self.current.is_none() {
                let Some(frag) = self.fragments.pop_front() else {
                    return Ok(Bytes::new());
                };
                let (reader, _) = self.store.open(&frag.id).await?;
                self.current = Some(reader);
                self.offset = 0;
            }
            let reader = self.current.as_ref().unwrap();
            let chunk = reader.read_at(self.offset, len).await?;
            if chunk.is_empty() {
                self.current = None;
                continue;
            }
            self.offset += chunk.len() as u64;
            return Ok(chunk);
        }
    }

    /// Read the remainder into one buffer.
    pub async fn read_to_end(&mut self) -> FragmentResult<Bytes> {
        let mut buf = BytesMut::new();
        loop {
            let chunk = self.read(COPY_CHUNK_SIZE).await?;
            if chunk.is_empty() {
                return Ok(buf.freeze());
            }
            buf.extend_from_slice(&chunk);
        }
    }
}
