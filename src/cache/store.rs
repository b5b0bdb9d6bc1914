use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use packsound_common::{CanonicalId, Error, MediaError, Result, SourceInfo, TargetFormat};
use parking_lot::Mutex;
use tokio::sync::watch;

use super::sidecar::{self, Sidecar, SidecarState};
use super::{CacheEntry, CachePolicy, EntryState, SlotStatus};

/// Outcome of a successful eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eviction {
    /// Entry and files are gone.
    Removed,
    /// Readers are still open; the last one to close deletes the entry.
    Deferred,
}

/// What a sweep pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted_idle: usize,
    pub evicted_size: usize,
    pub expired_failures: usize,
    pub freed_bytes: u64,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.evicted_idle + self.evicted_size + self.expired_failures
    }
}

struct SlotMeta {
    last_accessed_at: DateTime<Utc>,
    last_access: Instant,
    info: SourceInfo,
    retry_at: Option<Instant>,
}

struct Slot {
    id: CanonicalId,
    generation: u64,
    file_path: PathBuf,
    sidecar_path: PathBuf,
    created_at: DateTime<Utc>,
    status: watch::Sender<SlotStatus>,
    /// Serializes transitions and guards access metadata.
    meta: Mutex<SlotMeta>,
    readers: AtomicUsize,
    /// Evicted while readers were open.
    doomed: AtomicBool,
}

impl Slot {
    fn snapshot(&self) -> CacheEntry {
        let status = self.status.borrow().clone();
        let meta = self.meta.lock();
        self.snapshot_with(status, &meta)
    }

    fn snapshot_with(&self, status: SlotStatus, meta: &SlotMeta) -> CacheEntry {
        CacheEntry {
            id: self.id.clone(),
            generation: self.generation,
            state: status.state,
            file_path: self.file_path.clone(),
            size: status.written,
            created_at: self.created_at,
            last_accessed_at: meta.last_accessed_at,
            info: meta.info.clone(),
            retry_at: meta.retry_at,
        }
    }

    fn state(&self) -> EntryState {
        self.status.borrow().state.clone()
    }

    fn touch(&self) {
        let mut meta = self.meta.lock();
        meta.last_accessed_at = Utc::now();
        meta.last_access = Instant::now();
    }

    fn delete_files(&self) {
        for path in [&self.file_path, &self.sidecar_path] {
            remove_quietly(path);
        }
    }

    fn invalid(&self, from: &EntryState, to: &'static str) -> Error {
        Error::InvalidTransition {
            id: self.id.to_string(),
            from: from.name(),
            to,
        }
    }
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove cache file"),
    }
}

struct StoreInner {
    dir: PathBuf,
    format: TargetFormat,
    policy: CachePolicy,
    entries: DashMap<CanonicalId, Arc<Slot>>,
    next_generation: AtomicU64,
}

impl StoreInner {
    /// Remove a doomed slot whose last reader just closed.
    fn remove_if_released(&self, slot: &Arc<Slot>) {
        let removed = self.entries.remove_if(&slot.id, |_, current| {
            if Arc::ptr_eq(current, slot) && current.readers.load(Ordering::SeqCst) == 0 {
                current.delete_files();
                true
            } else {
                false
            }
        });
        if removed.is_some() {
            tracing::debug!(id = %slot.id, "deferred eviction completed");
        }
    }
}

/// Process-wide store of cache slots.
///
/// Cheap to clone; all clones share the same slots.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<StoreInner>,
}

impl CacheStore {
    /// Create an empty store, without touching the filesystem.
    pub fn new(dir: impl Into<PathBuf>, format: TargetFormat, policy: CachePolicy) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                dir: dir.into(),
                format,
                policy,
                entries: DashMap::new(),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Open the cache directory, recovering Ready entries from a previous run.
    ///
    /// A data file is kept only when its sidecar says `ready`, names the same
    /// id and format, and records the file's actual length. Everything else in
    /// the directory is deleted.
    pub fn open(dir: impl Into<PathBuf>, format: TargetFormat, policy: CachePolicy) -> Result<Self> {
        let store = Self::new(dir, format, policy);
        let dir = store.inner.dir.clone();
        std::fs::create_dir_all(&dir)?;

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }

        let mut keep: HashSet<PathBuf> = HashSet::new();
        for path in files.iter().filter(|p| p.extension().is_some_and(|e| e == "json")) {
            if let Some(slot) = store.recover(path) {
                keep.insert(slot.file_path.clone());
                keep.insert(slot.sidecar_path.clone());
                store.inner.entries.insert(slot.id.clone(), Arc::new(slot));
            }
        }

        let mut discarded = 0usize;
        for path in files.iter().filter(|p| !keep.contains(*p)) {
            remove_quietly(path);
            discarded += 1;
        }

        tracing::info!(
            dir = %dir.display(),
            recovered = store.inner.entries.len(),
            discarded,
            "Opened cache"
        );
        Ok(store)
    }

    fn recover(&self, sidecar_path: &Path) -> Option<Slot> {
        let stem = sidecar_path.file_stem()?.to_str()?;
        let sidecar = sidecar::read(sidecar_path)?;
        if sidecar.id.as_str() != stem
            || sidecar.state != SidecarState::Ready
            || sidecar.format != self.inner.format
        {
            return None;
        }

        let file_path = self.data_path(&sidecar.id);
        let len = std::fs::metadata(&file_path).ok()?.len();
        if len != sidecar.size {
            tracing::debug!(id = %sidecar.id, expected = sidecar.size, actual = len, "size mismatch");
            return None;
        }

        let slot = self.new_slot(&sidecar.id, EntryState::Ready, sidecar.size);
        slot.meta.lock().info = sidecar.info;
        Some(Slot {
            created_at: sidecar.created_at,
            ..slot
        })
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    pub fn format(&self) -> TargetFormat {
        self.inner.format
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.inner.policy
    }

    /// Path of the data file for `id`.
    pub fn data_path(&self, id: &CanonicalId) -> PathBuf {
        self.inner
            .dir
            .join(format!("{id}.{}", self.inner.format.extension()))
    }

    fn new_slot(&self, id: &CanonicalId, state: EntryState, written: u64) -> Slot {
        let (status, _) = watch::channel(SlotStatus { state, written });
        let now = Utc::now();
        Slot {
            id: id.clone(),
            generation: self.inner.next_generation.fetch_add(1, Ordering::Relaxed),
            file_path: self.data_path(id),
            sidecar_path: sidecar::sidecar_path(&self.inner.dir, id),
            created_at: now,
            status,
            meta: Mutex::new(SlotMeta {
                last_accessed_at: now,
                last_access: Instant::now(),
                info: SourceInfo::default(),
                retry_at: None,
            }),
            readers: AtomicUsize::new(0),
            doomed: AtomicBool::new(false),
        }
    }

    fn slot(&self, id: &CanonicalId) -> Result<Arc<Slot>> {
        self.inner
            .entries
            .get(id)
            .map(|r| Arc::clone(r.value()))
            .ok_or(Error::Media(MediaError::NotFound))
    }

    /// Return the entry for `id`, creating a Pending one if absent.
    ///
    /// The boolean is `true` for exactly one caller per created entry.
    pub fn lookup_or_create(&self, id: &CanonicalId) -> (CacheEntry, bool) {
        let mut created = false;
        let slot = {
            let slot = self.inner.entries.entry(id.clone()).or_insert_with(|| {
                created = true;
                Arc::new(self.new_slot(id, EntryState::Pending, 0))
            });
            Arc::clone(slot.value())
        };
        if created {
            tracing::debug!(id = %id, generation = slot.generation, "created cache entry");
        }
        (slot.snapshot(), created)
    }

    /// Snapshot of the entry for `id`.
    pub fn get(&self, id: &CanonicalId) -> Result<CacheEntry> {
        Ok(self.slot(id)?.snapshot())
    }

    /// Snapshots of every entry, ordered by id.
    pub fn list(&self) -> Vec<CacheEntry> {
        let slots: Vec<Arc<Slot>> = self
            .inner
            .entries
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect();
        let mut entries: Vec<CacheEntry> = slots.iter().map(|s| s.snapshot()).collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    /// Watch the status of the current slot for `id`.
    pub fn subscribe(&self, id: &CanonicalId) -> Result<watch::Receiver<SlotStatus>> {
        Ok(self.slot(id)?.status.subscribe())
    }

    /// Pending → Writing. Creates (truncates) the data file and returns it.
    pub fn mark_writing(&self, id: &CanonicalId, info: SourceInfo) -> Result<tokio::fs::File> {
        let slot = self.slot(id)?;
        let mut meta = slot.meta.lock();
        let current = slot.state();
        if current != EntryState::Pending {
            return Err(slot.invalid(&current, "writing"));
        }

        let file = std::fs::File::create(&slot.file_path)?;
        meta.info = info;
        slot.status.send_modify(|s| {
            s.state = EntryState::Writing;
            s.written = 0;
        });
        tracing::debug!(id = %id, path = %slot.file_path.display(), "entry writing");
        Ok(tokio::fs::File::from_std(file))
    }

    /// Publish that `written` bytes of a Writing entry are in the file.
    pub fn publish_progress(&self, id: &CanonicalId, written: u64) {
        if let Ok(slot) = self.slot(id) {
            slot.status.send_if_modified(|s| {
                if s.state == EntryState::Writing && written > s.written {
                    s.written = written;
                    true
                } else {
                    false
                }
            });
        }
    }

    /// Writing → Ready. Writes the sidecar before publishing the transition.
    pub fn mark_ready(&self, id: &CanonicalId, size: u64) -> Result<CacheEntry> {
        let slot = self.slot(id)?;
        let mut meta = slot.meta.lock();
        let current = slot.state();
        if current != EntryState::Writing {
            return Err(slot.invalid(&current, "ready"));
        }

        sidecar::write(
            &slot.sidecar_path,
            &Sidecar {
                id: slot.id.clone(),
                state: SidecarState::Ready,
                format: self.inner.format,
                size,
                created_at: slot.created_at,
                info: meta.info.clone(),
            },
        )?;

        meta.last_accessed_at = Utc::now();
        meta.last_access = Instant::now();
        slot.status.send_modify(|s| {
            s.state = EntryState::Ready;
            s.written = size;
        });
        tracing::info!(id = %id, size, "entry ready");
        let status = slot.status.borrow().clone();
        Ok(slot.snapshot_with(status, &meta))
    }

    /// Pending/Writing → Failed. Deletes any partial file.
    pub fn mark_failed(&self, id: &CanonicalId, error: MediaError) -> Result<CacheEntry> {
        let slot = self.slot(id)?;
        let mut meta = slot.meta.lock();
        let current = slot.state();
        if current.is_terminal() {
            return Err(slot.invalid(&current, "failed"));
        }

        slot.delete_files();
        let policy = &self.inner.policy;
        let ttl = error.negative_ttl(policy.negative_ttl, policy.rate_limit_backoff);
        meta.retry_at = Some(Instant::now() + ttl);
        tracing::debug!(id = %id, kind = error.code(), ttl = ?ttl, "entry failed");
        slot.status.send_modify(|s| {
            s.state = EntryState::Failed(error);
        });
        let status = slot.status.borrow().clone();
        Ok(slot.snapshot_with(status, &meta))
    }

    /// Replace a Failed entry whose negative TTL has passed with a fresh
    /// Pending one.
    ///
    /// Returns the new entry to the single caller that performed the
    /// replacement; `None` to everyone else.
    pub fn recreate_if_failed(&self, id: &CanonicalId, now: Instant) -> Option<CacheEntry> {
        let mut current = self.inner.entries.get_mut(id)?;
        let expired = matches!(current.state(), EntryState::Failed(_))
            && current.meta.lock().retry_at.map_or(true, |t| now >= t);
        if !expired {
            return None;
        }

        let fresh = Arc::new(self.new_slot(id, EntryState::Pending, 0));
        *current.value_mut() = Arc::clone(&fresh);
        drop(current);
        tracing::debug!(id = %id, generation = fresh.generation, "recreated failed entry");
        Some(fresh.snapshot())
    }

    /// Register a reader on the generation described by `entry`.
    ///
    /// Fails with `NotFound` if that generation was evicted or replaced.
    pub fn open_handle(&self, entry: &CacheEntry) -> Result<StreamHandle> {
        let current = self
            .inner
            .entries
            .get(&entry.id)
            .ok_or(Error::Media(MediaError::NotFound))?;
        let slot = current.value();
        if slot.generation != entry.generation || slot.doomed.load(Ordering::SeqCst) {
            return Err(MediaError::NotFound.into());
        }
        if let EntryState::Failed(e) = slot.state() {
            return Err(e.into());
        }

        // Incremented under the shard read lock so eviction sees it.
        slot.readers.fetch_add(1, Ordering::SeqCst);
        let slot = Arc::clone(slot);
        drop(current);
        slot.touch();

        Ok(StreamHandle {
            slot,
            store: Arc::clone(&self.inner),
        })
    }

    /// Remove an entry and its files.
    ///
    /// Refused with `Busy` for Pending/Writing entries. With readers open the
    /// entry is flagged and removed when the last reader closes.
    pub fn evict(&self, id: &CanonicalId) -> Result<Eviction> {
        let mut outcome: Option<Result<Eviction>> = None;
        let removed = self.inner.entries.remove_if(id, |_, slot| {
            let state = slot.state();
            if !state.is_terminal() {
                outcome = Some(Err(Error::Busy(format!("{id} is {}", state.name()))));
                return false;
            }
            if slot.readers.load(Ordering::SeqCst) > 0 {
                slot.doomed.store(true, Ordering::SeqCst);
                outcome = Some(Ok(Eviction::Deferred));
                return false;
            }
            slot.delete_files();
            true
        });

        if removed.is_some() {
            tracing::debug!(id = %id, "evicted entry");
            return Ok(Eviction::Removed);
        }
        outcome.unwrap_or(Err(Error::Media(MediaError::NotFound)))
    }

    /// Drop expired failures, then evict Ready entries over the idle bound,
    /// then least recently used Ready entries until under the size bound.
    ///
    /// Pending and Writing entries are never touched.
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        let mut ready: Vec<(CanonicalId, Instant, u64)> = Vec::new();
        let mut expired: Vec<CanonicalId> = Vec::new();

        let slots: Vec<Arc<Slot>> = self
            .inner
            .entries
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect();
        for slot in slots {
            if slot.doomed.load(Ordering::SeqCst) {
                continue;
            }
            let status = slot.status.borrow().clone();
            let meta = slot.meta.lock();
            match status.state {
                EntryState::Ready => ready.push((slot.id.clone(), meta.last_access, status.written)),
                EntryState::Failed(_) if meta.retry_at.map_or(true, |t| now >= t) => {
                    expired.push(slot.id.clone())
                }
                _ => {}
            }
        }

        for id in expired {
            if self.evict(&id).is_ok() {
                report.expired_failures += 1;
            }
        }

        let policy = self.inner.policy;
        if let Some(max_idle) = policy.max_idle {
            ready.retain(|(id, last_access, size)| {
                if now.saturating_duration_since(*last_access) <= max_idle {
                    return true;
                }
                match self.evict(id) {
                    Ok(_) => {
                        report.evicted_idle += 1;
                        report.freed_bytes += size;
                        false
                    }
                    Err(_) => true,
                }
            });
        }

        if let Some(max_total) = policy.max_total_bytes {
            let mut total: u64 = ready.iter().map(|(_, _, size)| size).sum();
            ready.sort_by_key(|(_, last_access, _)| *last_access);
            for (id, _, size) in &ready {
                if total <= max_total {
                    break;
                }
                if self.evict(id).is_ok() {
                    report.evicted_size += 1;
                    report.freed_bytes += size;
                    total = total.saturating_sub(*size);
                }
            }
        }

        report
    }

    /// Number of entries, in any state.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }
}

/// An open reader on one generation of a cache entry.
///
/// While any handle is open the entry's files are not deleted.
pub struct StreamHandle {
    slot: Arc<Slot>,
    store: Arc<StoreInner>,
}

impl StreamHandle {
    pub fn id(&self) -> &CanonicalId {
        &self.slot.id
    }

    pub fn file_path(&self) -> &Path {
        &self.slot.file_path
    }

    pub fn status(&self) -> SlotStatus {
        self.slot.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SlotStatus> {
        self.slot.status.subscribe()
    }

    pub fn snapshot(&self) -> CacheEntry {
        self.slot.snapshot()
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.slot.id)
            .field("generation", &self.slot.generation)
            .finish()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        // Decrement under the shard read lock, pairing with `evict`.
        let last_of_doomed = match self.store.entries.get(&self.slot.id) {
            Some(current) if Arc::ptr_eq(current.value(), &self.slot) => {
                self.slot.readers.fetch_sub(1, Ordering::SeqCst) == 1
                    && self.slot.doomed.load(Ordering::SeqCst)
            }
            _ => {
                self.slot.readers.fetch_sub(1, Ordering::SeqCst);
                false
            }
        };
        if last_of_doomed {
            self.store.remove_if_released(&self.slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn id(s: &str) -> CanonicalId {
        CanonicalId::parse(s).unwrap()
    }

    fn store(dir: &Path) -> CacheStore {
        CacheStore::open(dir, TargetFormat::Dfpwm, CachePolicy::default()).unwrap()
    }

    async fn make_ready(store: &CacheStore, key: &CanonicalId, bytes: &[u8]) -> CacheEntry {
        store.lookup_or_create(key);
        let mut file = store.mark_writing(key, SourceInfo::default()).unwrap();
        file.write_all(bytes).await.unwrap();
        file.sync_data().await.unwrap();
        store.mark_ready(key, bytes.len() as u64).unwrap()
    }

    #[test]
    fn lookup_or_create_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let key = id("abc123");

        let (entry, created) = store.lookup_or_create(&key);
        assert!(created);
        assert_eq!(entry.state, EntryState::Pending);

        let (again, created) = store.lookup_or_create(&key);
        assert!(!created);
        assert_eq!(again.generation, entry.generation);
    }

    #[test]
    fn get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let err = store.get(&id("nope")).unwrap_err();
        assert_eq!(err.as_media(), Some(&MediaError::NotFound));
    }

    #[tokio::test]
    async fn full_lifecycle_writes_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let key = id("abc123");

        let entry = make_ready(&store, &key, b"hello world").await;
        assert_eq!(entry.state, EntryState::Ready);
        assert_eq!(entry.size, 11);
        assert!(dir.path().join("abc123.dfpwm").exists());
        assert!(dir.path().join("abc123.json").exists());
    }

    #[tokio::test]
    async fn illegal_transitions_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let key = id("abc123");
        make_ready(&store, &key, b"data").await;

        assert!(matches!(
            store.mark_writing(&key, SourceInfo::default()),
            Err(Error::InvalidTransition { from: "ready", to: "writing", .. })
        ));
        assert!(store.mark_failed(&key, MediaError::TranscodeFailed).is_err());

        let pending = id("other");
        store.lookup_or_create(&pending);
        assert!(store.mark_ready(&pending, 0).is_err());
    }

    #[tokio::test]
    async fn mark_failed_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let key = id("abc123");
        store.lookup_or_create(&key);
        let mut file = store.mark_writing(&key, SourceInfo::default()).unwrap();
        file.write_all(b"partial").await.unwrap();
        drop(file);

        let entry = store.mark_failed(&key, MediaError::TranscodeFailed).unwrap();
        assert_eq!(entry.failure(), Some(&MediaError::TranscodeFailed));
        assert!(!dir.path().join("abc123.dfpwm").exists());
    }

    #[test]
    fn negative_ttl_controls_recreation() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let key = id("abc123");
        store.lookup_or_create(&key);
        let failed = store.mark_failed(&key, MediaError::SourceUnavailable).unwrap();

        let now = Instant::now();
        assert!(!failed.failure_expired(now));
        assert!(store.recreate_if_failed(&key, now).is_none());

        let later = now + Duration::from_secs(3600);
        let fresh = store.recreate_if_failed(&key, later).unwrap();
        assert_eq!(fresh.state, EntryState::Pending);
        assert!(fresh.generation > failed.generation);
        // Only one caller wins.
        assert!(store.recreate_if_failed(&key, later).is_none());
    }

    #[test]
    fn transcode_failure_is_not_remembered() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let key = id("abc123");
        store.lookup_or_create(&key);
        let failed = store.mark_failed(&key, MediaError::TranscodeFailed).unwrap();
        assert!(failed.failure_expired(Instant::now()));
    }

    #[tokio::test]
    async fn evict_refuses_busy_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let key = id("abc123");
        store.lookup_or_create(&key);
        assert!(matches!(store.evict(&key), Err(Error::Busy(_))));

        let _file = store.mark_writing(&key, SourceInfo::default()).unwrap();
        assert!(matches!(store.evict(&key), Err(Error::Busy(_))));
        assert!(matches!(
            store.evict(&id("absent")),
            Err(Error::Media(MediaError::NotFound))
        ));
    }

    #[tokio::test]
    async fn eviction_is_deferred_while_reader_open() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let key = id("abc123");
        let entry = make_ready(&store, &key, b"0123456789").await;

        let handle = store.open_handle(&entry).unwrap();
        assert_eq!(store.evict(&key).unwrap(), Eviction::Deferred);
        assert!(handle.file_path().exists());

        // No new readers on a doomed entry.
        assert!(matches!(
            store.open_handle(&entry),
            Err(Error::Media(MediaError::NotFound))
        ));

        drop(handle);
        assert!(store.get(&key).is_err());
        assert!(!dir.path().join("abc123.dfpwm").exists());
        assert!(!dir.path().join("abc123.json").exists());
    }

    #[tokio::test]
    async fn stale_generation_cannot_be_opened() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let key = id("abc123");
        let old = make_ready(&store, &key, b"old").await;
        store.evict(&key).unwrap();
        make_ready(&store, &key, b"new!").await;

        assert!(store.open_handle(&old).is_err());
    }

    #[tokio::test]
    async fn restart_recovers_ready_and_discards_partials() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = store(dir.path());
            make_ready(&store, &id("done"), b"complete").await;
            store.lookup_or_create(&id("partial"));
            let mut file = store.mark_writing(&id("partial"), SourceInfo::default()).unwrap();
            file.write_all(b"half").await.unwrap();
        }
        std::fs::write(dir.path().join("orphan.json"), b"{not json").unwrap();
        std::fs::write(dir.path().join("stray.dfpwm"), b"x").unwrap();

        let store = store(dir.path());
        assert_eq!(store.len(), 1);
        let entry = store.get(&id("done")).unwrap();
        assert_eq!(entry.state, EntryState::Ready);
        assert_eq!(entry.size, 8);

        assert!(!dir.path().join("partial.dfpwm").exists());
        assert!(!dir.path().join("orphan.json").exists());
        assert!(!dir.path().join("stray.dfpwm").exists());
    }

    #[tokio::test]
    async fn restart_rejects_size_mismatch_and_other_format() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = store(dir.path());
            make_ready(&store, &id("grown"), b"1234").await;
            make_ready(&store, &id("keep"), b"5678").await;
        }
        std::fs::write(dir.path().join("grown.dfpwm"), b"123456").unwrap();

        let reopened = store(dir.path());
        assert!(reopened.get(&id("grown")).is_err());
        assert!(reopened.get(&id("keep")).is_ok());
        drop(reopened);

        let ogg = CacheStore::open(dir.path(), TargetFormat::Ogg, CachePolicy::default()).unwrap();
        assert!(ogg.is_empty());
    }

    #[tokio::test]
    async fn sweep_evicts_idle_and_over_budget() {
        let dir = tempfile::tempdir().unwrap();
        let policy = CachePolicy {
            max_idle: Some(Duration::from_secs(60)),
            max_total_bytes: Some(10),
            ..CachePolicy::default()
        };
        let store = CacheStore::open(dir.path(), TargetFormat::Dfpwm, policy).unwrap();

        make_ready(&store, &id("a"), b"123456").await;
        make_ready(&store, &id("b"), b"123456").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        // Accessing b makes a the least recently used.
        let b = store.get(&id("b")).unwrap();
        drop(store.open_handle(&b).unwrap());

        store.lookup_or_create(&id("w"));
        let _writing = store.mark_writing(&id("w"), SourceInfo::default()).unwrap();

        let report = store.sweep(Instant::now());
        assert_eq!(report.evicted_size, 1);
        assert!(store.get(&id("a")).is_err());
        assert!(store.get(&id("b")).is_ok());

        let report = store.sweep(Instant::now() + Duration::from_secs(3600));
        assert_eq!(report.evicted_idle, 1);
        assert!(store.get(&id("b")).is_err());
        // Writing entries are never swept.
        assert_eq!(store.get(&id("w")).unwrap().state, EntryState::Writing);
    }

    #[test]
    fn sweep_drops_expired_failures() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.lookup_or_create(&id("gone"));
        store.mark_failed(&id("gone"), MediaError::SourceUnavailable).unwrap();

        assert_eq!(store.sweep(Instant::now()).expired_failures, 0);
        let report = store.sweep(Instant::now() + Duration::from_secs(3600));
        assert_eq!(report.expired_failures, 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn progress_is_published_to_watchers() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let key = id("abc123");
        store.lookup_or_create(&key);
        let mut rx = store.subscribe(&key).unwrap();
        let _file = store.mark_writing(&key, SourceInfo::default()).unwrap();

        store.publish_progress(&key, 100);
        rx.changed().await.unwrap();
        let status = rx.borrow_and_update().clone();
        assert_eq!(status.state, EntryState::Writing);
        assert_eq!(status.written, 100);

        // Progress never goes backwards.
        store.publish_progress(&key, 50);
        assert_eq!(store.get(&key).unwrap().size, 100);
    }
}
