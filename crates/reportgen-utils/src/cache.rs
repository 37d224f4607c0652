//! Key/value content cache with TTL and in-memory fallback
//!
//! This module defines the generic store contract (`KvStore`) used for both cached
//! module content and task records, two concrete stores (`MemoryStore`,
//! `FileStore`), and `ContentCache`, which writes through to an in-process
//! memory layer and serves from it whenever the primary backend is unreachable.

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::atomic_write::write_file_atomic;
use crate::error::StoreError;

/// Generic key/value store with per-entry TTL.
///
/// No multi-key transactions are assumed. Implementations must make a single
/// `set` visible to every later `get` of the same key once it returns.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`; `ttl = None` keeps the entry until deleted.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Remove `key`, returning whether an entry existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Short backend identifier for logs
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Map size at which `set` first sweeps expired entries
const SWEEP_THRESHOLD: usize = 1024;

/// In-process store.
///
/// Entries expire lazily on access. Once the map grows past a threshold, `set`
/// also sweeps every expired entry, and the threshold doubles with the live
/// entry count so sweeps stay amortized.
#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    min_sweep: usize,
    sweep_at: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_sweep_threshold(SWEEP_THRESHOLD)
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that sweeps expired entries once it holds more than `threshold`
    #[must_use]
    pub fn with_sweep_threshold(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            entries: RwLock::new(HashMap::new()),
            min_sweep: threshold,
            sweep_at: AtomicUsize::new(threshold),
        }
    }

    /// Number of live (unexpired) entries
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .map(|entries| entries.values().filter(|e| !e.is_expired(now)).count())
            .unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live value with its remaining time to live
    fn entry(&self, key: &str) -> Result<Option<(String, Option<Duration>)>, StoreError> {
        let now = Instant::now();
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| {
                let remaining = e.expires_at.map(|at| at.saturating_duration_since(now));
                (e.value.clone(), remaining)
            }))
    }

    fn sweep(&self, entries: &mut HashMap<String, MemoryEntry>) {
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, e| !e.is_expired(now));
        let next = (entries.len() * 2).max(self.min_sweep);
        self.sweep_at.store(next, Ordering::Relaxed);
        debug!(
            removed = before - entries.len(),
            remaining = entries.len(),
            "Swept expired memory entries"
        );
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("memory store lock poisoned".to_string())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().map_err(|_| Self::poisoned())?;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }
        // Expired: drop it under the write lock
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let entry = MemoryEntry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.insert(key.to_string(), entry);
        if entries.len() > self.sweep_at.load(Ordering::Relaxed) {
            self.sweep(&mut entries);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let removed = self
            .entries
            .write()
            .map_err(|_| Self::poisoned())?
            .remove(key);
        Ok(removed.is_some_and(|e| !e.is_expired(Instant::now())))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// On-disk record written by `FileStore`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileEnvelope {
    key: String,
    value: String,
    stored_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

/// Directory-backed store: one JSON envelope per key, named by the BLAKE3 hash of
/// the key, written atomically.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: Utf8PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<Utf8PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            StoreError::Unavailable(format!("cannot create store directory {dir}: {e}"))
        })?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> Utf8PathBuf {
        let digest = blake3::hash(key.as_bytes()).to_hex();
        self.dir.join(format!("{digest}.json"))
    }

    async fn read_envelope(&self, path: &Utf8Path) -> Result<Option<FileEnvelope>, StoreError> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e)),
        };
        match serde_json::from_slice::<FileEnvelope>(&raw) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(e) => {
                // Corrupted entry, remove it
                warn!(path = %path, error = %e, "Store entry corrupted, removing");
                let _ = tokio::fs::remove_file(path).await;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.entry_path(key);
        let Some(envelope) = self.read_envelope(&path).await? else {
            return Ok(None);
        };
        if envelope.expires_at.is_some_and(|at| at <= Utc::now()) {
            debug!(key = key, "Store entry expired");
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }
        Ok(Some(envelope.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let now = Utc::now();
        let expires_at = match ttl {
            Some(ttl) => Some(
                now + chrono::Duration::from_std(ttl)
                    .map_err(|e| StoreError::Serialization(format!("ttl out of range: {e}")))?,
            ),
            None => None,
        };
        let envelope = FileEnvelope {
            key: key.to_string(),
            value: value.to_string(),
            stored_at: now,
            expires_at,
        };
        let bytes = serde_json::to_vec(&envelope)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let path = self.entry_path(key);

        tokio::task::spawn_blocking(move || write_file_atomic(&path, &bytes))
            .await
            .map_err(|e| StoreError::Unavailable(format!("store writer task failed: {e}")))?
            .map_err(|e| StoreError::Unavailable(format!("{e:#}")))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        match tokio::fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Statistics for cache performance tracking
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub writes: usize,
    /// Operations served by the in-memory fallback because the primary failed
    pub fallbacks: usize,
}

impl CacheStats {
    /// Calculate cache hit ratio
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct AtomicStats {
    hits: AtomicUsize,
    misses: AtomicUsize,
    writes: AtomicUsize,
    fallbacks: AtomicUsize,
}

struct CacheInner {
    primary: Arc<dyn KvStore>,
    memory: MemoryStore,
    /// Keys whose primary copy is stale because a write or delete failed there
    stale: Mutex<HashSet<String>>,
    stats: AtomicStats,
}

/// Shared handle to the content cache.
///
/// Cloning is cheap; all clones share the same primary store, memory layer and
/// statistics. Every write goes to the primary and to the memory layer. A
/// primary failure is logged and the operation is served by the memory layer
/// instead of failing the caller. Keys written while the primary was failing
/// are read from memory, and pushed back to the primary once it accepts writes
/// again, so a recovered primary never shadows newer values with stale ones.
#[derive(Clone)]
pub struct ContentCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for ContentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentCache")
            .field("primary", &self.inner.primary.name())
            .field("stats", &self.stats())
            .finish()
    }
}

impl ContentCache {
    #[must_use]
    pub fn new(primary: Arc<dyn KvStore>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                primary,
                memory: MemoryStore::new(),
                stale: Mutex::new(HashSet::new()),
                stats: AtomicStats::default(),
            }),
        }
    }

    /// A cache whose primary is itself an in-process memory store
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Name of the primary backend
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.inner.primary.name()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let s = &self.inner.stats;
        CacheStats {
            hits: s.hits.load(Ordering::Relaxed),
            misses: s.misses.load(Ordering::Relaxed),
            writes: s.writes.load(Ordering::Relaxed),
            fallbacks: s.fallbacks.load(Ordering::Relaxed),
        }
    }

    fn note_fallback(&self, op: &str, key: &str, err: &StoreError) {
        self.inner.stats.fallbacks.fetch_add(1, Ordering::Relaxed);
        warn!(
            backend = self.inner.primary.name(),
            op = op,
            key = key,
            error = %err,
            "Primary store failed, using in-memory fallback"
        );
    }

    fn is_stale(&self, key: &str) -> bool {
        self.inner
            .stale
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
    }

    fn mark_stale(&self, key: &str, stale: bool) {
        let mut keys = self.inner.stale.lock().unwrap_or_else(|e| e.into_inner());
        if stale {
            keys.insert(key.to_string());
        } else {
            keys.remove(key);
        }
    }

    /// Serve a stale key from memory and try to bring the primary up to date
    async fn reconcile(&self, key: &str) -> Result<Option<String>, StoreError> {
        let current = self.inner.memory.entry(key)?;
        let pushed = match &current {
            Some((value, ttl)) => self.inner.primary.set(key, value, *ttl).await,
            None => self.inner.primary.delete(key).await.map(|_| ()),
        };
        match pushed {
            Ok(()) => {
                self.mark_stale(key, false);
                debug!(key = key, "Primary store caught up after outage");
            }
            Err(e) => self.note_fallback("reconcile", key, &e),
        }
        Ok(current.map(|(value, _)| value))
    }

    async fn lookup(&self, key: &str) -> Result<Option<String>, StoreError> {
        if self.is_stale(key) {
            return self.reconcile(key).await;
        }
        match self.inner.primary.get(key).await {
            Ok(found) => Ok(found),
            Err(e) => {
                self.note_fallback("get", key, &e);
                self.inner.memory.get(key).await
            }
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let found = self.lookup(key).await?;
        let counter = if found.is_some() {
            &self.inner.stats.hits
        } else {
            &self.inner.stats.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(found)
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let primary = self.inner.primary.set(key, value, ttl).await;
        self.inner.memory.set(key, value, ttl).await?;
        match primary {
            Ok(()) => self.mark_stale(key, false),
            Err(e) => {
                self.note_fallback("set", key, &e);
                self.mark_stale(key, true);
            }
        }
        self.inner.stats.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let in_memory = self.inner.memory.delete(key).await?;
        match self.inner.primary.delete(key).await {
            Ok(existed) => {
                self.mark_stale(key, false);
                Ok(existed || in_memory)
            }
            Err(e) => {
                self.note_fallback("delete", key, &e);
                // The primary copy must not reappear after recovery
                self.mark_stale(key, true);
                Ok(in_memory)
            }
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lookup(key).await?.is_some())
    }

    /// Read and decode a JSON value
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::Serialization(format!("{key}: {e}"))),
            None => Ok(None),
        }
    }

    /// Encode and store a JSON value
    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let raw =
            serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.set(key, &raw, ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Store that fails every operation, standing in for an unreachable backend
    struct DownStore;

    #[async_trait]
    impl KvStore for DownStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        async fn set(&self, _: &str, _: &str, _: Option<Duration>) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        fn name(&self) -> &'static str {
            "down"
        }
    }

    fn file_store() -> (TempDir, FileStore) {
        let temp = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp.path().join("store")).unwrap();
        let store = FileStore::open(dir).unwrap();
        (temp, store)
    }

    #[tokio::test]
    async fn test_memory_store_basic_operations() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(store.exists("k").await.unwrap());

        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_store_ttl_expiry() {
        let store = MemoryStore::new();
        store
            .set("short", "v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        store.set("long", "v", None).await.unwrap();
        assert_eq!(store.len(), 2);

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.get("short").await.unwrap(), None);
        assert_eq!(store.get("long").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_file_store_persists_across_instances() {
        let (_temp, store) = file_store();
        store.set("module:u1:intro", "hello", None).await.unwrap();

        let reopened = FileStore::open(store.dir().to_path_buf()).unwrap();
        assert_eq!(
            reopened.get("module:u1:intro").await.unwrap().as_deref(),
            Some("hello")
        );
        assert!(reopened.delete("module:u1:intro").await.unwrap());
        assert_eq!(reopened.get("module:u1:intro").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_expired_entry_is_removed() {
        let (_temp, store) = file_store();
        store
            .set("k", "v", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.entry_path("k").exists());
    }

    #[tokio::test]
    async fn test_file_store_corrupted_entry_reads_as_missing() {
        let (_temp, store) = file_store();
        std::fs::write(store.entry_path("k"), b"not json").unwrap();

        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.entry_path("k").exists());
    }

    #[tokio::test]
    async fn test_content_cache_degrades_to_fallback() {
        let cache = ContentCache::new(Arc::new(DownStore));

        cache.set("k", "v", None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(cache.exists("k").await.unwrap());
        assert!(cache.delete("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);

        let stats = cache.stats();
        assert!(stats.fallbacks >= 4);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    /// Memory-backed store that can be switched off and on
    #[derive(Default)]
    struct Switchable {
        inner: MemoryStore,
        down: std::sync::atomic::AtomicBool,
    }

    impl Switchable {
        fn set_down(&self, down: bool) {
            self.down.store(down, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), StoreError> {
            if self.down.load(Ordering::SeqCst) {
                Err(StoreError::Unavailable("connection reset".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl KvStore for Switchable {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.check()?;
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
            self.check()?;
            self.inner.set(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<bool, StoreError> {
            self.check()?;
            self.inner.delete(key).await
        }
        fn name(&self) -> &'static str {
            "switchable"
        }
    }

    #[tokio::test]
    async fn test_values_written_before_outage_stay_readable() {
        let primary = Arc::new(Switchable::default());
        let cache = ContentCache::new(primary.clone());
        cache.set("task", "v1", None).await.unwrap();

        primary.set_down(true);
        assert_eq!(cache.get("task").await.unwrap().as_deref(), Some("v1"));
        cache.set("task", "v2", None).await.unwrap();
        assert_eq!(cache.get("task").await.unwrap().as_deref(), Some("v2"));

        primary.set_down(false);
        // The stale primary copy must not win after recovery
        assert_eq!(cache.get("task").await.unwrap().as_deref(), Some("v2"));
        assert_eq!(primary.inner.get("task").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_delete_during_outage_is_not_undone_by_recovery() {
        let primary = Arc::new(Switchable::default());
        let cache = ContentCache::new(primary.clone());
        cache.set("task", "v1", None).await.unwrap();

        primary.set_down(true);
        assert!(cache.delete("task").await.unwrap());
        primary.set_down(false);

        assert_eq!(cache.get("task").await.unwrap(), None);
        assert_eq!(primary.inner.get("task").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_store_sweeps_expired_entries_on_set() {
        let store = MemoryStore::with_sweep_threshold(4);
        for i in 0..4 {
            store
                .set(&format!("short{i}"), "v", Some(Duration::from_millis(10)))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Never read again, so only a sweep can drop them
        store.set("long", "v", None).await.unwrap();
        assert_eq!(store.entries.read().unwrap().len(), 1);
        assert_eq!(store.get("long").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_content_cache_json_helpers() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Payload {
            content: String,
            tokens: u32,
        }

        let cache = ContentCache::in_memory();
        let payload = Payload {
            content: "text".to_string(),
            tokens: 12,
        };
        cache.set_json("p", &payload, None).await.unwrap();

        let loaded: Option<Payload> = cache.get_json("p").await.unwrap();
        assert_eq!(loaded, Some(payload));

        cache.set("bad", "{", None).await.unwrap();
        let err = cache.get_json::<Payload>("bad").await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[test]
    fn test_hit_ratio() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..CacheStats::default()
        };
        assert!((stats.hit_ratio() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_ratio(), 0.0);
    }
}
