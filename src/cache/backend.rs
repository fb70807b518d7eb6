//! Cache Backend
//!
//! Orchestrates the L1 (memory) and L2 (disk) tiers behind one API.
//!
//! # Design
//!
//! - Reads check L1, then L2; an L2 hit is written back into L1 with its
//!   remaining TTL and tag
//! - Writes go to every configured tier with a TTL chosen by [`DataType`]
//! - Every tier call is timed into [`CacheMetrics`]; tier errors become
//!   error counts and a "no effect" result, never a caller-visible error
//! - A disabled or closed backend answers every call with a miss/false
//! - Per-key operations hold one of [`KEY_LOCK_STRIPES`] striped locks, so
//!   an L2 promotion can never overwrite a concurrent `set` or `delete`;
//!   `clear` and `evict` hold every stripe

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::key::KeyNormalizer;
use super::l1::MemoryStore;
use super::l2::{DiskStore, L2Config};
use super::metrics::{CacheMetrics, LatencyTracker, MetricsSnapshot, Operation, TierSnapshot};
use super::tier::{CacheTier, TierStats, TierStore};
use crate::config::{CacheConfig, DataType};
use crate::error::Result;

/// Prefix used by [`CacheBackend::normalize_query_key`] when none is given
pub const DEFAULT_QUERY_PREFIX: &str = "query";

/// Number of per-key lock stripes (power of two)
pub const KEY_LOCK_STRIPES: usize = 64;

/// One tier's counters and store statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerStats {
    pub metrics: TierSnapshot,
    pub store: TierStats,
}

/// Per-tier breakdown
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Layers {
    pub l1: LayerStats,
    /// `None` when the backend runs without a disk tier
    pub l2: Option<LayerStats>,
}

/// Backend-wide rates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverallStats {
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub error_rate: f64,
}

/// Result of [`CacheBackend::get_stats`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub layers: Layers,
    pub overall: OverallStats,
}

/// Two-tier cache with metrics
pub struct CacheBackend {
    config: CacheConfig,
    l1: Box<dyn TierStore>,
    l2: Option<Box<dyn TierStore>>,
    metrics: Arc<CacheMetrics>,
    closed: AtomicBool,
    key_locks: Box<[Mutex<()>]>,
}

impl std::fmt::Debug for CacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheBackend")
            .field("enabled", &self.config.enabled)
            .field("cache_dir", &self.config.cache_dir)
            .field("l2", &self.l2.is_some())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl CacheBackend {
    /// Open a backend for `config`
    ///
    /// If the disk tier cannot be opened the backend keeps running with
    /// the memory tier only.
    pub fn open(config: CacheConfig) -> Self {
        let l1 = Box::new(MemoryStore::with_capacity(config.l1_max_entries));

        let l2: Option<Box<dyn TierStore>> = if config.enabled && config.l2_enabled {
            let l2_config = L2Config {
                cache_dir: config.cache_dir.clone(),
                size_limit_bytes: config.size_limit_bytes(),
                ..Default::default()
            };
            match DiskStore::open(l2_config) {
                Ok(store) => {
                    info!(
                        "Opened disk cache at {} (limit {} MB)",
                        store.path().display(),
                        config.size_limit_mb
                    );
                    Some(Box::new(store))
                }
                Err(e) => {
                    error!(
                        "Failed to open disk cache in {}, continuing memory-only: {}",
                        config.cache_dir.display(),
                        e
                    );
                    None
                }
            }
        } else {
            None
        };

        Self::with_tiers(config, l1, l2)
    }

    /// Backend with the memory tier only
    pub fn in_memory(config: CacheConfig) -> Self {
        let l1 = Box::new(MemoryStore::with_capacity(config.l1_max_entries));
        Self::with_tiers(config, l1, None)
    }

    /// Backend that never stores anything
    pub fn disabled() -> Self {
        Self::in_memory(CacheConfig::disabled())
    }

    /// Backend over caller-supplied tiers
    pub fn with_tiers(
        config: CacheConfig,
        l1: Box<dyn TierStore>,
        l2: Option<Box<dyn TierStore>>,
    ) -> Self {
        Self {
            config,
            l1,
            l2,
            metrics: Arc::new(CacheMetrics::new()),
            closed: AtomicBool::new(false),
            key_locks: (0..KEY_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Whether operations currently have any effect
    pub fn is_enabled(&self) -> bool {
        self.config.enabled && !self.closed.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Shared metrics registry
    pub fn metrics(&self) -> Arc<CacheMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn has_l2(&self) -> bool {
        self.l2.is_some()
    }

    /// Run one tier call, recording latency and converting errors
    fn call<T>(
        &self,
        store: &dyn TierStore,
        op: Operation,
        key: &str,
        f: impl FnOnce(&dyn TierStore) -> Result<T>,
    ) -> Option<T> {
        let tracker = LatencyTracker::start();
        let result = f(store);
        self.metrics
            .record_latency(store.tier(), op, tracker.elapsed());

        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.metrics.record_error(store.tier());
                warn!("{} {} failed for '{}': {}", store.tier(), op.label(), key, e);
                None
            }
        }
    }

    /// Stripe guarding `key`
    fn lock_key(&self, key: &str) -> MutexGuard<'_, ()> {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        self.key_locks[(hasher.finish() as usize) & (KEY_LOCK_STRIPES - 1)].lock()
    }

    /// Every stripe, in index order
    fn lock_all_keys(&self) -> Vec<MutexGuard<'_, ()>> {
        self.key_locks.iter().map(|lock| lock.lock()).collect()
    }

    fn tiers(&self) -> Vec<&dyn TierStore> {
        let mut tiers: Vec<&dyn TierStore> = vec![self.l1.as_ref()];
        if let Some(l2) = self.l2.as_deref() {
            tiers.push(l2);
        }
        tiers
    }

    // =========================================================================
    // Read path
    // =========================================================================

    /// Look up a value, checking L1 then L2
    pub fn get(&self, key: &str) -> Option<Bytes> {
        if !self.is_enabled() {
            return None;
        }
        self.metrics.record_request();
        let _guard = self.lock_key(key);

        if let Some(found) = self.call(self.l1.as_ref(), Operation::Get, key, |s| s.get(key)) {
            match found {
                Some(value) => {
                    self.metrics.record_tier_hit(CacheTier::L1);
                    debug!("Cache hit (L1): {}", key);
                    return Some(value);
                }
                None => self.metrics.record_tier_miss(CacheTier::L1),
            }
        }

        if let Some(l2) = self.l2.as_deref() {
            if let Some(found) = self.call(l2, Operation::Get, key, |s| s.lookup(key)) {
                match found {
                    Some(stored) => {
                        self.metrics.record_tier_hit(CacheTier::L2);
                        debug!("Cache hit (L2): {}", key);

                        // A zero TTL would mean "never expires" to the tier
                        if stored.ttl != Some(Duration::ZERO) {
                            let value = stored.value.clone();
                            self.call(self.l1.as_ref(), Operation::Set, key, |s| {
                                s.set(key, value, stored.ttl, stored.tag.as_deref())
                            });
                        }
                        return Some(stored.value);
                    }
                    None => self.metrics.record_tier_miss(CacheTier::L2),
                }
            }
        }

        self.metrics.record_miss();
        debug!("Cache miss: {}", key);
        None
    }

    /// Look up and deserialize a JSON value
    ///
    /// A value that no longer deserializes is dropped and reported as a miss.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match serde_json::from_slice(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Dropping undecodable cache entry '{}': {}", key, e);
                self.delete(key);
                None
            }
        }
    }

    /// Whether a live entry exists, without touching metrics
    pub fn contains(&self, key: &str) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.tiers()
            .into_iter()
            .any(|store| matches!(store.get(key), Ok(Some(_))))
    }

    // =========================================================================
    // Write path
    // =========================================================================

    /// Store a value with the TTL configured for `data_type`
    pub fn set(
        &self,
        key: &str,
        value: impl Into<Bytes>,
        data_type: Option<DataType>,
        tag: Option<&str>,
    ) -> bool {
        let ttl = self.config.ttl_for(data_type);
        self.set_with_ttl(key, value, ttl, tag)
    }

    /// Store a value with an explicit TTL (zero = no expiry)
    pub fn set_with_ttl(
        &self,
        key: &str,
        value: impl Into<Bytes>,
        ttl: Duration,
        tag: Option<&str>,
    ) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let value = value.into();
        let mut written = false;
        let _guard = self.lock_key(key);

        for store in self.tiers() {
            let value = value.clone();
            let stored = self.call(store, Operation::Set, key, |s| {
                s.set(key, value, Some(ttl), tag)
            });
            if stored == Some(true) {
                self.metrics.record_set(store.tier());
                written = true;
            }
        }

        if written {
            debug!("Cached {} ({} bytes, ttl {:?})", key, value.len(), ttl);
        }
        written
    }

    /// Serialize and store a JSON value
    pub fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        data_type: Option<DataType>,
        tag: Option<&str>,
    ) -> bool {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.set(key, bytes, data_type, tag),
            Err(e) => {
                warn!("Failed to serialize cache value for '{}': {}", key, e);
                false
            }
        }
    }

    /// Remove a key from every tier; returns whether any tier held it
    pub fn delete(&self, key: &str) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let mut existed = false;
        let _guard = self.lock_key(key);
        for store in self.tiers() {
            if self.call(store, Operation::Delete, key, |s| s.delete(key)) == Some(true) {
                self.metrics.record_delete(store.tier());
                existed = true;
            }
        }
        existed
    }

    /// Remove every entry from every tier
    pub fn clear(&self) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let mut ok = true;
        let _guards = self.lock_all_keys();
        for store in self.tiers() {
            ok &= self.call(store, Operation::Clear, "*", |s| s.clear()) == Some(true);
        }
        info!("Cache cleared");
        ok
    }

    /// Remove every entry written with `tag`
    ///
    /// Returns the largest count removed from a single tier, since a
    /// written-through entry lives in both tiers.
    pub fn evict(&self, tag: &str) -> usize {
        if !self.is_enabled() {
            return 0;
        }
        let mut evicted = 0;
        let _guards = self.lock_all_keys();
        for store in self.tiers() {
            if let Some(count) = self.call(store, Operation::Evict, tag, |s| s.evict(tag)) {
                self.metrics.record_evictions(store.tier(), count as u64);
                evicted = evicted.max(count);
            }
        }
        info!("Evicted {} entries tagged '{}'", evicted, tag);
        evicted
    }

    /// Drop expired entries from every tier; returns the total removed
    pub fn purge_expired(&self) -> usize {
        if !self.is_enabled() {
            return 0;
        }
        let mut purged = 0;
        for store in self.tiers() {
            let tracker = LatencyTracker::start();
            match store.purge_expired() {
                Ok(count) => purged += count,
                Err(e) => {
                    self.metrics.record_error(store.tier());
                    warn!("{} purge failed: {}", store.tier(), e);
                }
            }
            debug!("{} purge took {:?}", store.tier(), tracker.elapsed());
        }
        purged
    }

    // =========================================================================
    // Keys & stats
    // =========================================================================

    /// Build a cache key for a search query and its parameters
    ///
    /// The query is text-normalized and case-folded; `params` follow the
    /// [`KeyNormalizer`] rules. A non-object `params` is keyed as `params`.
    pub fn normalize_query_key(query: &str, prefix: Option<&str>, params: &Value) -> String {
        let mut map = match params {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("params".to_string(), other.clone());
                map
            }
        };

        match KeyNormalizer::normalize_query(query) {
            Some(query) => map.insert("query".to_string(), Value::String(query)),
            None => map.remove("query"),
        };

        KeyNormalizer::normalize(prefix.unwrap_or(DEFAULT_QUERY_PREFIX), &Value::Object(map))
    }

    /// Hit/miss rates and per-tier breakdowns, computed from counters
    pub fn get_stats(&self) -> CacheStats {
        let snapshot: MetricsSnapshot = self.metrics.snapshot();

        CacheStats {
            enabled: self.is_enabled(),
            layers: Layers {
                l1: LayerStats {
                    metrics: snapshot.l1,
                    store: self.l1.stats(),
                },
                l2: self.l2.as_ref().map(|l2| LayerStats {
                    metrics: snapshot.l2,
                    store: l2.stats(),
                }),
            },
            overall: OverallStats {
                requests: snapshot.requests,
                hits: snapshot.hits,
                misses: snapshot.misses,
                errors: snapshot.errors,
                hit_rate: snapshot.hit_rate,
                miss_rate: snapshot.miss_rate,
                error_rate: snapshot.error_rate,
            },
        }
    }

    /// Fraction of the disk size limit in use, if a disk tier is present
    pub fn l2_disk_usage(&self) -> Option<f64> {
        let l2 = self.l2.as_ref()?;
        let limit = self.config.size_limit_bytes();
        if limit == 0 {
            return None;
        }
        Some(l2.stats().size_bytes as f64 / limit as f64)
    }

    /// Release the tiers; later operations behave as disabled
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for store in self.tiers() {
            if let Err(e) = store.close() {
                warn!("Failed to close {}: {}", store.tier(), e);
            }
        }
        info!("Cache backend closed");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tier::StoredValue;
    use crate::error::Error;
    use serde_json::json;
    use tempfile::TempDir;

    /// Tier whose every operation fails
    struct FailingStore;

    impl TierStore for FailingStore {
        fn tier(&self) -> CacheTier {
            CacheTier::L2
        }
        fn lookup(&self, _key: &str) -> Result<Option<StoredValue>> {
            Err(Error::Internal("disk on fire".into()))
        }
        fn set(&self, _: &str, _: Bytes, _: Option<Duration>, _: Option<&str>) -> Result<bool> {
            Err(Error::Internal("disk on fire".into()))
        }
        fn delete(&self, _key: &str) -> Result<bool> {
            Err(Error::Internal("disk on fire".into()))
        }
        fn clear(&self) -> Result<bool> {
            Err(Error::Internal("disk on fire".into()))
        }
        fn evict(&self, _tag: &str) -> Result<usize> {
            Err(Error::Internal("disk on fire".into()))
        }
        fn purge_expired(&self) -> Result<usize> {
            Err(Error::Internal("disk on fire".into()))
        }
        fn stats(&self) -> TierStats {
            TierStats::default()
        }
    }

    /// L2 tier whose first lookup pauses until released
    struct GatedStore {
        inner: MemoryStore,
        gate_armed: AtomicBool,
        entered: std::sync::Mutex<std::sync::mpsc::Sender<()>>,
        release: std::sync::Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl TierStore for GatedStore {
        fn tier(&self) -> CacheTier {
            CacheTier::L2
        }
        fn lookup(&self, key: &str) -> Result<Option<StoredValue>> {
            let found = self.inner.lookup(key)?;
            if self.gate_armed.swap(false, Ordering::SeqCst) {
                self.entered.lock().unwrap().send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
            }
            Ok(found)
        }
        fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>, tag: Option<&str>) -> Result<bool> {
            self.inner.set(key, value, ttl, tag)
        }
        fn delete(&self, key: &str) -> Result<bool> {
            self.inner.delete(key)
        }
        fn clear(&self) -> Result<bool> {
            self.inner.clear()
        }
        fn evict(&self, tag: &str) -> Result<usize> {
            self.inner.evict(tag)
        }
        fn purge_expired(&self) -> Result<usize> {
            self.inner.purge_expired()
        }
        fn stats(&self) -> TierStats {
            self.inner.stats()
        }
    }

    fn disk_config(dir: &TempDir) -> CacheConfig {
        CacheConfig::with_cache_dir(dir.path())
    }

    #[test]
    fn test_round_trip() {
        let backend = CacheBackend::in_memory(CacheConfig::default());
        assert!(backend.set("k", "v", Some(DataType::Search), None));
        assert_eq!(backend.get("k"), Some(Bytes::from_static(b"v")));
        assert_eq!(backend.get("missing"), None);

        let stats = backend.get_stats();
        assert_eq!(stats.overall.requests, 2);
        assert_eq!(stats.overall.hits, 1);
        assert_eq!(stats.overall.misses, 1);
        assert!((stats.overall.hit_rate - 0.5).abs() < f64::EPSILON);
        assert!(stats.layers.l2.is_none());
    }

    #[test]
    fn test_disabled_is_noop() {
        let backend = CacheBackend::disabled();
        assert!(!backend.set("k", "v", None, None));
        assert_eq!(backend.get("k"), None);
        assert!(!backend.delete("k"));
        assert!(!backend.clear());
        assert_eq!(backend.evict("t"), 0);
        assert!(!backend.get_stats().enabled);
        assert_eq!(backend.metrics().requests(), 0);
    }

    #[test]
    fn test_write_through_and_promotion() {
        let dir = TempDir::new().unwrap();
        let config = disk_config(&dir);

        // Seed the disk tier before the backend sees it
        let disk = DiskStore::open(L2Config {
            cache_dir: dir.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap();
        disk.set("k", Bytes::from_static(b"v"), Some(Duration::from_secs(60)), Some("t"))
            .unwrap();

        let backend = CacheBackend::with_tiers(
            config,
            Box::new(MemoryStore::new()),
            Some(Box::new(disk)),
        );

        assert_eq!(backend.get("k"), Some(Bytes::from_static(b"v")));
        let metrics = backend.metrics();
        assert_eq!(metrics.tier_hits(CacheTier::L2), 1);

        assert_eq!(backend.get("k"), Some(Bytes::from_static(b"v")));
        assert_eq!(metrics.tier_hits(CacheTier::L1), 1);
        assert_eq!(metrics.tier_hits(CacheTier::L2), 1);

        // The promoted copy kept its tag
        assert_eq!(backend.evict("t"), 1);
        assert_eq!(backend.get("k"), None);
    }

    #[test]
    fn test_set_writes_both_tiers() {
        let dir = TempDir::new().unwrap();
        let backend = CacheBackend::open(disk_config(&dir));
        assert!(backend.has_l2());

        assert!(backend.set("k", "v", None, None));
        let metrics = backend.metrics();
        assert_eq!(metrics.tier_sets(CacheTier::L1), 1);
        assert_eq!(metrics.tier_sets(CacheTier::L2), 1);

        let stats = backend.get_stats();
        assert_eq!(stats.layers.l1.store.entries, 1);
        assert_eq!(stats.layers.l2.unwrap().store.entries, 1);
        assert!(backend.l2_disk_usage().unwrap() > 0.0);
    }

    #[test]
    fn test_tier_errors_are_swallowed() {
        let backend = CacheBackend::with_tiers(
            CacheConfig::default(),
            Box::new(MemoryStore::new()),
            Some(Box::new(FailingStore)),
        );

        // L1 still accepts the write
        assert!(backend.set("k", "v", None, None));
        assert_eq!(backend.get("k"), Some(Bytes::from_static(b"v")));
        assert_eq!(backend.get("other"), None);
        assert!(!backend.clear());

        let metrics = backend.metrics();
        assert_eq!(metrics.tier_errors(CacheTier::L2), 3);
        assert!(metrics.error_rate() > 0.0);
    }

    #[test]
    fn test_all_tiers_failing() {
        let backend = CacheBackend::with_tiers(
            CacheConfig::default(),
            Box::new(FailingStore),
            None,
        );
        assert!(!backend.set("k", "v", None, None));
        assert_eq!(backend.get("k"), None);
        assert_eq!(backend.evict("t"), 0);
        assert_eq!(backend.metrics().misses(), 1);
    }

    #[test]
    fn test_evict_by_tag() {
        let backend = CacheBackend::in_memory(CacheConfig::default());
        backend.set("k1", "1", None, Some("T"));
        backend.set("k2", "2", None, Some("T"));
        backend.set("k3", "3", None, Some("U"));

        assert_eq!(backend.evict("T"), 2);
        assert!(!backend.contains("k1"));
        assert!(!backend.contains("k2"));
        assert!(backend.contains("k3"));
        assert_eq!(backend.metrics().tier_evictions(CacheTier::L1), 2);
    }

    #[test]
    fn test_data_type_ttl() {
        let mut config = CacheConfig::default();
        config.ttl_by_type.insert(DataType::Search, 1);
        let backend = CacheBackend::in_memory(config);

        backend.set_with_ttl("short", "v", Duration::from_millis(20), None);
        backend.set("search", "v", Some(DataType::Search), None);
        backend.set("record", "v", Some(DataType::Record), None);
        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(backend.get("short"), None);
        assert!(backend.contains("search"));
        assert!(backend.contains("record"));
    }

    #[test]
    fn test_json_helpers() {
        let backend = CacheBackend::in_memory(CacheConfig::default());
        let value = json!({"hitCount": 3, "ids": ["a", "b"]});
        assert!(backend.set_json("k", &value, Some(DataType::Search), None));
        assert_eq!(backend.get_json::<Value>("k"), Some(value));

        backend.set("broken", "not json", None, None);
        assert_eq!(backend.get_json::<Value>("broken"), None);
        assert!(!backend.contains("broken"));
    }

    #[test]
    fn test_normalize_query_key() {
        let params = json!({"page_size": 25});
        let a = CacheBackend::normalize_query_key("  Malaria  VACCINE ", None, &params);
        let b = CacheBackend::normalize_query_key("malaria vaccine", None, &params);
        let c =
            CacheBackend::normalize_query_key("malaria vaccine", None, &json!({"page_size": 100}));
        let d = CacheBackend::normalize_query_key("malaria vaccine", Some("search"), &params);

        assert_eq!(a, b);
        assert_ne!(b, c);
        assert_ne!(b, d);
        assert!(a.starts_with("query:"));
        assert!(d.starts_with("search:"));
    }

    #[test]
    fn test_close_disables() {
        let dir = TempDir::new().unwrap();
        let backend = CacheBackend::open(disk_config(&dir));
        backend.set("k", "v", None, None);
        backend.close();
        backend.close();

        assert!(!backend.is_enabled());
        assert_eq!(backend.get("k"), None);
        assert!(!backend.set("k", "v", None, None));
    }

    #[test]
    fn test_open_degrades_without_disk() {
        let dir = TempDir::new().unwrap();
        // A file where the cache directory should be
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"x").unwrap();

        let backend = CacheBackend::open(CacheConfig::with_cache_dir(&blocker));
        assert!(!backend.has_l2());
        assert!(backend.set("k", "v", None, None));
        assert!(backend.contains("k"));
    }

    fn paused_backend() -> (
        Arc<CacheBackend>,
        std::sync::mpsc::Receiver<()>,
        std::sync::mpsc::Sender<()>,
    ) {
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let l2 = GatedStore {
            inner: MemoryStore::new(),
            gate_armed: AtomicBool::new(false),
            entered: std::sync::Mutex::new(entered_tx),
            release: std::sync::Mutex::new(release_rx),
        };
        l2.set("k", Bytes::from_static(b"old"), Some(Duration::from_secs(3600)), None)
            .unwrap();
        l2.gate_armed.store(true, Ordering::SeqCst);

        let backend = Arc::new(CacheBackend::with_tiers(
            CacheConfig::default(),
            Box::new(MemoryStore::new()),
            Some(Box::new(l2)),
        ));
        (backend, entered_rx, release_tx)
    }

    fn race_promotion(write: impl FnOnce(&CacheBackend) + Send + 'static) -> Arc<CacheBackend> {
        let (backend, entered, release) = paused_backend();

        let reader = {
            let backend = Arc::clone(&backend);
            std::thread::spawn(move || backend.get("k"))
        };
        // The reader has fetched "old" from L2 and not yet promoted it
        entered.recv().unwrap();

        let writer = {
            let backend = Arc::clone(&backend);
            std::thread::spawn(move || write(&*backend))
        };
        std::thread::sleep(Duration::from_millis(50));
        release.send(()).unwrap();

        assert_eq!(reader.join().unwrap(), Some(Bytes::from_static(b"old")));
        writer.join().unwrap();
        backend
    }

    #[test]
    fn test_promotion_does_not_overwrite_concurrent_set() {
        let backend = race_promotion(|backend| {
            assert!(backend.set("k", "new", None, None));
        });
        assert_eq!(backend.get("k"), Some(Bytes::from_static(b"new")));
    }

    #[test]
    fn test_promotion_does_not_resurrect_concurrent_delete() {
        let backend = race_promotion(|backend| {
            assert!(backend.delete("k"));
        });
        assert_eq!(backend.get("k"), None);
    }
}
