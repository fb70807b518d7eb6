//! L1 Cache - In-Memory Hot Tier
//!
//! Bounded, process-local store with TTL expiry.
//!
//! # Design
//!
//! - `DashMap` sharding for low lock contention across request threads
//! - Expired entries are dropped on read and before capacity eviction
//! - When full, evicts a batch of entries ranked by recency/frequency score

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;

use super::entry::{now_millis, CacheEntry};
use super::tier::{CacheTier, StoredValue, TierStats, TierStore};
use crate::config::DEFAULT_L1_MAX_ENTRIES;
use crate::error::Result;

/// L1 Cache configuration
#[derive(Debug, Clone)]
pub struct L1Config {
    /// Maximum number of entries
    pub max_entries: usize,
    /// Fraction of capacity evicted in one pass once full
    pub eviction_batch_ratio: f64,
}

impl Default for L1Config {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_L1_MAX_ENTRIES,
            eviction_batch_ratio: 0.10,
        }
    }
}

/// L1 Cache - in-memory hot tier
pub struct MemoryStore {
    /// Entry storage
    storage: DashMap<String, CacheEntry>,
    /// Configuration
    config: L1Config,
    /// Current size in bytes
    current_size: AtomicU64,
    /// Capacity eviction count
    evictions: AtomicU64,
}

impl MemoryStore {
    /// Create a new L1 store with default configuration
    pub fn new() -> Self {
        Self::with_config(L1Config::default())
    }

    /// Create a new L1 store with custom configuration
    pub fn with_config(config: L1Config) -> Self {
        Self {
            storage: DashMap::new(),
            config,
            current_size: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Create a store bounded to `max_entries`
    pub fn with_capacity(max_entries: usize) -> Self {
        Self::with_config(L1Config {
            max_entries,
            ..Default::default()
        })
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Check whether a live entry exists without touching access stats
    pub fn contains(&self, key: &str) -> bool {
        self.storage
            .get(key)
            .map(|e| !e.is_expired())
            .unwrap_or(false)
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.config.max_entries
    }

    fn remove_entry(&self, key: &str) -> Option<CacheEntry> {
        self.storage.remove(key).map(|(_, entry)| {
            self.release(entry.size());
            entry
        })
    }

    /// Subtract freed bytes, saturating at zero when racing `clear`
    fn release(&self, bytes: u64) {
        let _ = self
            .current_size
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |size| {
                Some(size.saturating_sub(bytes))
            });
    }

    /// Remove entries matching `predicate`, returning the count removed
    fn remove_where(&self, predicate: impl Fn(&CacheEntry) -> bool) -> usize {
        let mut removed = 0usize;
        let mut freed = 0u64;
        self.storage.retain(|_, entry| {
            if predicate(entry) {
                removed += 1;
                freed += entry.size();
                false
            } else {
                true
            }
        });
        self.release(freed);
        removed
    }

    /// Make room for one more entry
    fn evict_for_insert(&self) {
        let now = now_millis();
        self.remove_where(|e| e.metadata.is_expired_at(now));

        if self.storage.len() < self.config.max_entries {
            return;
        }

        let mut candidates: Vec<(String, f64)> = self
            .storage
            .iter()
            .map(|e| (e.key().clone(), e.value().metadata.eviction_score()))
            .collect();

        // Highest score first = most evictable
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let batch = ((self.config.max_entries as f64 * self.config.eviction_batch_ratio) as usize)
            .max(1);

        for (key, _) in candidates.into_iter().take(batch) {
            if self.remove_entry(&key).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TierStore for MemoryStore {
    fn tier(&self) -> CacheTier {
        CacheTier::L1
    }

    fn lookup(&self, key: &str) -> Result<Option<StoredValue>> {
        let found = self.storage.get(key).map(|guard| {
            let entry: &CacheEntry = guard.value();
            if entry.is_expired() {
                None
            } else {
                entry.record_access();
                Some(StoredValue {
                    value: entry.value().clone(),
                    ttl: entry.metadata.remaining_ttl(),
                    tag: entry.tag().map(str::to_owned),
                })
            }
        });

        match found {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                // Re-check under the write lock so a concurrent refresh survives
                if let Some((_, entry)) = self.storage.remove_if(key, |_, e| e.is_expired()) {
                    self.release(entry.size());
                }
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        tag: Option<&str>,
    ) -> Result<bool> {
        if !self.storage.contains_key(key) && self.storage.len() >= self.config.max_entries {
            self.evict_for_insert();
        }

        let entry = CacheEntry::new(value, ttl, tag);
        let size = entry.size();

        match self.storage.insert(key.to_string(), entry) {
            Some(old) => {
                let old_size = old.size();
                if size > old_size {
                    self.current_size.fetch_add(size - old_size, Ordering::Relaxed);
                } else {
                    self.release(old_size - size);
                }
            }
            None => {
                self.current_size.fetch_add(size, Ordering::Relaxed);
            }
        }

        Ok(true)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.remove_entry(key).is_some())
    }

    fn clear(&self) -> Result<bool> {
        self.storage.clear();
        self.current_size.store(0, Ordering::Relaxed);
        Ok(true)
    }

    fn evict(&self, tag: &str) -> Result<usize> {
        Ok(self.remove_where(|e| e.has_tag(tag)))
    }

    fn purge_expired(&self) -> Result<usize> {
        let now = now_millis();
        Ok(self.remove_where(|e| e.metadata.is_expired_at(now)))
    }

    fn stats(&self) -> TierStats {
        TierStats {
            entries: self.storage.len() as u64,
            size_bytes: self.current_size.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn value(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_set_get() {
        let store = MemoryStore::new();
        assert!(store.set("k", value("v"), None, None).unwrap());
        assert_eq!(store.get("k").unwrap(), Some(value("v")));
        assert_eq!(store.get("missing").unwrap(), None);
        assert_eq!(store.stats().size_bytes, 1);
    }

    #[test]
    fn test_lookup_carries_ttl_and_tag() {
        let store = MemoryStore::new();
        store
            .set("k", value("v"), Some(Duration::from_secs(60)), Some("t"))
            .unwrap();

        let stored = store.lookup("k").unwrap().unwrap();
        assert_eq!(stored.value, value("v"));
        assert_eq!(stored.tag.as_deref(), Some("t"));
        let ttl = stored.ttl.unwrap();
        assert!(ttl <= Duration::from_secs(60) && ttl > Duration::from_secs(55));
    }

    #[test]
    fn test_overwrite_tracks_size() {
        let store = MemoryStore::new();
        store.set("k", value("short"), None, None).unwrap();
        store.set("k", value("much longer"), None, None).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.stats().size_bytes, 11);

        store.set("k", value("x"), None, None).unwrap();
        assert_eq!(store.stats().size_bytes, 1);
    }

    #[test]
    fn test_expired_entry_is_miss_and_removed() {
        let store = MemoryStore::new();
        store
            .set("k", value("v"), Some(Duration::from_millis(20)), None)
            .unwrap();
        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(store.get("k").unwrap(), None);
        assert_eq!(store.len(), 0);
        assert_eq!(store.stats().size_bytes, 0);
    }

    #[test]
    fn test_delete() {
        let store = MemoryStore::new();
        store.set("k", value("v"), None, None).unwrap();
        assert!(store.delete("k").unwrap());
        assert!(!store.delete("k").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_evict_by_tag() {
        let store = MemoryStore::new();
        store.set("a", value("1"), None, Some("t")).unwrap();
        store.set("b", value("2"), None, Some("t")).unwrap();
        store.set("c", value("3"), None, Some("u")).unwrap();
        store.set("d", value("4"), None, None).unwrap();

        assert_eq!(store.evict("t").unwrap(), 2);
        assert!(!store.contains("a"));
        assert!(!store.contains("b"));
        assert!(store.contains("c"));
        assert!(store.contains("d"));
        assert_eq!(store.stats().size_bytes, 2);
    }

    #[test]
    fn test_capacity_bound() {
        let store = MemoryStore::with_capacity(10);
        for i in 0..50 {
            store.set(&format!("k{}", i), value("v"), None, None).unwrap();
        }
        assert!(store.len() <= 10);
        assert!(store.stats().evictions >= 40);
        // The most recent write always lands
        assert!(store.contains("k49"));
    }

    #[test]
    fn test_capacity_prefers_expired() {
        let store = MemoryStore::with_capacity(2);
        store
            .set("old", value("v"), Some(Duration::from_millis(10)), None)
            .unwrap();
        store.set("keep", value("v"), None, None).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        store.set("new", value("v"), None, None).unwrap();
        assert!(store.contains("keep"));
        assert!(store.contains("new"));
        assert_eq!(store.stats().evictions, 0);
    }

    #[test]
    fn test_clear_and_purge() {
        let store = MemoryStore::new();
        store
            .set("short", value("v"), Some(Duration::from_millis(10)), None)
            .unwrap();
        store.set("long", value("v"), None, None).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(store.purge_expired().unwrap(), 1);
        assert_eq!(store.len(), 1);

        store.clear().unwrap();
        assert!(store.is_empty());
        assert_eq!(store.stats().size_bytes, 0);
    }

    #[test]
    fn test_size_never_wraps_after_clear() {
        let store = MemoryStore::new();
        store.set("k", value("value"), None, None).unwrap();

        // A removal accounted after a concurrent clear zeroed the counter
        store.current_size.store(0, Ordering::Relaxed);
        assert!(store.delete("k").unwrap());
        assert_eq!(store.stats().size_bytes, 0);
    }

    #[test]
    fn test_clear_racing_deletes() {
        let store = std::sync::Arc::new(MemoryStore::with_capacity(10_000));
        for round in 0..20 {
            for i in 0..200 {
                store
                    .set(&format!("k{}:{}", round, i), value("payload"), None, None)
                    .unwrap();
            }
            let deleter = {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        store.delete(&format!("k{}:{}", round, i)).unwrap();
                    }
                })
            };
            store.clear().unwrap();
            deleter.join().unwrap();

            assert!(store.is_empty());
            assert!(store.stats().size_bytes <= 200 * 7);
        }
    }
}
