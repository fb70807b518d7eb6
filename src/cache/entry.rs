//! Cache Entry Types
//!
//! Entries owned by the in-memory tier. The on-disk tier stores the same
//! fields as table columns.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::Duration;

use bytes::Bytes;

/// Milliseconds since the Unix epoch
#[inline]
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Absolute expiry for a TTL starting now (`None` = never expires)
#[inline]
pub(crate) fn expiry_from_ttl(ttl: Option<Duration>) -> Option<i64> {
    match ttl {
        Some(ttl) if !ttl.is_zero() => {
            let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
            Some(now_millis().saturating_add(ttl_ms))
        }
        _ => None,
    }
}

/// Metadata for cache entries
#[derive(Debug)]
pub struct EntryMetadata {
    /// Value size in bytes
    size: u64,
    /// Creation timestamp (epoch millis)
    created_at: i64,
    /// Expiry timestamp (epoch millis, None = no expiry)
    expires_at: Option<i64>,
    /// Last access timestamp (epoch millis)
    last_access: AtomicI64,
    /// Access count for frequency-based eviction
    access_count: AtomicU32,
}

impl EntryMetadata {
    /// Create new entry metadata
    pub fn new(size: u64, ttl: Option<Duration>) -> Self {
        let now = now_millis();
        Self {
            size,
            created_at: now,
            expires_at: expiry_from_ttl(ttl),
            last_access: AtomicI64::new(now),
            access_count: AtomicU32::new(1),
        }
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    #[inline]
    pub fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }

    /// Record an access and return the new count
    #[inline]
    pub fn record_access(&self) -> u32 {
        self.last_access.store(now_millis(), Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    pub fn access_count(&self) -> u32 {
        self.access_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn last_access(&self) -> i64 {
        self.last_access.load(Ordering::Relaxed)
    }

    /// Check if entry has expired at `now` (epoch millis)
    #[inline]
    pub fn is_expired_at(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(expires_at) if now >= expires_at)
    }

    /// Check if entry has expired
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    /// Remaining time to live (`None` = no expiry)
    pub fn remaining_ttl(&self) -> Option<Duration> {
        self.expires_at
            .map(|expires_at| Duration::from_millis((expires_at - now_millis()).max(0) as u64))
    }

    /// Calculate eviction score (higher = more likely to evict)
    ///
    /// Score: age / (frequency + 1)
    pub fn eviction_score(&self) -> f64 {
        let age = (now_millis() - self.last_access()).max(0) as f64;
        let frequency = self.access_count() as f64;
        age / (frequency + 1.0)
    }
}

impl Clone for EntryMetadata {
    fn clone(&self) -> Self {
        Self {
            size: self.size,
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_access: AtomicI64::new(self.last_access()),
            access_count: AtomicU32::new(self.access_count()),
        }
    }
}

/// Cache entry: value, optional tag and metadata
#[derive(Clone)]
pub struct CacheEntry {
    /// Entry metadata
    pub metadata: EntryMetadata,
    /// Tag used for bulk invalidation
    tag: Option<String>,
    /// Cached value
    value: Bytes,
}

impl CacheEntry {
    /// Create a new cache entry
    pub fn new(value: Bytes, ttl: Option<Duration>, tag: Option<&str>) -> Self {
        Self {
            metadata: EntryMetadata::new(value.len() as u64, ttl),
            tag: tag.map(str::to_owned),
            value,
        }
    }

    /// Get value (zero-copy)
    #[inline]
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    #[inline]
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    #[inline]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tag.as_deref() == Some(tag)
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.metadata.size()
    }

    #[inline]
    pub fn record_access(&self) -> u32 {
        self.metadata.record_access()
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.metadata.is_expired()
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("size", &self.metadata.size())
            .field("tag", &self.tag)
            .field("access_count", &self.metadata.access_count())
            .field("is_expired", &self.is_expired())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
