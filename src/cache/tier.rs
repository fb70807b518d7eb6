//! Tier Store Port
//!
//! The narrow interface every cache tier implements. [`CacheBackend`]
//! depends only on this trait, so the in-memory and on-disk tiers (or a
//! test double) are interchangeable.
//!
//! [`CacheBackend`]: super::CacheBackend

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Cache tier enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheTier {
    /// L1 - in-memory (hot, volatile)
    L1,
    /// L2 - on-disk (slower, durable)
    L2,
}

impl CacheTier {
    /// Short lowercase label for logs and metric labels
    pub fn label(&self) -> &'static str {
        match self {
            CacheTier::L1 => "l1",
            CacheTier::L2 => "l2",
        }
    }
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheTier::L1 => write!(f, "L1 (memory)"),
            CacheTier::L2 => write!(f, "L2 (disk)"),
        }
    }
}

/// Point-in-time tier statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierStats {
    /// Number of stored entries (including not-yet-purged expired ones)
    pub entries: u64,
    /// Bytes of stored values
    pub size_bytes: u64,
    /// Capacity evictions performed by the store itself
    pub evictions: u64,
}

/// A live value read from a tier, with what is needed to copy it to
/// another tier without extending its lifetime or losing its tag
#[derive(Debug, Clone, PartialEq)]
pub struct StoredValue {
    pub value: Bytes,
    /// Remaining time to live (`None` = no expiry)
    pub ttl: Option<Duration>,
    pub tag: Option<String>,
}

/// Storage port for one cache tier.
///
/// Implementations must be safe to call from many threads and must make
/// each single-key operation atomic. Expired entries are reported as
/// misses and removed when found on read.
pub trait TierStore: Send + Sync {
    /// Which tier this store serves
    fn tier(&self) -> CacheTier;

    /// Look up a live value with its remaining TTL and tag
    fn lookup(&self, key: &str) -> Result<Option<StoredValue>>;

    /// Look up a live value
    fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.lookup(key)?.map(|stored| stored.value))
    }

    /// Store a value; `ttl` of `None` or zero means no expiry
    fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>, tag: Option<&str>)
        -> Result<bool>;

    /// Remove a key; returns whether it existed
    fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every entry
    fn clear(&self) -> Result<bool>;

    /// Remove every entry written with `tag`; returns the count removed
    fn evict(&self, tag: &str) -> Result<usize>;

    /// Remove expired entries; returns the count removed
    fn purge_expired(&self) -> Result<usize>;

    /// Current statistics
    fn stats(&self) -> TierStats;

    /// Release underlying resources
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A shared store serves as a tier too, so callers can keep a handle to it
impl<S: TierStore + ?Sized> TierStore for std::sync::Arc<S> {
    fn tier(&self) -> CacheTier {
        (**self).tier()
    }

    fn lookup(&self, key: &str) -> Result<Option<StoredValue>> {
        (**self).lookup(key)
    }

    fn get(&self, key: &str) -> Result<Option<Bytes>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>, tag: Option<&str>)
        -> Result<bool> {
        (**self).set(key, value, ttl, tag)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        (**self).delete(key)
    }

    fn clear(&self) -> Result<bool> {
        (**self).clear()
    }

    fn evict(&self, tag: &str) -> Result<usize> {
        (**self).evict(tag)
    }

    fn purge_expired(&self) -> Result<usize> {
        (**self).purge_expired()
    }

    fn stats(&self) -> TierStats {
        (**self).stats()
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }
}
