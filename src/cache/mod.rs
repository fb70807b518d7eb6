//! Two-Tier Cache
//!
//! ```text
//!               ┌──────────────────────────────┐
//!   callers ──▶ │         CacheBackend         │ ──▶ CacheMetrics
//!               │  get: L1 → L2 (promote)      │
//!               │  set: L1 + L2 (write-through)│
//!               └──────┬────────────────┬──────┘
//!                      │ TierStore      │ TierStore
//!               ┌──────▼──────┐  ┌──────▼──────┐
//!               │ MemoryStore │  │  DiskStore  │
//!               │ (L1, DashMap)│ │ (L2, SQLite)│
//!               └─────────────┘  └─────────────┘
//! ```
//!
//! # Components
//!
//! - **Keys** (`key.rs`): deterministic, order-independent cache keys
//! - **Tiers** (`tier.rs`, `l1.rs`, `l2.rs`): the [`TierStore`] port and
//!   its in-memory and on-disk implementations
//! - **Backend** (`backend.rs`): lookup order, write-through, TTL policy
//! - **Error cache** (`error_cache.rs`): negative caching of HTTP failures
//! - **Metrics** (`metrics.rs`): counters and rolling latency windows

pub mod backend;
pub mod entry;
pub mod error_cache;
pub mod key;
pub mod l1;
pub mod l2;
pub mod metrics;
pub mod tier;

#[cfg(test)]
mod proptest;

pub use backend::{CacheBackend, CacheStats, LayerStats, Layers, OverallStats};
pub use entry::CacheEntry;
pub use error_cache::{CachedError, ErrorCache, ErrorTtlPolicy, TtlRange, CACHEABLE_STATUSES};
pub use key::KeyNormalizer;
pub use l1::{L1Config, MemoryStore};
pub use l2::{check_schema, DiskStore, L2Config, SchemaCheck, SCHEMA_VERSION};
pub use metrics::{
    CacheMetrics, LatencyStats, LatencySummary, LatencyTracker, MetricsSnapshot, Operation,
    TierSnapshot,
};
pub use tier::{CacheTier, StoredValue, TierStats, TierStore};
