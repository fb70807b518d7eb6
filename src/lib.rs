//! Europe PMC Cache - Resilient Caching and Resumable Pagination
//!
//! The caching layer of a Europe PMC literature client: a two-tier cache
//! with per-data-type TTLs, negative caching of upstream failures, health
//! monitoring, and checkpointed cursor pagination so long harvests survive
//! restarts.
//!
//! # Architecture
//!
//! ```text
//!   HTTP clients ──▶ ErrorCache ──▶ CacheBackend ──▶ L1 (memory) / L2 (SQLite)
//!                                        ▲   │
//!   harvest loop ──▶ CursorPaginator ────┘   └──▶ CacheMetrics ──▶ CacheHealthMonitor
//!                    (PaginationCheckpoint)                   └──▶ PrometheusExporter
//! ```
//!
//! Cache failures never reach the caller: a failing tier shows up in the
//! metrics and health report, and the operation returns a miss or `false`.
//!
//! # Modules
//!
//! - [`cache`] - Key normalization, tier stores, backend, error cache, metrics
//! - [`config`] - Cache configuration
//! - [`error`] - Error types
//! - [`monitoring`] - Health checks, Prometheus export, HTTP endpoints
//! - [`pagination`] - Checkpointed cursor pagination

pub mod cache;
pub mod config;
pub mod error;
pub mod monitoring;
pub mod pagination;

// Re-exports for convenience
pub use cache::{CacheBackend, CacheMetrics, CachedError, ErrorCache, KeyNormalizer};
pub use config::{CacheConfig, DataType};
pub use error::{Error, Result};
pub use monitoring::{CacheHealthMonitor, HealthReport, HealthStatus, PrometheusExporter};
pub use pagination::{CursorPaginator, PaginationCheckpoint, PaginationState};
