//! Monitoring
//!
//! Health evaluation and metric export for a [`CacheBackend`].
//!
//! - **Health** (`health.rs`): threshold checks producing a [`HealthReport`]
//! - **Exporter** (`exporter.rs`): Prometheus text exposition
//! - **Server** (`server.rs`): `/metrics` and `/healthz` over HTTP
//!
//! [`CacheBackend`]: crate::cache::CacheBackend

pub mod exporter;
pub mod health;
pub mod server;

pub use exporter::PrometheusExporter;
pub use health::{
    CacheHealthMonitor, HealthIssue, HealthReport, HealthStatus, HealthThresholds, Severity,
};
pub use server::{serve, serve_listener};
