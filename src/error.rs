//! Error types for the Europe PMC cache layer
//!
//! Errors only travel between the tier stores and [`CacheBackend`], which
//! converts them into error metrics. Callers of the backend, the error cache
//! and the paginator never see them.
//!
//! [`CacheBackend`]: crate::cache::CacheBackend

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the cache subsystem
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite error from the on-disk tier
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Value (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Configuration file could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// On-disk schema could not be migrated
    #[error("Schema migration failed for {path}: {reason}", path = .path.display())]
    SchemaMigration { path: PathBuf, reason: String },

    /// Store was used after close()
    #[error("{0} store is closed")]
    StoreClosed(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
