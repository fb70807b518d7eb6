//! Cache configuration
//!
//! [`CacheConfig`] is an explicit, typed configuration struct. It can be
//! built in code (struct update syntax over [`CacheConfig::default`]) or
//! loaded from YAML, where unknown keys are rejected at construction time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default TTL for entries without a type-specific policy (1 day)
pub const DEFAULT_TTL_SECS: u64 = 86_400;

/// Default on-disk size limit (500MB)
pub const DEFAULT_SIZE_LIMIT_MB: u64 = 500;

/// Default number of entries held in the in-memory tier
pub const DEFAULT_L1_MAX_ENTRIES: usize = 1024;

/// Kind of data being cached, used solely to select a TTL policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Search result pages
    Search,
    /// Single article metadata records
    Record,
    /// Full-text XML documents
    Fulltext,
    /// Upstream error outcomes
    Error,
}

impl DataType {
    /// All data types, in declaration order
    pub const ALL: [DataType; 4] = [
        DataType::Search,
        DataType::Record,
        DataType::Fulltext,
        DataType::Error,
    ];

    /// Lowercase name used in configuration files and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Search => "search",
            DataType::Record => "record",
            DataType::Fulltext => "fulltext",
            DataType::Error => "error",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Master switch; when false every cache operation is a no-op
    pub enabled: bool,
    /// Default TTL in seconds
    pub ttl: u64,
    /// On-disk size limit in megabytes
    pub size_limit_mb: u64,
    /// Directory holding the on-disk store
    pub cache_dir: PathBuf,
    /// Per data-type TTL overrides in seconds
    pub ttl_by_type: HashMap<DataType, u64>,
    /// Maximum number of entries in the in-memory tier
    pub l1_max_entries: usize,
    /// Enable the on-disk tier
    pub l2_enabled: bool,
    /// Allow caching of 404/410 responses
    pub negative_caching: bool,
    /// Draw error TTLs uniformly from their range
    pub error_ttl_jitter: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let ttl_by_type = HashMap::from([
            (DataType::Search, 86_400),
            (DataType::Record, 7 * 86_400),
            (DataType::Fulltext, 30 * 86_400),
            (DataType::Error, 300),
        ]);

        Self {
            enabled: true,
            ttl: DEFAULT_TTL_SECS,
            size_limit_mb: DEFAULT_SIZE_LIMIT_MB,
            cache_dir: PathBuf::from(".cache/europmc"),
            ttl_by_type,
            l1_max_entries: DEFAULT_L1_MAX_ENTRIES,
            l2_enabled: true,
            negative_caching: true,
            error_ttl_jitter: true,
        }
    }
}

impl CacheConfig {
    /// Configuration with caching switched off
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Default configuration rooted at `cache_dir`
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Default::default()
        }
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: CacheConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    /// Reject configurations that cannot produce a working cache
    pub fn validate(&self) -> Result<()> {
        if self.size_limit_mb == 0 {
            return Err(Error::Config("size_limit_mb must be greater than 0".into()));
        }
        if self.l1_max_entries == 0 {
            return Err(Error::Config(
                "l1_max_entries must be greater than 0".into(),
            ));
        }
        if self.l2_enabled && self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config(
                "cache_dir is required when l2_enabled is set".into(),
            ));
        }
        Ok(())
    }

    /// Default TTL
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }

    /// TTL for a data type, falling back to the default TTL
    pub fn ttl_for(&self, data_type: Option<DataType>) -> Duration {
        data_type
            .and_then(|t| self.ttl_by_type.get(&t).copied())
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.default_ttl())
    }

    /// On-disk size limit in bytes
    pub fn size_limit_bytes(&self) -> u64 {
        self.size_limit_mb.saturating_mul(1024 * 1024)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.ttl, 86_400);
        assert_eq!(config.size_limit_bytes(), 500 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ttl_by_type_fallback() {
        let mut config = CacheConfig::default();
        config.ttl_by_type.remove(&DataType::Record);

        assert_eq!(config.ttl_for(Some(DataType::Search)), Duration::from_secs(86_400));
        assert_eq!(config.ttl_for(Some(DataType::Record)), config.default_ttl());
        assert_eq!(config.ttl_for(None), config.default_ttl());
        assert_eq!(config.ttl_for(Some(DataType::Error)), Duration::from_secs(300));
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
enabled: true
ttl: 3600
size_limit_mb: 50
cache_dir: /tmp/europmc-test
ttl_by_type:
  search: 60
  fulltext: 120
"#;
        let config = CacheConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.ttl, 3600);
        assert_eq!(config.size_limit_mb, 50);
        assert_eq!(config.ttl_for(Some(DataType::Search)), Duration::from_secs(60));
        assert_eq!(config.ttl_for(Some(DataType::Record)), Duration::from_secs(3600));
        // Unspecified fields keep their defaults
        assert!(config.negative_caching);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let yaml = "enabled: true\nttl_seconds: 10\n";
        let err = CacheConfig::from_yaml_str(yaml).unwrap_err();
        assert_matches!(err, Error::ConfigParse(_));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = CacheConfig {
            size_limit_mb: 0,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Config(_)));

        let config = CacheConfig {
            l1_max_entries: 0,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Config(_)));
    }

    #[test]
    fn test_data_type_display() {
        assert_eq!(DataType::Search.to_string(), "search");
        assert_eq!(DataType::Fulltext.to_string(), "fulltext");
        assert_eq!(DataType::ALL.len(), 4);
    }
}
