//! Error Cache
//!
//! Negative caching of upstream HTTP failures on top of [`CacheBackend`].
//!
//! # Design
//!
//! - Entries live under `error:{status}:{key}`, so a cached failure never
//!   shadows the successful-response entry for the same request
//! - Each status has its own TTL range; with jitter on, the TTL is drawn
//!   uniformly from the range so callers that failed together do not
//!   retry together
//! - Entries are tagged `error:{status}` for bulk eviction of one kind
//!
//! | Status | TTL range (s) | Jitter |
//! |--------|---------------|--------|
//! | 404    | 300 – 900     | yes    |
//! | 410    | 3600 – 7200   | no     |
//! | 429    | 30 – 60       | yes, unless `Retry-After` is given |
//! | 502    | 10 – 20       | yes    |
//! | 503    | 20 – 40       | yes    |
//! | 504    | 15 – 30       | yes    |

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::backend::CacheBackend;

/// Status codes that may be cached
pub const CACHEABLE_STATUSES: [u16; 6] = [404, 410, 429, 502, 503, 504];

/// Lookup order for [`ErrorCache::get_any_cached_error`], most severe first
const SEVERITY_ORDER: [u16; 6] = [410, 404, 429, 503, 504, 502];

/// A cached upstream failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedError {
    pub status_code: u16,
    pub message: String,
    pub cached_at: DateTime<Utc>,
    /// Server-supplied `Retry-After` in seconds
    pub retry_after: Option<u64>,
}

impl CachedError {
    /// Not found / gone: retrying will not help
    pub fn is_permanent(&self) -> bool {
        matches!(self.status_code, 404 | 410)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after.map(Duration::from_secs)
    }

    /// Time since the failure was cached
    pub fn age(&self) -> Duration {
        (Utc::now() - self.cached_at).to_std().unwrap_or_default()
    }
}

/// TTL range for one status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlRange {
    pub min_secs: u64,
    pub max_secs: u64,
    /// Whether draws are randomized within the range
    pub jitter: bool,
}

impl TtlRange {
    const fn new(min_secs: u64, max_secs: u64, jitter: bool) -> Self {
        Self {
            min_secs,
            max_secs,
            jitter,
        }
    }
}

/// Per-status TTL selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorTtlPolicy {
    jitter: bool,
}

impl Default for ErrorTtlPolicy {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ErrorTtlPolicy {
    pub fn new(jitter: bool) -> Self {
        Self { jitter }
    }

    pub fn jitter(&self) -> bool {
        self.jitter
    }

    /// TTL range for a status, `None` if the status is not cacheable
    pub fn range(status: u16) -> Option<TtlRange> {
        let range = match status {
            404 => TtlRange::new(300, 900, true),
            410 => TtlRange::new(3600, 7200, false),
            429 => TtlRange::new(30, 60, true),
            502 => TtlRange::new(10, 20, true),
            503 => TtlRange::new(20, 40, true),
            504 => TtlRange::new(15, 30, true),
            _ => return None,
        };
        Some(range)
    }

    pub fn is_cacheable(status: u16) -> bool {
        Self::range(status).is_some()
    }

    /// Choose a TTL for a failure
    ///
    /// A 429 with `retry_after` uses it, capped at the range maximum.
    /// Without jitter a jittered range yields its minimum; an unjittered
    /// range (410) always yields its maximum.
    pub fn ttl_for(&self, status: u16, retry_after: Option<u64>) -> Option<Duration> {
        let range = Self::range(status)?;

        let secs = match (status, retry_after) {
            (429, Some(retry_after)) => retry_after.clamp(1, range.max_secs),
            _ if !range.jitter => range.max_secs,
            _ if self.jitter => rand::thread_rng().gen_range(range.min_secs..=range.max_secs),
            _ => range.min_secs,
        };

        Some(Duration::from_secs(secs))
    }
}

/// Negative cache for upstream failures
#[derive(Debug, Clone)]
pub struct ErrorCache {
    backend: Arc<CacheBackend>,
    policy: ErrorTtlPolicy,
    negative_caching: bool,
}

impl ErrorCache {
    /// Error cache over `backend`, configured from its [`CacheConfig`]
    ///
    /// [`CacheConfig`]: crate::config::CacheConfig
    pub fn new(backend: Arc<CacheBackend>) -> Self {
        let config = backend.config();
        let policy = ErrorTtlPolicy::new(config.error_ttl_jitter);
        let negative_caching = config.negative_caching;
        Self {
            backend,
            policy,
            negative_caching,
        }
    }

    /// Override the TTL policy
    pub fn with_policy(mut self, policy: ErrorTtlPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &ErrorTtlPolicy {
        &self.policy
    }

    /// Cache key for an error of `status` on `key`
    pub fn error_key(key: &str, status: u16) -> String {
        format!("error:{}:{}", status, key)
    }

    /// Tag attached to every cached error of `status`
    pub fn status_tag(status: u16) -> String {
        format!("error:{}", status)
    }

    fn accepts(&self, status: u16) -> bool {
        if !ErrorTtlPolicy::is_cacheable(status) {
            return false;
        }
        self.negative_caching || !matches!(status, 404 | 410)
    }

    /// Record a failure; returns false for statuses that are not cached
    pub fn cache_error(
        &self,
        key: &str,
        status: u16,
        message: &str,
        retry_after: Option<u64>,
    ) -> bool {
        if !self.accepts(status) {
            debug!("Not caching status {} for {}", status, key);
            return false;
        }
        let Some(ttl) = self.policy.ttl_for(status, retry_after) else {
            return false;
        };

        let entry = CachedError {
            status_code: status,
            message: message.to_string(),
            cached_at: Utc::now(),
            retry_after,
        };
        let bytes = match serde_json::to_vec(&entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to serialize cached error for {}: {}", key, e);
                return false;
            }
        };

        let tag = Self::status_tag(status);
        let stored =
            self.backend
                .set_with_ttl(&Self::error_key(key, status), bytes, ttl, Some(tag.as_str()));
        if stored {
            debug!("Cached {} for {} (ttl {}s)", status, key, ttl.as_secs());
        }
        stored
    }

    /// A live cached failure of `status` for `key`
    pub fn get_cached_error(&self, key: &str, status: u16) -> Option<CachedError> {
        if !ErrorTtlPolicy::is_cacheable(status) {
            return None;
        }
        self.backend.get_json(&Self::error_key(key, status))
    }

    pub fn is_error_cached(&self, key: &str, status: u16) -> bool {
        self.get_cached_error(key, status).is_some()
    }

    /// The most severe live cached failure for `key`, if any
    pub fn get_any_cached_error(&self, key: &str) -> Option<CachedError> {
        SEVERITY_ORDER
            .iter()
            .find_map(|&status| self.get_cached_error(key, status))
    }

    /// Forget a cached failure; returns whether one existed
    pub fn clear_error(&self, key: &str, status: u16) -> bool {
        if !ErrorTtlPolicy::is_cacheable(status) {
            return false;
        }
        self.backend.delete(&Self::error_key(key, status))
    }

    /// Forget every cached failure for `key`; returns how many existed
    pub fn clear_all_errors(&self, key: &str) -> usize {
        CACHEABLE_STATUSES
            .iter()
            .filter(|&&status| self.clear_error(key, status))
            .count()
    }

    /// Drop every cached failure of `status`
    pub fn evict_status(&self, status: u16) -> usize {
        if !ErrorTtlPolicy::is_cacheable(status) {
            return 0;
        }
        self.backend.evict(&Self::status_tag(status))
    }
}

// =============================================================================
// Tests
// =============================================================================
