//! Pagination Checkpoints
//!
//! Persists [`PaginationState`] through a [`CacheBackend`] so a harvest can
//! resume after a restart. Checkpoints live under `pagination:checkpoint:*`,
//! are tagged `pagination` and expire after seven days by default.
//!
//! Without a session, checkpoints are keyed by query alone and two
//! harvests of the same query overwrite each other. Setting a session keys
//! them by `(query, session)`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};

use super::state::PaginationState;
use crate::cache::{CacheBackend, KeyNormalizer};

/// Key prefix for checkpoint entries
pub const CHECKPOINT_PREFIX: &str = "pagination:checkpoint";

/// Tag attached to every checkpoint entry
pub const CHECKPOINT_TAG: &str = "pagination";

/// Default checkpoint lifetime
pub const DEFAULT_CHECKPOINT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Checkpoint store over a cache backend
#[derive(Debug, Clone)]
pub struct PaginationCheckpoint {
    backend: Arc<CacheBackend>,
    ttl: Duration,
    session: Option<String>,
}

impl PaginationCheckpoint {
    pub fn new(backend: Arc<CacheBackend>) -> Self {
        Self {
            backend,
            ttl: DEFAULT_CHECKPOINT_TTL,
            session: None,
        }
    }

    /// Override the checkpoint lifetime
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Key checkpoints by `(query, session)`
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    /// Cache key for the checkpoint of `query`
    pub fn key(&self, query: &str) -> String {
        KeyNormalizer::normalize(
            CHECKPOINT_PREFIX,
            &json!({
                "query": KeyNormalizer::normalize_query(query),
                "session": self.session,
            }),
        )
    }

    /// Persist `state`; returns false if the backend did not store it
    pub fn save(&self, state: &PaginationState) -> bool {
        let bytes = match serde_json::to_vec(state) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to serialize checkpoint for '{}': {}", state.query, e);
                return false;
            }
        };

        let saved = self.backend.set_with_ttl(
            &self.key(&state.query),
            bytes,
            self.ttl,
            Some(CHECKPOINT_TAG),
        );
        if saved {
            debug!(
                "Checkpoint saved for '{}': page {}, fetched {}",
                state.query, state.page, state.fetched_count
            );
        }
        saved
    }

    /// Load the checkpoint for `query`, if one is live
    pub fn load(&self, query: &str) -> Option<PaginationState> {
        let state: PaginationState = self.backend.get_json(&self.key(query))?;
        debug!(
            "Checkpoint loaded for '{}': page {}, fetched {}",
            query, state.page, state.fetched_count
        );
        Some(state)
    }

    /// Remove the checkpoint for `query`; returns whether one existed
    pub fn delete(&self, query: &str) -> bool {
        let deleted = self.backend.delete(&self.key(query));
        if deleted {
            info!("Checkpoint deleted for '{}'", query);
        }
        deleted
    }

    pub fn exists(&self, query: &str) -> bool {
        self.backend.contains(&self.key(query))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    fn checkpoint() -> PaginationCheckpoint {
        PaginationCheckpoint::new(Arc::new(CacheBackend::in_memory(CacheConfig::default())))
    }

    #[test]
    fn test_save_load_delete() {
        let checkpoint = checkpoint();
        let mut state = PaginationState::new("malaria vaccine", 100);
        state.update(100, Some("PMC1".into()), Some("AoE".into()), Some(500));

        assert!(!checkpoint.exists("malaria vaccine"));
        assert!(checkpoint.save(&state));
        assert!(checkpoint.exists("malaria vaccine"));
        assert_eq!(checkpoint.load("malaria vaccine"), Some(state));

        assert!(checkpoint.delete("malaria vaccine"));
        assert!(!checkpoint.exists("malaria vaccine"));
        assert!(checkpoint.load("malaria vaccine").is_none());
    }

    #[test]
    fn test_key_normalizes_query() {
        let checkpoint = checkpoint();
        let key = checkpoint.key("  Malaria   Vaccine");
        assert_eq!(key, checkpoint.key("malaria vaccine"));
        assert!(key.starts_with("pagination:checkpoint:"));
        assert_ne!(key, checkpoint.key("malaria"));
    }

    #[test]
    fn test_sessions_are_isolated() {
        let backend = Arc::new(CacheBackend::in_memory(CacheConfig::default()));
        let plain = PaginationCheckpoint::new(Arc::clone(&backend));
        let a = PaginationCheckpoint::new(Arc::clone(&backend)).with_session("a");
        let b = PaginationCheckpoint::new(Arc::clone(&backend)).with_session("b");

        let state = PaginationState::new("q", 10);
        assert!(a.save(&state));
        assert!(a.exists("q"));
        assert!(!b.exists("q"));
        assert!(!plain.exists("q"));
        assert_ne!(a.key("q"), b.key("q"));
    }

    #[test]
    fn test_checkpoints_evictable_by_tag() {
        let backend = Arc::new(CacheBackend::in_memory(CacheConfig::default()));
        let checkpoint = PaginationCheckpoint::new(Arc::clone(&backend));
        checkpoint.save(&PaginationState::new("a", 10));
        checkpoint.save(&PaginationState::new("b", 10));

        assert_eq!(backend.evict(CHECKPOINT_TAG), 2);
        assert!(!checkpoint.exists("a"));
    }

    #[test]
    fn test_expired_checkpoint_is_gone() {
        let checkpoint = checkpoint().with_ttl(Duration::from_millis(20));
        checkpoint.save(&PaginationState::new("q", 10));
        std::thread::sleep(Duration::from_millis(40));
        assert!(checkpoint.load("q").is_none());
    }

    #[test]
    fn test_disabled_backend() {
        let checkpoint = PaginationCheckpoint::new(Arc::new(CacheBackend::disabled()));
        assert!(!checkpoint.save(&PaginationState::new("q", 10)));
        assert!(checkpoint.load("q").is_none());
        assert!(!checkpoint.exists("q"));
    }
}
