//! Pagination State
//!
//! Progress of one cursor-paginated harvest. A harvest is in progress
//! until a page comes back empty with no continuation cursor; after that
//! it is complete and updates only touch `last_updated`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress of a cursor-paginated harvest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginationState {
    /// Query string identifying the harvest
    pub query: String,
    /// Continuation token for the next request
    pub cursor: Option<String>,
    /// Next page to fetch (starts at 1)
    pub page: u64,
    pub page_size: u32,
    /// Records fetched so far
    pub fetched_count: u64,
    /// Identifier of the last record fetched
    pub last_doc_id: Option<String>,
    /// Total hits reported upstream, if known
    pub total_count: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub completed: bool,
}

impl PaginationState {
    /// Fresh state at page 1
    pub fn new(query: impl Into<String>, page_size: u32) -> Self {
        let now = Utc::now();
        Self {
            query: query.into(),
            cursor: None,
            page: 1,
            page_size,
            fetched_count: 0,
            last_doc_id: None,
            total_count: None,
            started_at: now,
            last_updated: now,
            completed: false,
        }
    }

    /// Record one fetched page
    ///
    /// Marks the harvest complete when `cursor` is `None` and the page was
    /// empty. A completed state never goes back to in-progress.
    pub fn update(
        &mut self,
        results: u64,
        last_doc_id: Option<String>,
        cursor: Option<String>,
        total_count: Option<u64>,
    ) {
        self.last_updated = Utc::now();
        if self.completed {
            return;
        }

        self.fetched_count += results;
        self.page += 1;
        if last_doc_id.is_some() {
            self.last_doc_id = last_doc_id;
        }
        if total_count.is_some() {
            self.total_count = total_count;
        }
        self.completed = cursor.is_none() && results == 0;
        self.cursor = cursor;
    }

    /// Percent of `total_count` fetched, in `[0, 100]`; 0 when unknown
    pub fn progress_percent(&self) -> f64 {
        match self.total_count {
            Some(0) => 100.0,
            Some(total) => (100.0 * self.fetched_count as f64 / total as f64).clamp(0.0, 100.0),
            None => 0.0,
        }
    }

    /// Time since the harvest started
    pub fn elapsed(&self) -> Duration {
        (Utc::now() - self.started_at).to_std().unwrap_or_default()
    }

    /// Linear estimate of the time left; `None` when the total is unknown
    /// or nothing has been fetched yet
    pub fn estimated_remaining_time(&self) -> Option<Duration> {
        let total = self.total_count?;
        if self.completed || self.fetched_count >= total {
            return Some(Duration::ZERO);
        }
        if self.fetched_count == 0 {
            return None;
        }

        let remaining = (total - self.fetched_count) as f64 / self.fetched_count as f64;
        Some(self.elapsed().mul_f64(remaining))
    }

    /// Start over from page 1
    pub fn reset(&mut self) {
        let now = Utc::now();
        self.cursor = None;
        self.page = 1;
        self.fetched_count = 0;
        self.last_doc_id = None;
        self.completed = false;
        self.started_at = now;
        self.last_updated = now;
    }
}

// =============================================================================
// Tests
// =============================================================================
