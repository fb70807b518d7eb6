//! Cursor Paginator
//!
//! Drives a cursor-paginated harvest and checkpoints after every page.
//!
//! # Design
//!
//! - With `resume` set, a live checkpoint for the query replaces the fresh
//!   state, so pages already fetched are skipped
//! - Checkpointing is best effort: if the backend is disabled or failing
//!   the paginator keeps its state in memory only
//! - [`CursorPaginator::drive`] runs a fetch callback until the upstream
//!   signals the end, or until the page limit is reached

use serde_json::Value;
use tracing::{debug, info};

use super::checkpoint::PaginationCheckpoint;
use super::state::PaginationState;

/// Cursor sent for the first page
pub const INITIAL_CURSOR: &str = "*";

/// Extracts the identifier recorded as `last_doc_id`
pub trait HarvestRecord {
    fn record_id(&self) -> Option<String>;
}

impl HarvestRecord for String {
    fn record_id(&self) -> Option<String> {
        Some(self.clone())
    }
}

impl HarvestRecord for &str {
    fn record_id(&self) -> Option<String> {
        Some((*self).to_string())
    }
}

impl HarvestRecord for Value {
    /// First of `id`, `pmid`, `doi` present as a string or number
    fn record_id(&self) -> Option<String> {
        ["id", "pmid", "doi"]
            .iter()
            .find_map(|field| match self.get(field)? {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }
}

/// One page returned by a fetch callback
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub results: Vec<T>,
    /// Continuation token for the next page (`None` at the end)
    pub next_cursor: Option<String>,
    pub total_count: Option<u64>,
}

/// Outcome of [`CursorPaginator::drive`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestSummary {
    /// Pages fetched by this call
    pub pages: u64,
    /// Records fetched by this call
    pub records: u64,
    /// Page the call started from
    pub started_at_page: u64,
    pub completed: bool,
}

/// Resumable cursor paginator
#[derive(Debug)]
pub struct CursorPaginator {
    state: PaginationState,
    checkpoint: Option<PaginationCheckpoint>,
}

impl CursorPaginator {
    /// Create a paginator, resuming from a checkpoint when asked to
    pub fn new(
        query: impl Into<String>,
        page_size: u32,
        checkpoint: Option<PaginationCheckpoint>,
        resume: bool,
    ) -> Self {
        let query = query.into();

        let resumed = if resume {
            checkpoint.as_ref().and_then(|c| c.load(&query))
        } else {
            None
        };

        let state = match resumed {
            Some(state) => {
                info!(
                    "Resuming '{}' at page {} ({} fetched)",
                    query, state.page, state.fetched_count
                );
                state
            }
            None => PaginationState::new(query, page_size),
        };

        Self { state, checkpoint }
    }

    /// Record a fetched page and checkpoint the new state
    pub fn update_progress<T: HarvestRecord>(
        &mut self,
        results: &[T],
        cursor: Option<String>,
        total_count: Option<u64>,
    ) -> &PaginationState {
        let last_doc_id = results.last().and_then(HarvestRecord::record_id);
        self.state
            .update(results.len() as u64, last_doc_id, cursor, total_count);

        if let Some(checkpoint) = &self.checkpoint {
            if !checkpoint.save(&self.state) {
                debug!("Checkpoint unavailable for '{}'", self.state.query);
            }
        }
        if self.state.completed {
            info!(
                "Harvest of '{}' complete: {} records",
                self.state.query, self.state.fetched_count
            );
        }
        &self.state
    }

    pub fn get_state(&self) -> &PaginationState {
        &self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state.completed
    }

    pub fn query(&self) -> &str {
        &self.state.query
    }

    pub fn page_size(&self) -> u32 {
        self.state.page_size
    }

    /// Cursor to send with the next request
    ///
    /// [`INITIAL_CURSOR`] before the first page; `None` once a page came
    /// back without a continuation token.
    pub fn cursor_mark(&self) -> Option<&str> {
        match self.state.cursor.as_deref() {
            Some(cursor) => Some(cursor),
            None if self.state.page <= 1 => Some(INITIAL_CURSOR),
            None => None,
        }
    }

    /// Start over from page 1 and drop the persisted checkpoint
    pub fn reset(&mut self) {
        self.state.reset();
        if let Some(checkpoint) = &self.checkpoint {
            checkpoint.delete(&self.state.query);
        }
        info!("Pagination reset for '{}'", self.state.query);
    }

    /// Fetch pages until the harvest completes or `max_pages` is reached
    ///
    /// `fetch` receives the cursor and page size. A returned cursor equal
    /// to the one sent is treated as the end of results, and a harvest
    /// left without a cursor is completed without another request. Errors
    /// from `fetch` stop the harvest; progress up to the last page is kept.
    pub fn drive<T, E, F>(
        &mut self,
        mut fetch: F,
        max_pages: Option<u64>,
    ) -> std::result::Result<HarvestSummary, E>
    where
        T: HarvestRecord,
        F: FnMut(&str, u32) -> std::result::Result<Page<T>, E>,
    {
        let mut summary = HarvestSummary {
            started_at_page: self.state.page,
            ..Default::default()
        };

        while !self.is_complete() {
            let Some(sent) = self.cursor_mark().map(str::to_owned) else {
                debug!("No continuation cursor for '{}'", self.state.query);
                self.update_progress::<T>(&[], None, None);
                break;
            };
            if max_pages.map_or(false, |max| summary.pages >= max) {
                break;
            }

            let page = fetch(&sent, self.state.page_size)?;

            let next_cursor = page.next_cursor.filter(|next| *next != sent);
            summary.pages += 1;
            summary.records += page.results.len() as u64;
            self.update_progress(&page.results, next_cursor, page.total_count);
        }

        summary.completed = self.is_complete();
        Ok(summary)
    }
}

// =============================================================================
// Tests
// =============================================================================
