//! Resumable Cursor Pagination
//!
//! - **State** (`state.rs`): progress of one harvest
//! - **Checkpoint** (`checkpoint.rs`): persistence through the cache
//! - **Paginator** (`paginator.rs`): page loop with per-page checkpoints

pub mod checkpoint;
pub mod paginator;
pub mod state;

pub use checkpoint::{
    PaginationCheckpoint, CHECKPOINT_PREFIX, CHECKPOINT_TAG, DEFAULT_CHECKPOINT_TTL,
};
pub use paginator::{CursorPaginator, HarvestRecord, HarvestSummary, Page, INITIAL_CURSOR};
pub use state::PaginationState;
