//! Bulk membership jobs and the machinery that runs them.
//!
//! ## Components
//!
//! - `JobQueue`: two priority lanes (interactive, bulk)
//! - `WorkerPool`: threads claiming jobs, interactive lane first
//! - `run_bulk_add`: lock, delta, batched copy with cancel/pause checkpoints
//! - `run_undo`: removes the rows recorded in a bulk job's insert ledger
//! - `ProgressStore`: per-job status records in the shared store

pub mod bulk;
pub mod context;
pub mod delta;
pub mod error;
pub mod executor;
pub mod progress;
pub mod queue;
pub mod types;
pub mod undo;

pub use bulk::{run_bulk_add, LOCK_HELD_MESSAGE};
pub use context::{JobContext, JobSettings};
pub use delta::compute_delta;
pub use error::JobError;
pub use executor::{PoolStats, WorkerPool, WorkerPoolConfig, WorkerPoolHandle};
pub use progress::ProgressStore;
pub use queue::{InMemoryJobQueue, JobQueue, QueueError};
pub use types::{
    BulkAddReport, Job, JobKind, JobOutcome, JobProgress, JobState, Lane, MemberSelection,
    UndoReport,
};
pub use undo::run_undo;
