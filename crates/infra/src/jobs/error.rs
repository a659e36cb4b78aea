//! Orchestration error taxonomy.

use memberflow_core::{CollectionId, DomainError};

use crate::kv::KvError;
use crate::membership::MembershipStoreError;

use super::queue::QueueError;

/// Job orchestration error.
///
/// - `LockConflict`: the target collection is being written by another job;
///   reported before any write
/// - `Validation`: malformed request, rejected before enqueue
/// - `SharedStore` / `Membership`: a store was unreachable or refused a
///   command; the job ends FAILED and is not retried
/// - `Queue`: the scheduler refused the job
///
/// Cancellation is a terminal state, not an error, and undecodable status
/// records degrade to `JobState::Unknown`.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("collection {0} is busy: another bulk operation is writing to it")]
    LockConflict(CollectionId),

    #[error(transparent)]
    Validation(#[from] DomainError),

    #[error(transparent)]
    SharedStore(#[from] KvError),

    #[error(transparent)]
    Membership(#[from] MembershipStoreError),

    #[error("scheduler error: {0}")]
    Queue(#[from] QueueError),
}

impl JobError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(DomainError::validation(msg))
    }

    /// Store faults that a resubmission may get past.
    pub fn is_transient(&self) -> bool {
        matches!(self, JobError::SharedStore(_) | JobError::Membership(_))
    }
}
