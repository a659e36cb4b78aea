//! Job queue: two priority lanes served by one worker pool.
//!
//! This is the scheduler seam. Broker wiring lives outside this crate; the
//! in-memory queue serves tests and single-process runners.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use memberflow_core::JobId;

use super::types::{Job, Lane};

/// Claim order: interactive work always goes first.
const CLAIM_ORDER: [Lane; 2] = [Lane::Interactive, Lane::Bulk];

/// Job queue abstraction.
pub trait JobQueue: Send + Sync {
    /// Enqueue a job on its lane.
    fn enqueue(&self, job: Job) -> Result<JobId, QueueError>;

    /// Take the next job: interactive lane first, FIFO within a lane.
    /// Returns None if no jobs are queued.
    fn claim_next(&self) -> Result<Option<Job>, QueueError>;

    /// Drop a job that has not been claimed yet. Returns whether it was queued.
    fn revoke(&self, job_id: JobId) -> Result<bool, QueueError>;

    /// Number of jobs waiting on a lane.
    fn pending(&self, lane: Lane) -> Result<usize, QueueError>;
}

/// Job queue error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("job already queued: {0}")]
    AlreadyQueued(JobId),
    #[error("queue storage error: {0}")]
    Storage(String),
}

/// In-memory two-lane queue for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    lanes: Mutex<HashMap<Lane, VecDeque<Job>>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lanes(&self) -> Result<MutexGuard<'_, HashMap<Lane, VecDeque<Job>>>, QueueError> {
        self.lanes
            .lock()
            .map_err(|_| QueueError::Storage("lock poisoned".to_string()))
    }
}

impl JobQueue for InMemoryJobQueue {
    fn enqueue(&self, job: Job) -> Result<JobId, QueueError> {
        let mut lanes = self.lanes()?;
        if lanes.values().flatten().any(|queued| queued.id == job.id) {
            return Err(QueueError::AlreadyQueued(job.id));
        }
        let id = job.id;
        lanes.entry(job.lane).or_default().push_back(job);
        Ok(id)
    }

    fn claim_next(&self) -> Result<Option<Job>, QueueError> {
        let mut lanes = self.lanes()?;
        for lane in CLAIM_ORDER {
            if let Some(job) = lanes.get_mut(&lane).and_then(VecDeque::pop_front) {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    fn revoke(&self, job_id: JobId) -> Result<bool, QueueError> {
        let mut lanes = self.lanes()?;
        for queue in lanes.values_mut() {
            if let Some(pos) = queue.iter().position(|j| j.id == job_id) {
                queue.remove(pos);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn pending(&self, lane: Lane) -> Result<usize, QueueError> {
        Ok(self.lanes()?.get(&lane).map_or(0, VecDeque::len))
    }
}

impl<Q> JobQueue for Arc<Q>
where
    Q: JobQueue + ?Sized,
{
    fn enqueue(&self, job: Job) -> Result<JobId, QueueError> {
        (**self).enqueue(job)
    }

    fn claim_next(&self) -> Result<Option<Job>, QueueError> {
        (**self).claim_next()
    }

    fn revoke(&self, job_id: JobId) -> Result<bool, QueueError> {
        (**self).revoke(job_id)
    }

    fn pending(&self, lane: Lane) -> Result<usize, QueueError> {
        (**self).pending(lane)
    }
}
