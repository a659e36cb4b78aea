//! Status and control surface used by the submission layer.
//!
//! Everything here is non-blocking: requests are validated, recorded and
//! queued; the worker pool does the work.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use memberflow_core::{CollectionId, JobId, MemberId};

use crate::jobs::{
    compute_delta, Job, JobContext, JobError, JobKind, JobProgress, JobQueue, Lane,
    MemberSelection,
};
use crate::kv::KeyValueStore;
use crate::membership::MembershipStore;

/// Acknowledgement of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelAck {
    pub job_id: JobId,
    /// The job was still queued and will never run.
    pub revoked: bool,
}

/// Submits jobs and answers status/cancel/undo requests.
pub struct ControlSurface<K, M, Q> {
    ctx: Arc<JobContext<K, M>>,
    queue: Q,
    lane_threshold: usize,
}

impl<K, M, Q> ControlSurface<K, M, Q>
where
    K: KeyValueStore,
    M: MembershipStore,
    Q: JobQueue,
{
    pub fn new(ctx: Arc<JobContext<K, M>>, queue: Q, lane_threshold: usize) -> Self {
        Self {
            ctx,
            queue,
            lane_threshold,
        }
    }

    /// Validate and queue a bulk add. Small deltas go to the interactive lane.
    #[instrument(skip(self, selection), fields(source = %source, target = %target), err)]
    pub fn submit(
        &self,
        source: CollectionId,
        target: CollectionId,
        selection: MemberSelection,
    ) -> Result<JobId, JobError> {
        if source == target {
            return Err(JobError::validation(
                "source and target collections must differ",
            ));
        }
        if matches!(&selection, MemberSelection::Selected(ids) if ids.is_empty()) {
            return Err(JobError::validation(
                "selected mode requires at least one member id",
            ));
        }

        let estimated = compute_delta(&self.ctx.members, source, target, &selection)?.len();
        let lane = Lane::for_estimate(estimated, self.lane_threshold);

        let job = Job::new(
            JobKind::BulkAdd {
                source,
                target,
                selection,
            },
            lane,
        );
        let job_id = self.enqueue(job)?;
        info!(job_id = %job_id, estimated, lane = lane.as_str(), "bulk add submitted");
        Ok(job_id)
    }

    /// Current progress. Unknown jobs read as PENDING, broken records as UNKNOWN.
    pub fn status(&self, job_id: JobId) -> Result<JobProgress, JobError> {
        Ok(self.ctx.progress.load(job_id)?)
    }

    /// Request cooperative cancellation; idempotent.
    #[instrument(skip(self), fields(job_id = %job_id), err)]
    pub fn cancel(&self, job_id: JobId) -> Result<CancelAck, JobError> {
        self.ctx.cancel.request(job_id)?;
        let revoked = self.queue.revoke(job_id)?;

        if revoked {
            self.ctx
                .progress
                .record(&JobProgress::cancelled(job_id, 0, 0))?;
            self.ctx.cancel.clear(job_id)?;
            info!(job_id = %job_id, "queued job revoked");
        } else {
            info!(job_id = %job_id, "cancel flag set");
        }

        Ok(CancelAck { job_id, revoked })
    }

    /// Queue an undo of `job_to_undo`'s inserts into `target`.
    #[instrument(skip(self), fields(job_to_undo = %job_to_undo, target = %target), err)]
    pub fn undo(&self, job_to_undo: JobId, target: CollectionId) -> Result<JobId, JobError> {
        let job = Job::new(
            JobKind::Undo {
                target,
                job_to_undo,
            },
            Lane::Interactive,
        );
        let job_id = self.enqueue(job)?;
        info!(job_id = %job_id, job_to_undo = %job_to_undo, "undo submitted");
        Ok(job_id)
    }

    /// Fails with `LockConflict` while a bulk job is writing to `collection`.
    pub fn ensure_collection_idle(&self, collection: CollectionId) -> Result<(), JobError> {
        if self.ctx.lock.is_held(collection)? {
            warn!(collection_id = %collection, "collection is locked by a bulk job");
            return Err(JobError::LockConflict(collection));
        }
        Ok(())
    }

    /// Remove members from a collection as an interactive operation.
    #[instrument(skip(self, members), fields(collection_id = %collection, requested = members.len()), err)]
    pub fn remove_members(
        &self,
        collection: CollectionId,
        members: &[MemberId],
    ) -> Result<u64, JobError> {
        if members.is_empty() {
            return Ok(0);
        }
        self.ensure_collection_idle(collection)?;

        let _interactive = self.ctx.interactive.enter(JobId::new())?;
        let ids: HashSet<MemberId> = members.iter().copied().collect();
        let removed = self.ctx.members.delete_members(collection, &ids)?;
        info!(collection_id = %collection, removed, "members removed");
        Ok(removed)
    }

    fn enqueue(&self, job: Job) -> Result<JobId, JobError> {
        let job_id = job.id;
        self.ctx.progress.record(&JobProgress::pending(job_id))?;
        Ok(self.queue.enqueue(job)?)
    }
}
