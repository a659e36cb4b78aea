//! Undo job: remove exactly the rows a bulk add wrote.
//!
//! Runs as an interactive job (any bulk job pauses while it runs). A missing or
//! empty ledger makes it a no-op, which keeps repeated undos harmless.

use tracing::{error, info};

use memberflow_core::{CollectionId, JobId};

use crate::kv::KeyValueStore;
use crate::membership::MembershipStore;

use super::bulk::record_best_effort;
use super::context::JobContext;
use super::error::JobError;
use super::types::{JobProgress, UndoReport};

pub fn run_undo<K, M>(
    ctx: &JobContext<K, M>,
    job_id: JobId,
    target: CollectionId,
    job_to_undo: JobId,
) -> Result<UndoReport, JobError>
where
    K: KeyValueStore,
    M: MembershipStore,
{
    let result = ctx
        .interactive
        .enter(job_id)
        .map_err(JobError::from)
        .and_then(|_guard| undo_inserted(ctx, job_id, target, job_to_undo));

    result.inspect_err(|e| {
        error!(job_id = %job_id, job_to_undo = %job_to_undo, error = %e, "undo failed");
        record_best_effort(ctx, &JobProgress::failed(job_id, 0, 0, e.to_string()));
    })
}

fn undo_inserted<K, M>(
    ctx: &JobContext<K, M>,
    job_id: JobId,
    target: CollectionId,
    job_to_undo: JobId,
) -> Result<UndoReport, JobError>
where
    K: KeyValueStore,
    M: MembershipStore,
{
    ctx.progress.record(&JobProgress::started(job_id, 0))?;

    let inserted = ctx.ledger.members(job_to_undo)?;
    if inserted.is_empty() {
        info!(job_id = %job_id, job_to_undo = %job_to_undo, "nothing to undo");
        ctx.progress
            .record(&JobProgress::completed(job_id, 0, 0).with_deleted(0))?;
        return Ok(UndoReport { deleted: 0 });
    }

    let total = inserted.len() as u64;
    ctx.progress.record(&JobProgress::started(job_id, total))?;

    let deleted = ctx.members.delete_members(target, &inserted)?;

    // The ledger is cleared only after the delete commits.
    ctx.ledger.clear(job_to_undo)?;
    ctx.cancel.clear(job_to_undo)?;

    ctx.progress
        .record(&JobProgress::completed(job_id, total, total).with_deleted(deleted))?;
    info!(
        job_id = %job_id,
        job_to_undo = %job_to_undo,
        collection_id = %target,
        deleted,
        "undo completed"
    );

    Ok(UndoReport { deleted })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use crate::jobs::bulk::run_bulk_add;
    use crate::jobs::context::testing::{MarkerObservingStore, config, context};
    use crate::jobs::types::{JobState, MemberSelection};
    use crate::kv::InMemoryKeyValueStore;
    use crate::membership::{InMemoryMembershipStore, MembershipStoreError};
    use memberflow_core::MemberId;

    #[test]
    fn removes_only_rows_the_bulk_job_wrote() {
        let (ctx, _kv, members) = context(2);
        let (source, target) = (CollectionId::new(), CollectionId::new());
        members.seed(source, [1, 2, 3]);
        members.seed(target, [2, 3]);

        let bulk = JobId::new();
        run_bulk_add(&ctx, bulk, source, target, &MemberSelection::All).unwrap();
        assert_eq!(members.snapshot(target), vec![1, 2, 3]);

        let undo = JobId::new();
        let report = run_undo(&ctx, undo, target, bulk).unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(members.snapshot(target), vec![2, 3]);
        assert!(ctx.ledger.members(bulk).unwrap().is_empty());

        let status = ctx.progress.load(undo).unwrap();
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.deleted, Some(1));
        assert!(!ctx.interactive.is_active().unwrap());
    }

    #[test]
    fn second_undo_is_a_no_op() {
        let (ctx, _kv, members) = context(10);
        let (source, target) = (CollectionId::new(), CollectionId::new());
        members.seed(source, [1, 2, 3, 4]);

        let bulk = JobId::new();
        run_bulk_add(&ctx, bulk, source, target, &MemberSelection::All).unwrap();

        assert_eq!(run_undo(&ctx, JobId::new(), target, bulk).unwrap().deleted, 4);
        members.seed(target, [1]);

        let again = JobId::new();
        assert_eq!(run_undo(&ctx, again, target, bulk).unwrap().deleted, 0);
        assert_eq!(members.snapshot(target), vec![1]);
        assert_eq!(ctx.progress.load(again).unwrap().state, JobState::Completed);
    }

    #[test]
    fn unknown_job_has_nothing_to_undo() {
        let (ctx, _kv, members) = context(2);
        let target = CollectionId::new();
        members.seed(target, [5]);

        let report = run_undo(&ctx, JobId::new(), target, JobId::new()).unwrap();

        assert_eq!(report.deleted, 0);
        assert_eq!(members.snapshot(target), vec![5]);
    }

    #[test]
    fn deletes_while_holding_the_interactive_marker() {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let rows = Arc::new(InMemoryMembershipStore::new());
        let store = Arc::new(MarkerObservingStore::new(kv.clone(), rows.clone()));
        let ctx = JobContext::new(kv, store.clone(), &config(2));
        let (source, target) = (CollectionId::new(), CollectionId::new());
        rows.seed(source, [1, 2, 3]);

        let bulk = JobId::new();
        run_bulk_add(&ctx, bulk, source, target, &MemberSelection::All).unwrap();
        assert_eq!(store.holder_during_delete(), None);

        let undo = JobId::new();
        run_undo(&ctx, undo, target, bulk).unwrap();

        assert_eq!(store.holder_during_delete(), Some(Some(undo.to_string())));
        assert!(!ctx.interactive.is_active().unwrap());
        assert!(rows.snapshot(target).is_empty());
    }

    struct FailingDeletes {
        inner: Arc<InMemoryMembershipStore>,
    }

    impl MembershipStore for FailingDeletes {
        fn members(
            &self,
            collection: CollectionId,
            selection: Option<&HashSet<MemberId>>,
        ) -> Result<HashSet<MemberId>, MembershipStoreError> {
            self.inner.members(collection, selection)
        }

        fn insert_batch(
            &self,
            collection: CollectionId,
            members: &[MemberId],
        ) -> Result<Vec<MemberId>, MembershipStoreError> {
            self.inner.insert_batch(collection, members)
        }

        fn delete_members(
            &self,
            _collection: CollectionId,
            _members: &HashSet<MemberId>,
        ) -> Result<u64, MembershipStoreError> {
            Err(MembershipStoreError::Unavailable("connection reset".to_string()))
        }
    }

    #[test]
    fn failed_delete_keeps_ledger_for_retry() {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let rows = Arc::new(InMemoryMembershipStore::new());
        let ctx = JobContext::new(kv, FailingDeletes { inner: rows.clone() }, &config(2));
        let (source, target) = (CollectionId::new(), CollectionId::new());
        rows.seed(source, [1, 2]);

        let bulk = JobId::new();
        run_bulk_add(&ctx, bulk, source, target, &MemberSelection::All).unwrap();

        let undo = JobId::new();
        let err = run_undo(&ctx, undo, target, bulk).unwrap_err();

        assert!(err.is_transient());
        assert_eq!(ctx.ledger.members(bulk).unwrap().len(), 2);
        assert_eq!(ctx.progress.load(undo).unwrap().state, JobState::Failed);
        assert_eq!(rows.snapshot(target), vec![1, 2]);
        assert!(!ctx.interactive.is_active().unwrap());
    }
}
