//! Bulk add job: copy the source/target delta into the target collection.
//!
//! Lifecycle: `STARTED → {IN_PROGRESS ⇄ PAUSED} → COMPLETED | CANCELLED | FAILED`.
//!
//! - The target collection's lock is held for the whole run and released on
//!   every exit path.
//! - The delta is computed once; the lock keeps other writers off the target.
//! - Members are committed in fixed-size batches. Each committed batch is
//!   durable and appended to the job's insert ledger, so a crash leaves a
//!   consistent prefix that undo or a resubmission can deal with.
//! - Before every member the job polls its cancel flag and the interactive
//!   marker. Members buffered in an uncommitted batch are dropped on cancel.

use std::thread;

use tracing::{debug, error, info, warn};

use memberflow_core::{CollectionId, JobId, MemberId};

use crate::kv::KeyValueStore;
use crate::membership::MembershipStore;

use super::context::JobContext;
use super::delta::compute_delta;
use super::error::JobError;
use super::types::{BulkAddReport, JobProgress, JobState, MemberSelection};

pub const LOCK_HELD_MESSAGE: &str =
    "Another bulk operation is already writing to the target collection.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Checkpoint {
    Continue,
    Cancelled,
}

/// Run a bulk add to completion, cancellation or failure.
///
/// Faults are logged, recorded as a FAILED progress record and returned.
pub fn run_bulk_add<K, M>(
    ctx: &JobContext<K, M>,
    job_id: JobId,
    source: CollectionId,
    target: CollectionId,
    selection: &MemberSelection,
) -> Result<BulkAddReport, JobError>
where
    K: KeyValueStore,
    M: MembershipStore,
{
    let lease = match ctx.lock.try_lease(target, job_id) {
        Ok(Some(lease)) => lease,
        Ok(None) => {
            warn!(job_id = %job_id, collection_id = %target, "target collection busy; bulk add refused");
            record_best_effort(ctx, &JobProgress::failed(job_id, 0, 0, LOCK_HELD_MESSAGE));
            clear_cancel_best_effort(ctx, job_id);
            return Err(JobError::LockConflict(target));
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "could not acquire collection lock");
            record_best_effort(ctx, &JobProgress::failed(job_id, 0, 0, e.to_string()));
            return Err(e.into());
        }
    };

    let mut run = BulkAddRun {
        ctx,
        job_id,
        target,
        current: 0,
        inserted: 0,
        total: 0,
    };
    let result = run.execute(source, selection);

    if let Err(e) = lease.release() {
        warn!(job_id = %job_id, collection_id = %target, error = %e, "collection lock release failed; TTL will expire it");
    }

    match result {
        Ok(report) => Ok(report),
        Err(e) => {
            error!(
                job_id = %job_id,
                collection_id = %target,
                current = run.current,
                total = run.total,
                error = %e,
                "bulk add failed"
            );
            record_best_effort(
                ctx,
                &JobProgress::failed(job_id, run.current, run.total, e.to_string()),
            );
            clear_cancel_best_effort(ctx, job_id);
            Err(e)
        }
    }
}

struct BulkAddRun<'a, K, M> {
    ctx: &'a JobContext<K, M>,
    job_id: JobId,
    target: CollectionId,
    /// Members in committed batches.
    current: u64,
    /// Rows actually written (excludes rows that already existed).
    inserted: u64,
    total: u64,
}

impl<K, M> BulkAddRun<'_, K, M>
where
    K: KeyValueStore,
    M: MembershipStore,
{
    fn execute(
        &mut self,
        source: CollectionId,
        selection: &MemberSelection,
    ) -> Result<BulkAddReport, JobError> {
        let delta = compute_delta(&self.ctx.members, source, self.target, selection)?;
        self.total = delta.len() as u64;
        self.ctx
            .progress
            .record(&JobProgress::started(self.job_id, self.total))?;
        info!(
            job_id = %self.job_id,
            source = %source,
            target = %self.target,
            total = self.total,
            "bulk add started"
        );

        let batch_size = self.ctx.settings.batch_size;
        let mut batch: Vec<MemberId> = Vec::with_capacity(batch_size.min(delta.len()));

        for member in delta {
            if self.checkpoint()? == Checkpoint::Cancelled {
                return self.finish_cancelled(batch.len());
            }

            batch.push(member);
            if batch.len() >= batch_size {
                self.commit(&mut batch)?;
            }
        }

        if !batch.is_empty() {
            self.commit(&mut batch)?;
        }

        if self.ctx.cancel.is_requested(self.job_id)? {
            return self.finish_cancelled(0);
        }

        self.ctx.progress.record(
            &JobProgress::completed(self.job_id, self.current, self.total)
                .with_inserted(self.inserted),
        )?;
        clear_cancel_best_effort(self.ctx, self.job_id);
        info!(
            job_id = %self.job_id,
            inserted = self.inserted,
            total = self.total,
            "bulk add completed"
        );

        Ok(self.report(JobState::Completed))
    }

    /// Suspension point before each member: cancel check, then pause while an
    /// interactive job is running.
    fn checkpoint(&self) -> Result<Checkpoint, JobError> {
        if self.ctx.cancel.is_requested(self.job_id)? {
            return Ok(Checkpoint::Cancelled);
        }
        if !self.ctx.interactive.is_active()? {
            return Ok(Checkpoint::Continue);
        }

        self.ctx
            .progress
            .record(&JobProgress::paused(self.job_id, self.current, self.total))?;
        info!(job_id = %self.job_id, current = self.current, "paused for interactive job");

        loop {
            thread::sleep(self.ctx.settings.pause_poll_interval);
            if self.ctx.cancel.is_requested(self.job_id)? {
                return Ok(Checkpoint::Cancelled);
            }
            if !self.ctx.interactive.is_active()? {
                break;
            }
        }

        self.ctx.progress.record(
            &self
                .in_progress()
                .with_message("resumed after interactive job"),
        )?;
        info!(job_id = %self.job_id, current = self.current, "resumed");
        Ok(Checkpoint::Continue)
    }

    /// Commit one batch, then extend the ledger with what it wrote.
    fn commit(&mut self, batch: &mut Vec<MemberId>) -> Result<(), JobError> {
        let written = self.ctx.members.insert_batch(self.target, batch)?;
        // Counted as soon as the rows are durable, so a ledger failure still
        // reports them.
        self.current += batch.len() as u64;
        self.inserted += written.len() as u64;
        self.ctx.ledger.record(self.job_id, &written)?;
        debug!(
            job_id = %self.job_id,
            batch = batch.len(),
            written = written.len(),
            current = self.current,
            total = self.total,
            "batch committed"
        );
        batch.clear();

        // The last batch goes straight to the terminal record, so 100% is only
        // ever published by COMPLETED.
        if self.current < self.total {
            self.ctx.progress.record(&self.in_progress())?;
        }
        Ok(())
    }

    fn finish_cancelled(&self, dropped: usize) -> Result<BulkAddReport, JobError> {
        self.ctx.progress.record(
            &JobProgress::cancelled(self.job_id, self.current, self.total)
                .with_inserted(self.inserted),
        )?;
        clear_cancel_best_effort(self.ctx, self.job_id);
        info!(
            job_id = %self.job_id,
            current = self.current,
            total = self.total,
            uncommitted = dropped,
            "bulk add cancelled"
        );
        Ok(self.report(JobState::Cancelled))
    }

    fn in_progress(&self) -> JobProgress {
        JobProgress::in_progress(
            self.job_id,
            self.current,
            self.total,
            self.ctx.settings.per_item_cost.as_secs_f64(),
        )
    }

    fn report(&self, state: JobState) -> BulkAddReport {
        BulkAddReport {
            state,
            current: self.current,
            inserted: self.inserted,
            total: self.total,
        }
    }
}

pub(crate) fn record_best_effort<K, M>(ctx: &JobContext<K, M>, progress: &JobProgress)
where
    K: KeyValueStore,
{
    if let Err(e) = ctx.progress.record(progress) {
        warn!(job_id = %progress.job_id, state = ?progress.state, error = %e, "failed to record progress");
    }
}

pub(crate) fn clear_cancel_best_effort<K, M>(ctx: &JobContext<K, M>, job_id: JobId)
where
    K: KeyValueStore,
{
    if let Err(e) = ctx.cancel.clear(job_id) {
        warn!(job_id = %job_id, error = %e, "failed to clear cancel flag");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use super::*;
    use crate::coordination::CancelFlags;
    use crate::jobs::context::testing::{config, context};
    use crate::kv::{InMemoryKeyValueStore, KvError};
    use crate::membership::{InMemoryMembershipStore, MembershipStoreError};

    fn ids(values: &[i64]) -> Vec<MemberId> {
        values.iter().copied().map(MemberId::new).collect()
    }

    #[test]
    fn copies_whole_source_into_empty_target() {
        let (ctx, _kv, members) = context(2);
        let (source, target, job) = (CollectionId::new(), CollectionId::new(), JobId::new());
        members.seed(source, [1, 2, 3, 4]);

        let report = run_bulk_add(&ctx, job, source, target, &MemberSelection::All).unwrap();

        assert_eq!(report.state, JobState::Completed);
        assert_eq!((report.current, report.inserted, report.total), (4, 4, 4));
        assert_eq!(members.snapshot(target), vec![1, 2, 3, 4]);

        let status = ctx.progress.load(job).unwrap();
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.inserted, Some(4));
        assert_eq!(status.percent, Some(100.0));

        assert!(!ctx.lock.is_held(target).unwrap());
        assert_eq!(ctx.ledger.members(job).unwrap().len(), 4);
    }

    #[test]
    fn selection_restricts_to_missing_members() {
        let (ctx, _kv, members) = context(10);
        let (source, target, job) = (CollectionId::new(), CollectionId::new(), JobId::new());
        members.seed(source, [1, 2, 3]);
        members.seed(target, [2]);

        let selection = MemberSelection::Selected(ids(&[2, 3, 99]));
        let report = run_bulk_add(&ctx, job, source, target, &selection).unwrap();

        assert_eq!(report.state, JobState::Completed);
        assert_eq!((report.inserted, report.total), (1, 1));
        assert_eq!(members.snapshot(target), vec![2, 3]);
        assert_eq!(
            ctx.ledger.members(job).unwrap(),
            HashSet::from([MemberId::new(3)])
        );
    }

    #[test]
    fn empty_delta_completes_immediately() {
        let (ctx, _kv, members) = context(2);
        let (source, target, job) = (CollectionId::new(), CollectionId::new(), JobId::new());
        members.seed(source, [1, 2]);
        members.seed(target, [1, 2]);

        let report = run_bulk_add(&ctx, job, source, target, &MemberSelection::All).unwrap();

        assert_eq!(report.state, JobState::Completed);
        assert_eq!((report.current, report.inserted, report.total), (0, 0, 0));
        assert_eq!(ctx.progress.load(job).unwrap().percent, Some(100.0));
        assert!(!ctx.lock.is_held(target).unwrap());
    }

    #[test]
    fn held_lock_refuses_without_writing() {
        let (ctx, _kv, members) = context(2);
        let (source, target, job) = (CollectionId::new(), CollectionId::new(), JobId::new());
        members.seed(source, [1, 2, 3]);
        let other = JobId::new();
        assert!(ctx.lock.acquire(target, other).unwrap());

        let err = run_bulk_add(&ctx, job, source, target, &MemberSelection::All).unwrap_err();

        assert!(matches!(err, JobError::LockConflict(c) if c == target));
        assert!(members.snapshot(target).is_empty());
        let status = ctx.progress.load(job).unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.message.as_deref(), Some(LOCK_HELD_MESSAGE));
        // The other job's lock is untouched.
        assert_eq!(
            ctx.lock.holder(target).unwrap(),
            Some(other.to_string())
        );
    }

    #[test]
    fn cancel_before_start_writes_nothing() {
        let (ctx, _kv, members) = context(2);
        let (source, target, job) = (CollectionId::new(), CollectionId::new(), JobId::new());
        members.seed(source, [1, 2, 3]);
        ctx.cancel.request(job).unwrap();

        let report = run_bulk_add(&ctx, job, source, target, &MemberSelection::All).unwrap();

        assert_eq!(report.state, JobState::Cancelled);
        assert_eq!((report.current, report.total), (0, 3));
        assert!(members.snapshot(target).is_empty());

        let status = ctx.progress.load(job).unwrap();
        assert_eq!(status.state, JobState::Cancelled);
        assert_eq!(status.current, 0);
        assert!(!ctx.cancel.is_requested(job).unwrap());
        assert!(!ctx.lock.is_held(target).unwrap());
    }

    /// Requests cancellation of `job` right after the first committed batch.
    struct CancelAfterFirstBatch {
        inner: Arc<InMemoryMembershipStore>,
        flags: CancelFlags<Arc<InMemoryKeyValueStore>>,
        job: JobId,
    }

    impl MembershipStore for CancelAfterFirstBatch {
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
            let written = self.inner.insert_batch(collection, members)?;
            self.flags
                .request(self.job)
                .map_err(|e| MembershipStoreError::Unavailable(e.to_string()))?;
            Ok(written)
        }

        fn delete_members(
            &self,
            collection: CollectionId,
            members: &HashSet<MemberId>,
        ) -> Result<u64, MembershipStoreError> {
            self.inner.delete_members(collection, members)
        }
    }

    #[test]
    fn cancel_mid_run_keeps_committed_batches() {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let rows = Arc::new(InMemoryMembershipStore::new());
        let (source, target, job) = (CollectionId::new(), CollectionId::new(), JobId::new());
        rows.seed(source, [1, 2, 3, 4, 5]);

        let store = CancelAfterFirstBatch {
            inner: rows.clone(),
            flags: CancelFlags::new(kv.clone(), Duration::from_secs(60)),
            job,
        };
        let ctx = JobContext::new(kv, store, &config(2));

        let report = run_bulk_add(&ctx, job, source, target, &MemberSelection::All).unwrap();

        assert_eq!(report.state, JobState::Cancelled);
        assert_eq!((report.current, report.inserted, report.total), (2, 2, 5));
        assert_eq!(rows.snapshot(target), vec![1, 2]);
        assert_eq!(ctx.ledger.members(job).unwrap().len(), 2);

        let status = ctx.progress.load(job).unwrap();
        assert_eq!(status.state, JobState::Cancelled);
        assert_eq!(status.inserted, Some(2));
        assert!(!ctx.lock.is_held(target).unwrap());
    }

    #[test]
    fn pauses_while_interactive_job_runs() {
        let (ctx, _kv, members) = context(2);
        let (source, target, job) = (CollectionId::new(), CollectionId::new(), JobId::new());
        members.seed(source, [1, 2, 3]);
        let interactive = JobId::new();
        ctx.interactive.mark(interactive).unwrap();

        let report = std::thread::scope(|s| {
            let handle = s.spawn(|| run_bulk_add(&ctx, job, source, target, &MemberSelection::All));

            let deadline = Instant::now() + Duration::from_secs(5);
            while ctx.progress.load(job).unwrap().state != JobState::Paused {
                assert!(Instant::now() < deadline, "job never paused");
                std::thread::sleep(Duration::from_millis(2));
            }
            assert!(members.snapshot(target).is_empty());
            assert!(ctx.lock.is_held(target).unwrap());

            ctx.interactive.clear(interactive).unwrap();
            handle.join().unwrap()
        })
        .unwrap();

        assert_eq!(report.state, JobState::Completed);
        assert_eq!(members.snapshot(target), vec![1, 2, 3]);
    }

    #[test]
    fn cancel_while_paused_ends_job() {
        let (ctx, _kv, members) = context(2);
        let (source, target, job) = (CollectionId::new(), CollectionId::new(), JobId::new());
        members.seed(source, [1, 2, 3]);
        ctx.interactive.mark(JobId::new()).unwrap();

        let report = std::thread::scope(|s| {
            let handle = s.spawn(|| run_bulk_add(&ctx, job, source, target, &MemberSelection::All));

            let deadline = Instant::now() + Duration::from_secs(5);
            while ctx.progress.load(job).unwrap().state != JobState::Paused {
                assert!(Instant::now() < deadline, "job never paused");
                std::thread::sleep(Duration::from_millis(2));
            }
            ctx.cancel.request(job).unwrap();
            handle.join().unwrap()
        })
        .unwrap();

        assert_eq!(report.state, JobState::Cancelled);
        assert_eq!(report.current, 0);
        assert!(members.snapshot(target).is_empty());
        assert!(!ctx.lock.is_held(target).unwrap());
    }

    struct FailingInserts {
        inner: Arc<InMemoryMembershipStore>,
    }

    impl MembershipStore for FailingInserts {
        fn members(
            &self,
            collection: CollectionId,
            selection: Option<&HashSet<MemberId>>,
        ) -> Result<HashSet<MemberId>, MembershipStoreError> {
            self.inner.members(collection, selection)
        }

        fn insert_batch(
            &self,
            _collection: CollectionId,
            _members: &[MemberId],
        ) -> Result<Vec<MemberId>, MembershipStoreError> {
            Err(MembershipStoreError::Database("disk full".to_string()))
        }

        fn delete_members(
            &self,
            collection: CollectionId,
            members: &HashSet<MemberId>,
        ) -> Result<u64, MembershipStoreError> {
            self.inner.delete_members(collection, members)
        }
    }

    #[test]
    fn store_fault_fails_job_and_releases_lock() {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let rows = Arc::new(InMemoryMembershipStore::new());
        let (source, target, job) = (CollectionId::new(), CollectionId::new(), JobId::new());
        rows.seed(source, [1, 2, 3]);
        let ctx = JobContext::new(kv, FailingInserts { inner: rows.clone() }, &config(2));

        let err = run_bulk_add(&ctx, job, source, target, &MemberSelection::All).unwrap_err();

        assert!(matches!(err, JobError::Membership(_)));
        let status = ctx.progress.load(job).unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert!(status.message.unwrap().contains("disk full"));
        assert!(!ctx.lock.is_held(target).unwrap());
        assert!(rows.snapshot(target).is_empty());
    }

    /// Accepts the first `accept` ledger writes, then refuses the rest.
    struct LedgerRejectingKv {
        inner: InMemoryKeyValueStore,
        accept: Mutex<usize>,
    }

    impl KeyValueStore for LedgerRejectingKv {
        fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
            self.inner.set_if_absent(key, value, ttl)
        }

        fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
            self.inner.set(key, value, ttl)
        }

        fn get(&self, key: &str) -> Result<Option<String>, KvError> {
            self.inner.get(key)
        }

        fn exists(&self, key: &str) -> Result<bool, KvError> {
            self.inner.exists(key)
        }

        fn delete(&self, key: &str) -> Result<(), KvError> {
            self.inner.delete(key)
        }

        fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
            self.inner.expire(key, ttl)
        }

        fn set_add(&self, key: &str, members: &[String]) -> Result<(), KvError> {
            let mut accept = self.accept.lock().unwrap();
            if *accept == 0 {
                return Err(KvError::Command("OOM command not allowed".to_string()));
            }
            *accept -= 1;
            self.inner.set_add(key, members)
        }

        fn set_members(&self, key: &str) -> Result<Vec<String>, KvError> {
            self.inner.set_members(key)
        }
    }

    #[test]
    fn ledger_fault_reports_rows_already_committed() {
        let kv = Arc::new(LedgerRejectingKv {
            inner: InMemoryKeyValueStore::new(),
            accept: Mutex::new(1),
        });
        let rows = Arc::new(InMemoryMembershipStore::new());
        let (source, target, job) = (CollectionId::new(), CollectionId::new(), JobId::new());
        rows.seed(source, 1..=5);
        let ctx = JobContext::new(kv, rows.clone(), &config(2));

        let err = run_bulk_add(&ctx, job, source, target, &MemberSelection::All).unwrap_err();

        assert!(matches!(err, JobError::SharedStore(_)));
        // The second batch reached the table before its ledger write failed.
        assert_eq!(rows.snapshot(target), vec![1, 2, 3, 4]);
        let status = ctx.progress.load(job).unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!((status.current, status.total), (4, 5));
        assert!(status.message.unwrap().contains("OOM"));
        assert!(!ctx.lock.is_held(target).unwrap());
    }

    /// Captures every progress record written for one job.
    struct RecordingKv {
        inner: InMemoryKeyValueStore,
        progress_key: String,
        seen: Mutex<Vec<JobProgress>>,
    }

    impl KeyValueStore for RecordingKv {
        fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
            self.inner.set_if_absent(key, value, ttl)
        }

        fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
            if key == self.progress_key {
                let record: JobProgress = serde_json::from_str(value).unwrap();
                self.seen.lock().unwrap().push(record);
            }
            self.inner.set(key, value, ttl)
        }

        fn get(&self, key: &str) -> Result<Option<String>, KvError> {
            self.inner.get(key)
        }

        fn exists(&self, key: &str) -> Result<bool, KvError> {
            self.inner.exists(key)
        }

        fn delete(&self, key: &str) -> Result<(), KvError> {
            self.inner.delete(key)
        }

        fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
            self.inner.expire(key, ttl)
        }

        fn set_add(&self, key: &str, members: &[String]) -> Result<(), KvError> {
            self.inner.set_add(key, members)
        }

        fn set_members(&self, key: &str) -> Result<Vec<String>, KvError> {
            self.inner.set_members(key)
        }
    }

    #[test]
    fn progress_is_monotonic_and_ends_terminal() {
        let job = JobId::new();
        let kv = Arc::new(RecordingKv {
            inner: InMemoryKeyValueStore::new(),
            progress_key: crate::jobs::progress::ProgressStore::<RecordingKv>::key(job),
            seen: Mutex::new(Vec::new()),
        });
        let rows = Arc::new(InMemoryMembershipStore::new());
        let (source, target) = (CollectionId::new(), CollectionId::new());
        rows.seed(source, 1..=7);
        let ctx = JobContext::new(kv.clone(), rows, &config(3));

        run_bulk_add(&ctx, job, source, target, &MemberSelection::All).unwrap();

        let seen = kv.seen.lock().unwrap();
        let states: Vec<JobState> = seen.iter().map(|p| p.state).collect();
        assert_eq!(
            states,
            vec![
                JobState::Started,
                JobState::InProgress,
                JobState::InProgress,
                JobState::Completed
            ]
        );
        assert!(seen.windows(2).all(|w| w[0].current <= w[1].current));
        assert!(seen.iter().all(|p| p.total == 7));
        assert!(
            seen.iter()
                .filter(|p| p.state == JobState::InProgress)
                .all(|p| p.percent.unwrap() < 100.0)
        );
        assert_eq!(seen.last().unwrap().current, 7);
    }
}
