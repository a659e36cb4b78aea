//! Worker pool: threads that claim queued jobs and run them to a terminal state.
//!
//! Every worker serves both lanes through `JobQueue::claim_next`, which hands
//! out interactive work first. Bulk jobs yield to interactive ones at runtime
//! through the interactive marker, not through the pool.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, info_span, warn};

use crate::config::OrchestratorConfig;
use crate::kv::KeyValueStore;
use crate::membership::MembershipStore;

use super::bulk::{clear_cancel_best_effort, record_best_effort, run_bulk_add};
use super::context::JobContext;
use super::error::JobError;
use super::queue::JobQueue;
use super::types::{BulkAddReport, Job, JobKind, JobOutcome, JobProgress, JobState};
use super::undo::run_undo;

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// How long an idle worker sleeps before polling the queue again
    pub poll_interval: Duration,
    /// Number of worker threads
    pub workers: usize,
    /// Thread name prefix, also used in logs
    pub name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            workers: 4,
            name: "memberflow-worker".to_string(),
        }
    }
}

impl From<&OrchestratorConfig> for WorkerPoolConfig {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            poll_interval: config.queue_poll_interval,
            workers: config.workers,
            ..Self::default()
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Handle to a running pool.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    shutdown: Arc<AtomicBool>,
    joins: Vec<thread::JoinHandle<()>>,
    stats: Arc<Mutex<PoolStats>>,
}

impl WorkerPoolHandle {
    /// Stop claiming new jobs and wait for running ones to finish.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for join in self.joins.drain(..) {
            if join.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

/// Pool runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PoolStats {
    pub jobs_processed: u64,
    pub jobs_completed: u64,
    pub jobs_cancelled: u64,
    pub jobs_failed: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

impl PoolStats {
    fn record(&mut self, result: &Result<JobOutcome, JobError>) {
        self.jobs_processed += 1;
        match result.as_ref().map(JobOutcome::state) {
            Ok(JobState::Cancelled) => self.jobs_cancelled += 1,
            Ok(_) => self.jobs_completed += 1,
            Err(_) => self.jobs_failed += 1,
        }
    }
}

/// Runs bulk and undo jobs claimed from a queue.
pub struct WorkerPool<K, M, Q> {
    ctx: Arc<JobContext<K, M>>,
    queue: Q,
}

impl<K, M, Q> WorkerPool<K, M, Q>
where
    K: KeyValueStore,
    M: MembershipStore,
    Q: JobQueue,
{
    pub fn new(ctx: Arc<JobContext<K, M>>, queue: Q) -> Self {
        Self { ctx, queue }
    }

    pub fn context(&self) -> &JobContext<K, M> {
        &self.ctx
    }

    /// Execute a single job on the calling thread (tests, synchronous use).
    pub fn execute_one(&self, job: &Job) -> Result<JobOutcome, JobError> {
        let span = info_span!(
            "job",
            job_id = %job.id,
            kind = job.kind.type_name(),
            lane = job.lane.as_str()
        );
        let _entered = span.enter();

        match &job.kind {
            JobKind::BulkAdd {
                source,
                target,
                selection,
            } => {
                if self.cancelled_before_start(job)? {
                    return Ok(JobOutcome::BulkAdd(BulkAddReport {
                        state: JobState::Cancelled,
                        current: 0,
                        inserted: 0,
                        total: 0,
                    }));
                }
                run_bulk_add(&self.ctx, job.id, *source, *target, selection)
                    .map(JobOutcome::BulkAdd)
            }
            JobKind::Undo {
                target,
                job_to_undo,
            } => run_undo(&self.ctx, job.id, *target, *job_to_undo).map(JobOutcome::Undo),
        }
    }

    /// A job cancelled while still queued ends without touching its target.
    fn cancelled_before_start(&self, job: &Job) -> Result<bool, JobError> {
        let requested = match self.ctx.cancel.is_requested(job.id) {
            Ok(requested) => requested,
            Err(e) => {
                record_best_effort(&self.ctx, &JobProgress::failed(job.id, 0, 0, e.to_string()));
                return Err(e.into());
            }
        };
        if requested {
            info!(job_id = %job.id, "job cancelled before start");
            record_best_effort(&self.ctx, &JobProgress::cancelled(job.id, 0, 0));
            clear_cancel_best_effort(&self.ctx, job.id);
        }
        Ok(requested)
    }

    /// Spawn `config.workers` threads serving the queue.
    pub fn spawn(self, config: WorkerPoolConfig) -> io::Result<WorkerPoolHandle>
    where
        K: 'static,
        M: 'static,
        Q: 'static,
    {
        let pool = Arc::new(self);
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(PoolStats::default()));
        let started = Instant::now();

        let mut handle = WorkerPoolHandle {
            shutdown: shutdown.clone(),
            joins: Vec::with_capacity(config.workers),
            stats: stats.clone(),
        };

        for index in 0..config.workers.max(1) {
            let name = format!("{}-{index}", config.name);
            let worker = Worker {
                pool: pool.clone(),
                name: name.clone(),
                poll_interval: config.poll_interval,
                shutdown: shutdown.clone(),
                stats: stats.clone(),
                started,
            };

            match thread::Builder::new().name(name).spawn(move || worker.run()) {
                Ok(join) => handle.joins.push(join),
                Err(e) => {
                    error!(pool = %config.name, error = %e, "failed to spawn worker thread");
                    handle.shutdown();
                    return Err(e);
                }
            }
        }

        info!(pool = %config.name, workers = handle.joins.len(), "worker pool started");
        Ok(handle)
    }
}

struct Worker<K, M, Q> {
    pool: Arc<WorkerPool<K, M, Q>>,
    name: String,
    poll_interval: Duration,
    shutdown: Arc<AtomicBool>,
    stats: Arc<Mutex<PoolStats>>,
    started: Instant,
}

impl<K, M, Q> Worker<K, M, Q>
where
    K: KeyValueStore,
    M: MembershipStore,
    Q: JobQueue,
{
    fn run(self) {
        info!(worker = %self.name, "worker started");

        while !self.shutdown.load(Ordering::SeqCst) {
            self.update_stats(|s| s.uptime_secs = self.started.elapsed().as_secs());

            match self.pool.queue.claim_next() {
                Ok(Some(job)) => {
                    debug!(
                        worker = %self.name,
                        job_id = %job.id,
                        kind = job.kind.type_name(),
                        lane = job.lane.as_str(),
                        "claimed job"
                    );
                    self.update_stats(|s| s.current_running += 1);

                    let result = self.pool.execute_one(&job);

                    self.update_stats(|s| {
                        s.current_running = s.current_running.saturating_sub(1);
                        s.record(&result);
                    });

                    if let Err(e) = result {
                        debug!(worker = %self.name, job_id = %job.id, error = %e, "job failed");
                    }
                }
                Ok(None) => thread::sleep(self.poll_interval),
                Err(e) => {
                    error!(worker = %self.name, error = %e, "failed to claim job");
                    thread::sleep(self.poll_interval);
                }
            }
        }

        info!(worker = %self.name, "worker stopped");
    }

    fn update_stats(&self, update: impl FnOnce(&mut PoolStats)) {
        match self.stats.lock() {
            Ok(mut stats) => update(&mut stats),
            Err(_) => warn!(worker = %self.name, "pool stats lock poisoned"),
        }
    }
}
