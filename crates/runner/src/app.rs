//! Wiring of the shared store, the membership database and the worker pool.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use memberflow_core::{CollectionId, JobId, MemberId};
use memberflow_infra::control::ControlSurface;
use memberflow_infra::coordination::CancelFlags;
use memberflow_infra::jobs::{
    InMemoryJobQueue, JobContext, JobProgress, JobState, MemberSelection, ProgressStore,
    WorkerPool, WorkerPoolConfig, WorkerPoolHandle,
};
use memberflow_infra::kv::RedisKeyValueStore;
use memberflow_infra::membership::PostgresMembershipStore;
use memberflow_infra::OrchestratorConfig;

use crate::render;

type Kv = Arc<RedisKeyValueStore>;
type Members = Arc<PostgresMembershipStore>;

const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);

struct Services {
    control: ControlSurface<Kv, Members, Arc<InMemoryJobQueue>>,
    pool: WorkerPoolHandle,
    // Dropped last: database calls block on this runtime.
    _runtime: tokio::runtime::Runtime,
}

impl Services {
    fn start(config: &OrchestratorConfig) -> Result<Self> {
        let database_url = config
            .database_url
            .as_deref()
            .context("DATABASE_URL must be set to run jobs")?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("memberflow-db")
            .build()
            .context("failed to start async runtime")?;

        let pg = runtime
            .block_on(
                PgPoolOptions::new()
                    .max_connections(config.workers as u32 + 1)
                    .connect(database_url),
            )
            .context("failed to connect to the membership database")?;
        let members = Arc::new(PostgresMembershipStore::new(pg, runtime.handle().clone()));
        members
            .ensure_schema()
            .context("failed to prepare the membership schema")?;

        let ctx = Arc::new(JobContext::new(shared_store(config)?, members, config));
        let queue = InMemoryJobQueue::arc();
        let control = ControlSurface::new(ctx.clone(), queue.clone(), config.lane_threshold);
        let pool = WorkerPool::new(ctx, queue)
            .spawn(WorkerPoolConfig::from(config))
            .context("failed to start the worker pool")?;

        Ok(Self {
            control,
            pool,
            _runtime: runtime,
        })
    }

    /// Poll until `job` reaches a terminal state, printing each change.
    fn follow(&self, job: JobId) -> Result<JobProgress> {
        let mut last: Option<String> = None;
        loop {
            let progress = self.control.status(job)?;
            let line = render::line(&progress);
            if last.as_deref() != Some(line.as_str()) {
                println!("{line}");
                last = Some(line);
            }
            if progress.state.is_terminal() {
                return Ok(progress);
            }
            thread::sleep(STATUS_POLL_INTERVAL);
        }
    }

    fn shutdown(self) {
        self.pool.shutdown();
    }
}

fn shared_store(config: &OrchestratorConfig) -> Result<Kv> {
    let kv = RedisKeyValueStore::new(&config.redis_url).context("failed to open the shared store")?;
    Ok(Arc::new(kv))
}

fn finish(progress: JobProgress) -> Result<()> {
    match progress.state {
        JobState::Failed => bail!(
            "job {} failed: {}",
            progress.job_id,
            progress.message.unwrap_or_default()
        ),
        _ => Ok(()),
    }
}

pub fn bulk_add(
    config: &OrchestratorConfig,
    source: CollectionId,
    target: CollectionId,
    ids: Option<Vec<MemberId>>,
) -> Result<()> {
    let selection = match ids {
        Some(ids) => MemberSelection::Selected(ids),
        None => MemberSelection::All,
    };

    let services = Services::start(config)?;
    let outcome = services
        .control
        .submit(source, target, selection)
        .map_err(anyhow::Error::from)
        .and_then(|job| {
            println!("job {job}");
            services.follow(job)
        });
    services.shutdown();

    finish(outcome?)
}

pub fn undo(config: &OrchestratorConfig, job: JobId, target: CollectionId) -> Result<()> {
    let services = Services::start(config)?;
    let outcome = services
        .control
        .undo(job, target)
        .map_err(anyhow::Error::from)
        .and_then(|undo| {
            println!("job {undo}");
            services.follow(undo)
        });
    services.shutdown();

    finish(outcome?)
}

pub fn status(config: &OrchestratorConfig, job: JobId, json: bool) -> Result<()> {
    let progress = ProgressStore::new(shared_store(config)?, config.progress_ttl).load(job)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&progress)?);
    } else {
        println!("{}", render::line(&progress));
    }
    Ok(())
}

pub fn cancel(config: &OrchestratorConfig, job: JobId) -> Result<()> {
    CancelFlags::new(shared_store(config)?, config.progress_ttl).request(job)?;
    info!(job_id = %job, "cancel requested");
    println!("cancel requested for {job}");
    Ok(())
}
