//! Progress records in the shared store (`operation:{job}:progress`).

use std::time::Duration;

use tracing::warn;

use memberflow_core::JobId;

use crate::kv::{KeyValueStore, KvError};

use super::types::JobProgress;

#[derive(Debug, Clone)]
pub struct ProgressStore<K> {
    kv: K,
    ttl: Duration,
}

impl<K: KeyValueStore> ProgressStore<K> {
    pub fn new(kv: K, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    pub fn key(job: JobId) -> String {
        format!("operation:{job}:progress")
    }

    pub fn record(&self, progress: &JobProgress) -> Result<(), KvError> {
        let payload = serde_json::to_string(progress)
            .map_err(|e| KvError::Serialization(e.to_string()))?;
        self.kv
            .set(&Self::key(progress.job_id), &payload, Some(self.ttl))
    }

    /// Current record of `job`.
    ///
    /// A missing record reads as `Pending` (queued jobs have no record yet on
    /// some schedulers); an undecodable one reads as `Unknown`.
    pub fn load(&self, job: JobId) -> Result<JobProgress, KvError> {
        let Some(raw) = self.kv.get(&Self::key(job))? else {
            return Ok(JobProgress::pending(job));
        };

        match serde_json::from_str::<JobProgress>(&raw) {
            Ok(progress) if progress.job_id == job => Ok(progress),
            Ok(progress) => {
                warn!(job_id = %job, found = %progress.job_id, "progress record belongs to another job");
                Ok(JobProgress::unknown(job, "progress record belongs to another job"))
            }
            Err(e) => {
                warn!(job_id = %job, error = %e, "undecodable progress record");
                Ok(JobProgress::unknown(job, format!("undecodable progress record: {e}")))
            }
        }
    }
}
