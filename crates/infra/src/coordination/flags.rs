//! Cooperative control flags: per-job cancellation and the global
//! interactive-active marker.

use std::time::Duration;

use tracing::{debug, warn};

use memberflow_core::JobId;

use crate::kv::{KeyValueStore, KvError};

const CANCEL_SET: &str = "1";
const INTERACTIVE_KEY: &str = "interactive:active";

/// Per-job cancellation bits (`operation:{job}:cancel`).
///
/// Presence-only; running jobs poll it at their suspension points. Flags
/// nobody consumes (finished or unknown jobs) expire after `ttl`.
#[derive(Debug, Clone)]
pub struct CancelFlags<K> {
    kv: K,
    ttl: Duration,
}

impl<K: KeyValueStore> CancelFlags<K> {
    pub fn new(kv: K, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    pub fn key(job: JobId) -> String {
        format!("operation:{job}:cancel")
    }

    /// Idempotently request cancellation of `job`.
    pub fn request(&self, job: JobId) -> Result<(), KvError> {
        self.kv.set(&Self::key(job), CANCEL_SET, Some(self.ttl))
    }

    pub fn is_requested(&self, job: JobId) -> Result<bool, KvError> {
        Ok(self.kv.get(&Self::key(job))?.as_deref() == Some(CANCEL_SET))
    }

    pub fn clear(&self, job: JobId) -> Result<(), KvError> {
        self.kv.delete(&Self::key(job))
    }
}

/// Global "an interactive job is running" marker.
///
/// A single key holding the most recent interactive job's ID, with a safety
/// TTL so a crashed interactive job cannot starve bulk jobs. Last writer wins:
/// when two interactive jobs overlap, the marker belongs to whichever set it
/// last, and only that job's exit clears it.
#[derive(Debug, Clone)]
pub struct InteractiveMarker<K> {
    kv: K,
    ttl: Duration,
}

impl<K: KeyValueStore> InteractiveMarker<K> {
    pub fn new(kv: K, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    pub fn key() -> &'static str {
        INTERACTIVE_KEY
    }

    pub fn mark(&self, job: JobId) -> Result<(), KvError> {
        self.kv.set(INTERACTIVE_KEY, &job.to_string(), Some(self.ttl))
    }

    pub fn is_active(&self) -> Result<bool, KvError> {
        self.kv.exists(INTERACTIVE_KEY)
    }

    pub fn holder(&self) -> Result<Option<String>, KvError> {
        self.kv.get(INTERACTIVE_KEY)
    }

    /// Clear the marker only if `job` set it last.
    pub fn clear(&self, job: JobId) -> Result<bool, KvError> {
        self.kv.delete_if_equals(INTERACTIVE_KEY, &job.to_string())
    }

    /// Mark `job` as the running interactive job for the guard's lifetime.
    pub fn enter(&self, job: JobId) -> Result<InteractiveGuard<'_, K>, KvError> {
        self.mark(job)?;
        debug!(job_id = %job, "interactive marker set");
        Ok(InteractiveGuard { marker: self, job })
    }
}

/// Clears the interactive marker (if still owned) when dropped.
#[derive(Debug)]
pub struct InteractiveGuard<'a, K: KeyValueStore> {
    marker: &'a InteractiveMarker<K>,
    job: JobId,
}

impl<K: KeyValueStore> Drop for InteractiveGuard<'_, K> {
    fn drop(&mut self) {
        match self.marker.clear(self.job) {
            Ok(cleared) => debug!(job_id = %self.job, cleared, "interactive marker exit"),
            Err(e) => warn!(job_id = %self.job, error = %e, "failed to clear interactive marker"),
        }
    }
}
