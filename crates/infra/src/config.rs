//! Configuration loading and representation.
//!
//! Defaults suit a single worker host; every field can be overridden through a
//! `MEMBERFLOW_*` environment variable (see [`OrchestratorConfig::from_env`]).

use std::time::Duration;

use memberflow_core::DomainError;

/// Tunables of the bulk-job orchestration core.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Shared coordination store.
    pub redis_url: String,
    /// Relational membership store (required by processes that write).
    pub database_url: Option<String>,
    /// Members committed per batch.
    pub batch_size: usize,
    /// Bulk jobs whose estimated delta exceeds this run on the bulk lane.
    pub lane_threshold: usize,
    /// Crash-safety expiry of collection locks.
    pub lock_ttl: Duration,
    /// Crash-safety expiry of the interactive-active marker.
    pub interactive_marker_ttl: Duration,
    /// How often a paused bulk job re-checks the marker.
    pub pause_poll_interval: Duration,
    /// Fixed per-member cost used for ETA estimates.
    pub per_item_cost: Duration,
    /// Expiry of progress records.
    pub progress_ttl: Duration,
    /// Expiry of unconsumed insert ledgers.
    pub ledger_ttl: Duration,
    /// Worker threads in the pool.
    pub workers: usize,
    /// Idle sleep between queue polls.
    pub queue_poll_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379/0".to_string(),
            database_url: None,
            batch_size: 50,
            lane_threshold: 2000,
            lock_ttl: Duration::from_secs(24 * 3600),
            interactive_marker_ttl: Duration::from_secs(3600),
            pause_poll_interval: Duration::from_secs(1),
            per_item_cost: Duration::from_millis(100),
            progress_ttl: Duration::from_secs(24 * 3600),
            ledger_ttl: Duration::from_secs(7 * 24 * 3600),
            workers: 4,
            queue_poll_interval: Duration::from_millis(100),
        }
    }
}

impl OrchestratorConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, DomainError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by `lookup` (an environment abstraction).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DomainError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("MEMBERFLOW_REDIS_URL") {
            config.redis_url = url;
        }
        config.database_url = lookup("DATABASE_URL").or(config.database_url);

        if let Some(v) = parse_var::<usize, _>(&lookup, "MEMBERFLOW_BATCH_SIZE")? {
            config.batch_size = v;
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, "MEMBERFLOW_LANE_THRESHOLD")? {
            config.lane_threshold = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "MEMBERFLOW_LOCK_TTL_SECS")? {
            config.lock_ttl = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "MEMBERFLOW_INTERACTIVE_TTL_SECS")? {
            config.interactive_marker_ttl = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "MEMBERFLOW_PAUSE_POLL_MS")? {
            config.pause_poll_interval = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "MEMBERFLOW_PER_ITEM_COST_MS")? {
            config.per_item_cost = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "MEMBERFLOW_PROGRESS_TTL_SECS")? {
            config.progress_ttl = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "MEMBERFLOW_LEDGER_TTL_SECS")? {
            config.ledger_ttl = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, "MEMBERFLOW_WORKERS")? {
            config.workers = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "MEMBERFLOW_QUEUE_POLL_MS")? {
            config.queue_poll_interval = Duration::from_millis(v);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.batch_size == 0 {
            return Err(DomainError::validation("batch_size must be at least 1"));
        }
        if self.workers == 0 {
            return Err(DomainError::validation("workers must be at least 1"));
        }
        if self.lock_ttl.is_zero() || self.interactive_marker_ttl.is_zero() {
            return Err(DomainError::validation("lock and marker TTLs must be positive"));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, DomainError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| DomainError::validation(format!("{key}='{raw}': {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = OrchestratorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.lane_threshold, 2000);
        assert_eq!(config.pause_poll_interval, Duration::from_secs(1));
        assert_eq!(config.per_item_cost, Duration::from_millis(100));
        assert_eq!(config.database_url, None);
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = OrchestratorConfig::from_lookup(lookup(&[
            ("MEMBERFLOW_BATCH_SIZE", "10"),
            ("MEMBERFLOW_PAUSE_POLL_MS", "250"),
            ("DATABASE_URL", "postgres://localhost/members"),
        ]))
        .unwrap();

        assert_eq!(config.batch_size, 10);
        assert_eq!(config.pause_poll_interval, Duration::from_millis(250));
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/members"));
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = OrchestratorConfig::from_lookup(lookup(&[("MEMBERFLOW_WORKERS", "many")]))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("MEMBERFLOW_WORKERS")));
    }

    #[test]
    fn zero_batch_size_is_invalid() {
        assert!(OrchestratorConfig::from_lookup(lookup(&[("MEMBERFLOW_BATCH_SIZE", "0")])).is_err());
    }
}
