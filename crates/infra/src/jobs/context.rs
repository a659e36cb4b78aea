//! Everything a running job needs, built once per worker process.

use std::time::Duration;

use crate::config::OrchestratorConfig;
use crate::coordination::{CancelFlags, CollectionLock, InsertedIdLedger, InteractiveMarker};
use crate::kv::KeyValueStore;
use crate::membership::MembershipStore;

use super::progress::ProgressStore;

/// Per-run tunables of bulk and undo jobs.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSettings {
    pub batch_size: usize,
    pub pause_poll_interval: Duration,
    pub per_item_cost: Duration,
}

impl From<&OrchestratorConfig> for JobSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            pause_poll_interval: config.pause_poll_interval,
            per_item_cost: config.per_item_cost,
        }
    }
}

/// Shared-store primitives, the membership store and settings.
#[derive(Debug)]
pub struct JobContext<K, M> {
    pub lock: CollectionLock<K>,
    pub cancel: CancelFlags<K>,
    pub interactive: InteractiveMarker<K>,
    pub ledger: InsertedIdLedger<K>,
    pub progress: ProgressStore<K>,
    pub members: M,
    pub settings: JobSettings,
}

impl<K, M> JobContext<K, M>
where
    K: KeyValueStore + Clone,
    M: MembershipStore,
{
    pub fn new(kv: K, members: M, config: &OrchestratorConfig) -> Self {
        Self {
            lock: CollectionLock::new(kv.clone(), config.lock_ttl),
            cancel: CancelFlags::new(kv.clone(), config.progress_ttl),
            interactive: InteractiveMarker::new(kv.clone(), config.interactive_marker_ttl),
            ledger: InsertedIdLedger::new(kv.clone(), config.ledger_ttl),
            progress: ProgressStore::new(kv, config.progress_ttl),
            members,
            settings: JobSettings::from(config),
        }
    }
}
