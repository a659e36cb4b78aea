//! Per-job ledger of member IDs written by a bulk job.
//!
//! `operation:{job}:inserted_ids` is a set; appends are idempotent so a
//! re-recorded batch is harmless. Undo consumes the ledger and then clears it.

use std::collections::HashSet;
use std::time::Duration;

use memberflow_core::{JobId, MemberId};

use crate::kv::{KeyValueStore, KvError};

#[derive(Debug, Clone)]
pub struct InsertedIdLedger<K> {
    kv: K,
    /// Expiry refreshed on every append; unconsumed ledgers do not live forever.
    ttl: Duration,
}

impl<K: KeyValueStore> InsertedIdLedger<K> {
    pub fn new(kv: K, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    pub fn key(job: JobId) -> String {
        format!("operation:{job}:inserted_ids")
    }

    pub fn record(&self, job: JobId, members: &[MemberId]) -> Result<(), KvError> {
        if members.is_empty() {
            return Ok(());
        }
        let key = Self::key(job);
        let raw: Vec<String> = members.iter().map(|m| m.to_string()).collect();
        self.kv.set_add(&key, &raw)?;
        self.kv.expire(&key, self.ttl)?;
        Ok(())
    }

    pub fn members(&self, job: JobId) -> Result<HashSet<MemberId>, KvError> {
        self.kv
            .set_members(&Self::key(job))?
            .iter()
            .map(|raw| {
                raw.parse::<MemberId>()
                    .map_err(|e| KvError::Serialization(format!("ledger entry '{raw}': {e}")))
            })
            .collect()
    }

    pub fn clear(&self, job: JobId) -> Result<(), KvError> {
        self.kv.delete(&Self::key(job))
    }
}
