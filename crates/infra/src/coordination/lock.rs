//! Distributed per-collection lock.
//!
//! `collection:{id}:lock` holds the owning job ID. Acquisition is a single
//! `SET NX EX`; release is compare-and-delete so a job whose lock already
//! expired and was taken over cannot free the new owner's lock.

use std::time::Duration;

use tracing::{debug, warn};

use memberflow_core::{CollectionId, JobId};

use crate::kv::{KeyValueStore, KvError};

#[derive(Debug, Clone)]
pub struct CollectionLock<K> {
    kv: K,
    ttl: Duration,
}

impl<K: KeyValueStore> CollectionLock<K> {
    pub fn new(kv: K, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    pub fn key(collection: CollectionId) -> String {
        format!("collection:{collection}:lock")
    }

    /// Try to become the single writer of `collection`.
    pub fn acquire(&self, collection: CollectionId, job: JobId) -> Result<bool, KvError> {
        let acquired = self
            .kv
            .set_if_absent(&Self::key(collection), &job.to_string(), self.ttl)?;
        debug!(collection_id = %collection, job_id = %job, acquired, "collection lock acquire");
        Ok(acquired)
    }

    /// Release the lock if `job` still owns it. Returns whether a key was removed.
    pub fn release(&self, collection: CollectionId, job: JobId) -> Result<bool, KvError> {
        let released = self
            .kv
            .delete_if_equals(&Self::key(collection), &job.to_string())?;
        debug!(collection_id = %collection, job_id = %job, released, "collection lock release");
        Ok(released)
    }

    /// Raw owner value of the lock, if held.
    pub fn holder(&self, collection: CollectionId) -> Result<Option<String>, KvError> {
        self.kv.get(&Self::key(collection))
    }

    pub fn is_held(&self, collection: CollectionId) -> Result<bool, KvError> {
        self.kv.exists(&Self::key(collection))
    }

    /// Acquire and wrap the ownership in a lease that releases on drop.
    ///
    /// `Ok(None)` means another job holds the collection.
    pub fn try_lease(
        &self,
        collection: CollectionId,
        job: JobId,
    ) -> Result<Option<LockLease<'_, K>>, KvError> {
        if !self.acquire(collection, job)? {
            return Ok(None);
        }
        Ok(Some(LockLease {
            lock: self,
            collection,
            job,
            released: false,
        }))
    }
}

/// Ownership of one collection lock.
///
/// Released exactly once: explicitly via [`LockLease::release`] or, on any
/// other exit path (errors, panics), when dropped.
#[derive(Debug)]
pub struct LockLease<'a, K: KeyValueStore> {
    lock: &'a CollectionLock<K>,
    collection: CollectionId,
    job: JobId,
    released: bool,
}

impl<K: KeyValueStore> LockLease<'_, K> {
    pub fn collection(&self) -> CollectionId {
        self.collection
    }

    pub fn release(mut self) -> Result<bool, KvError> {
        self.released = true;
        self.lock.release(self.collection, self.job)
    }
}

impl<K: KeyValueStore> Drop for LockLease<'_, K> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.lock.release(self.collection, self.job) {
            // The TTL still frees the collection eventually.
            warn!(
                collection_id = %self.collection,
                job_id = %self.job,
                error = %e,
                "failed to release collection lock"
            );
        }
    }
}
