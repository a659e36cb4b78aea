//! Shared key-value store boundary.
//!
//! Every cross-worker coordination primitive (collection locks, cancel flags,
//! the interactive-active marker, insert ledgers, progress records) is built on
//! this small command set. Workers may live in different processes, so nothing
//! here relies on in-process shared state.
//!
//! Implementations:
//! - `InMemoryKeyValueStore` (tests/dev; emulates key expiry)
//! - `RedisKeyValueStore` (behind the `redis` feature)

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_store;

use std::sync::Arc;
use std::time::Duration;

pub use in_memory::InMemoryKeyValueStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisKeyValueStore;

/// Shared key-value store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KvError {
    #[error("shared store connection error: {0}")]
    Connection(String),

    #[error("shared store command error: {0}")]
    Command(String),

    #[error("shared store value could not be decoded: {0}")]
    Serialization(String),
}

/// Minimal command set of the shared coordination store.
///
/// String values and string sets only. `ttl` arguments are whole seconds on
/// Redis; sub-second TTLs are rounded up to one second there.
pub trait KeyValueStore: Send + Sync {
    /// Atomically set `key` only when it does not exist, with an expiry.
    /// Returns `true` when this call created the key.
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError>;

    /// Unconditionally set `key`, optionally with an expiry.
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError>;

    fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    fn exists(&self, key: &str) -> Result<bool, KvError>;

    fn delete(&self, key: &str) -> Result<(), KvError>;

    /// Set an expiry on an existing key. Returns `false` if the key is absent.
    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError>;

    /// Delete `key` only while it still holds `expected`.
    ///
    /// The default implementation reads then deletes and is only as atomic as
    /// the backing store; adapters that can do better override it.
    fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, KvError> {
        match self.get(key)? {
            Some(current) if current == expected => {
                self.delete(key)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Add members to the set at `key` (idempotent).
    fn set_add(&self, key: &str, members: &[String]) -> Result<(), KvError>;

    /// All members of the set at `key` (empty when absent).
    fn set_members(&self, key: &str) -> Result<Vec<String>, KvError>;
}

impl<S> KeyValueStore for Arc<S>
where
    S: KeyValueStore + ?Sized,
{
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        (**self).set_if_absent(key, value, ttl)
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        (**self).set(key, value, ttl)
    }

    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        (**self).get(key)
    }

    fn exists(&self, key: &str) -> Result<bool, KvError> {
        (**self).exists(key)
    }

    fn delete(&self, key: &str) -> Result<(), KvError> {
        (**self).delete(key)
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        (**self).expire(key, ttl)
    }

    fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, KvError> {
        (**self).delete_if_equals(key, expected)
    }

    fn set_add(&self, key: &str, members: &[String]) -> Result<(), KvError> {
        (**self).set_add(key, members)
    }

    fn set_members(&self, key: &str) -> Result<Vec<String>, KvError> {
        (**self).set_members(key)
    }
}
