//! Redis-backed shared store.
//!
//! Uses plain commands (`SET NX EX`, `GET`, `EXISTS`, `DEL`, `EXPIRE`,
//! `SADD`, `SMEMBERS`) plus one Lua script for compare-and-delete so that lock
//! release cannot remove a key that was re-acquired by another owner between
//! the read and the delete.

use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use super::{KeyValueStore, KvError};

/// Deletes KEYS[1] only while it still holds ARGV[1].
const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Debug, Clone)]
pub struct RedisKeyValueStore {
    client: Arc<redis::Client>,
}

impl RedisKeyValueStore {
    /// Create a store for the given connection URL (e.g. `redis://localhost:6379/0`).
    ///
    /// Opening the client does not connect; connection failures surface on the
    /// first command.
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, KvError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| KvError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
        })
    }

    fn connection(&self) -> Result<redis::Connection, KvError> {
        self.client
            .get_connection()
            .map_err(|e| KvError::Connection(e.to_string()))
    }
}

/// Redis expiries are whole seconds; never round a positive TTL down to zero.
fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs();
    if ttl.subsec_nanos() > 0 { secs + 1 } else { secs.max(1) }
}

fn command_error(command: &str, e: redis::RedisError) -> KvError {
    KvError::Command(format!("{command} failed: {e}"))
}

impl KeyValueStore for RedisKeyValueStore {
    #[instrument(skip(self, value), err)]
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut conn = self.connection()?;

        // SET ... NX replies OK when written and nil when the key already exists.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query(&mut conn)
            .map_err(|e| command_error("SET NX", e))?;

        Ok(reply.is_some())
    }

    #[instrument(skip(self, value), err)]
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        let mut conn = self.connection()?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl_secs(ttl));
        }

        cmd.query::<()>(&mut conn)
            .map_err(|e| command_error("SET", e))
    }

    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.connection()?;
        redis::cmd("GET")
            .arg(key)
            .query(&mut conn)
            .map_err(|e| command_error("GET", e))
    }

    fn exists(&self, key: &str) -> Result<bool, KvError> {
        let mut conn = self.connection()?;
        let count: i64 = redis::cmd("EXISTS")
            .arg(key)
            .query(&mut conn)
            .map_err(|e| command_error("EXISTS", e))?;
        Ok(count > 0)
    }

    fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.connection()?;
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query(&mut conn)
            .map_err(|e| command_error("DEL", e))?;
        Ok(())
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut conn = self.connection()?;
        let applied: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs(ttl))
            .query(&mut conn)
            .map_err(|e| command_error("EXPIRE", e))?;
        Ok(applied == 1)
    }

    #[instrument(skip(self), err)]
    fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, KvError> {
        let mut conn = self.connection()?;
        let deleted: i64 = redis::Script::new(COMPARE_AND_DELETE)
            .key(key)
            .arg(expected)
            .invoke(&mut conn)
            .map_err(|e| command_error("compare-and-delete", e))?;
        Ok(deleted == 1)
    }

    fn set_add(&self, key: &str, members: &[String]) -> Result<(), KvError> {
        if members.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection()?;
        let _: i64 = redis::cmd("SADD")
            .arg(key)
            .arg(members)
            .query(&mut conn)
            .map_err(|e| command_error("SADD", e))?;
        Ok(())
    }

    fn set_members(&self, key: &str) -> Result<Vec<String>, KvError> {
        let mut conn = self.connection()?;
        redis::cmd("SMEMBERS")
            .arg(key)
            .query(&mut conn)
            .map_err(|e| command_error("SMEMBERS", e))
    }
}
