use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{KeyValueStore, KvError};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-memory shared store.
///
/// Intended for tests/dev and single-process deployments. Expiry is emulated
/// lazily: expired keys are dropped on the next access.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the map and purge `key` if it has expired.
    fn live(&self, key: &str) -> Result<MutexGuard<'_, HashMap<String, Entry>>, KvError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| KvError::Connection("lock poisoned".to_string()))?;
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        Ok(entries)
    }

    fn deadline(ttl: Duration) -> Option<Instant> {
        Some(Instant::now() + ttl)
    }
}

fn wrong_type(key: &str) -> KvError {
    KvError::Command(format!(
        "WRONGTYPE operation against key '{key}' holding the wrong kind of value"
    ))
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut entries = self.live(key)?;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Self::deadline(ttl),
            },
        );
        Ok(true)
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        let mut entries = self.live(key)?;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: ttl.and_then(Self::deadline),
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let entries = self.live(key)?;
        match entries.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Text(v),
                ..
            }) => Ok(Some(v.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn exists(&self, key: &str) -> Result<bool, KvError> {
        Ok(self.live(key)?.contains_key(key))
    }

    fn delete(&self, key: &str) -> Result<(), KvError> {
        self.live(key)?.remove(key);
        Ok(())
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut entries = self.live(key)?;
        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Self::deadline(ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, KvError> {
        let mut entries = self.live(key)?;
        let matches = matches!(
            entries.get(key),
            Some(Entry { value: Value::Text(v), .. }) if v == expected
        );
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    fn set_add(&self, key: &str, members: &[String]) -> Result<(), KvError> {
        if members.is_empty() {
            return Ok(());
        }
        let mut entries = self.live(key)?;
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Set(BTreeSet::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Set(set) => {
                set.extend(members.iter().cloned());
                Ok(())
            }
            Value::Text(_) => Err(wrong_type(key)),
        }
    }

    fn set_members(&self, key: &str) -> Result<Vec<String>, KvError> {
        let entries = self.live(key)?;
        match entries.get(key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_if_absent_only_creates_once() {
        let kv = InMemoryKeyValueStore::new();
        assert!(kv.set_if_absent("k", "a", Duration::from_secs(60)).unwrap());
        assert!(!kv.set_if_absent("k", "b", Duration::from_secs(60)).unwrap());
        assert_eq!(kv.get("k").unwrap().as_deref(), Some("a"));
    }

    #[test]
    fn expired_keys_disappear() {
        let kv = InMemoryKeyValueStore::new();
        kv.set("k", "v", Some(Duration::from_millis(20))).unwrap();
        assert!(kv.exists("k").unwrap());

        std::thread::sleep(Duration::from_millis(40));
        assert!(!kv.exists("k").unwrap());
        assert!(kv.set_if_absent("k", "w", Duration::from_secs(60)).unwrap());
    }

    #[test]
    fn delete_if_equals_leaves_other_values() {
        let kv = InMemoryKeyValueStore::new();
        kv.set("k", "owner-a", None).unwrap();

        assert!(!kv.delete_if_equals("k", "owner-b").unwrap());
        assert!(kv.exists("k").unwrap());

        assert!(kv.delete_if_equals("k", "owner-a").unwrap());
        assert!(!kv.exists("k").unwrap());
    }

    #[test]
    fn sets_are_idempotent() {
        let kv = InMemoryKeyValueStore::new();
        kv.set_add("s", &["1".to_string(), "2".to_string()]).unwrap();
        kv.set_add("s", &["2".to_string(), "3".to_string()]).unwrap();

        assert_eq!(kv.set_members("s").unwrap(), vec!["1", "2", "3"]);
        assert!(kv.set_members("missing").unwrap().is_empty());
    }

    #[test]
    fn mixing_value_kinds_is_rejected() {
        let kv = InMemoryKeyValueStore::new();
        kv.set("k", "v", None).unwrap();
        assert!(matches!(
            kv.set_add("k", &["x".to_string()]),
            Err(KvError::Command(_))
        ));
    }

    #[test]
    fn expire_applies_to_sets() {
        let kv = InMemoryKeyValueStore::new();
        kv.set_add("s", &["1".to_string()]).unwrap();
        assert!(kv.expire("s", Duration::from_millis(10)).unwrap());
        assert!(!kv.expire("missing", Duration::from_millis(10)).unwrap());

        std::thread::sleep(Duration::from_millis(30));
        assert!(kv.set_members("s").unwrap().is_empty());
    }
}
