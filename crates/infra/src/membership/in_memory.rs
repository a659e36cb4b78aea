use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use memberflow_core::{CollectionId, MemberId};

use super::{MembershipStore, MembershipStoreError};

/// In-memory membership rows.
///
/// Intended for tests/dev. Each `insert_batch` call is applied under one write
/// lock, which stands in for the batch transaction.
#[derive(Debug, Default)]
pub struct InMemoryMembershipStore {
    collections: RwLock<HashMap<CollectionId, HashSet<MemberId>>>,
}

impl InMemoryMembershipStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add rows directly (fixtures).
    pub fn seed(&self, collection: CollectionId, members: impl IntoIterator<Item = i64>) {
        if let Ok(mut collections) = self.collections.write() {
            collections
                .entry(collection)
                .or_default()
                .extend(members.into_iter().map(MemberId::new));
        }
    }

    /// Sorted member IDs of a collection (assertions).
    pub fn snapshot(&self, collection: CollectionId) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .collections
            .read()
            .map(|c| {
                c.get(&collection)
                    .map(|m| m.iter().map(|id| id.get()).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    fn poisoned() -> MembershipStoreError {
        MembershipStoreError::Unavailable("lock poisoned".to_string())
    }
}

impl MembershipStore for InMemoryMembershipStore {
    fn members(
        &self,
        collection: CollectionId,
        selection: Option<&HashSet<MemberId>>,
    ) -> Result<HashSet<MemberId>, MembershipStoreError> {
        let collections = self.collections.read().map_err(|_| Self::poisoned())?;
        let Some(rows) = collections.get(&collection) else {
            return Ok(HashSet::new());
        };

        Ok(match selection {
            Some(selected) => rows.intersection(selected).copied().collect(),
            None => rows.clone(),
        })
    }

    fn insert_batch(
        &self,
        collection: CollectionId,
        members: &[MemberId],
    ) -> Result<Vec<MemberId>, MembershipStoreError> {
        let mut collections = self.collections.write().map_err(|_| Self::poisoned())?;
        let rows = collections.entry(collection).or_default();

        Ok(members.iter().copied().filter(|m| rows.insert(*m)).collect())
    }

    fn delete_members(
        &self,
        collection: CollectionId,
        members: &HashSet<MemberId>,
    ) -> Result<u64, MembershipStoreError> {
        let mut collections = self.collections.write().map_err(|_| Self::poisoned())?;
        let Some(rows) = collections.get_mut(&collection) else {
            return Ok(0);
        };

        let before = rows.len();
        rows.retain(|m| !members.contains(m));
        Ok((before - rows.len()) as u64)
    }
}
