//! Relational membership store boundary.
//!
//! A collection is a named set of member references; one row per
//! `(collection_id, member_id)`. The jobs only need three operations: read a
//! collection's members, insert a batch of rows as one commit, and bulk-delete
//! rows by ID.

pub mod in_memory;
pub mod postgres;

use std::collections::HashSet;
use std::sync::Arc;

use memberflow_core::{CollectionId, MemberId};

pub use in_memory::InMemoryMembershipStore;
pub use postgres::PostgresMembershipStore;

/// Relational store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MembershipStoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(String),
}

/// Membership rows of collections.
pub trait MembershipStore: Send + Sync {
    /// Members of `collection`, restricted to `selection` when given.
    fn members(
        &self,
        collection: CollectionId,
        selection: Option<&HashSet<MemberId>>,
    ) -> Result<HashSet<MemberId>, MembershipStoreError>;

    /// Insert one row per member as a single commit.
    ///
    /// Rows that already exist are skipped. Returns the members that were
    /// actually written by this call; nothing is written on error.
    fn insert_batch(
        &self,
        collection: CollectionId,
        members: &[MemberId],
    ) -> Result<Vec<MemberId>, MembershipStoreError>;

    /// Delete the rows of `collection` whose member is in `members`.
    /// Returns the number of rows removed.
    fn delete_members(
        &self,
        collection: CollectionId,
        members: &HashSet<MemberId>,
    ) -> Result<u64, MembershipStoreError>;
}

impl<S> MembershipStore for Arc<S>
where
    S: MembershipStore + ?Sized,
{
    fn members(
        &self,
        collection: CollectionId,
        selection: Option<&HashSet<MemberId>>,
    ) -> Result<HashSet<MemberId>, MembershipStoreError> {
        (**self).members(collection, selection)
    }

    fn insert_batch(
        &self,
        collection: CollectionId,
        members: &[MemberId],
    ) -> Result<Vec<MemberId>, MembershipStoreError> {
        (**self).insert_batch(collection, members)
    }

    fn delete_members(
        &self,
        collection: CollectionId,
        members: &HashSet<MemberId>,
    ) -> Result<u64, MembershipStoreError> {
        (**self).delete_members(collection, members)
    }
}
