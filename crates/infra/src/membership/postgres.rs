//! Postgres-backed membership store.
//!
//! Rows live in:
//!
//! ```sql
//! CREATE TABLE collection_members (
//!     collection_id UUID   NOT NULL,
//!     member_id     BIGINT NOT NULL,
//!     PRIMARY KEY (collection_id, member_id)
//! );
//! ```
//!
//! ## Error Mapping
//!
//! | SQLx Error | MembershipStoreError |
//! |------------|----------------------|
//! | `PoolClosed`, `PoolTimedOut`, `Io` | `Unavailable` |
//! | anything else | `Database` |
//!
//! ## Threading
//!
//! The trait is synchronous because jobs run on plain worker threads. Calls
//! are driven on the runtime handle captured at construction and must not be
//! made from inside that runtime's async tasks.

use std::collections::HashSet;
use std::sync::Arc;

use sqlx::{PgPool, Row};
use tokio::runtime::Handle;
use tracing::{instrument, Span};
use uuid::Uuid;

use memberflow_core::{CollectionId, MemberId};

use super::{MembershipStore, MembershipStoreError};

#[derive(Debug, Clone)]
pub struct PostgresMembershipStore {
    pool: Arc<PgPool>,
    runtime: Handle,
}

impl PostgresMembershipStore {
    /// Create a store over `pool`, driving queries on `runtime`.
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    /// Create the membership table if it does not exist.
    pub fn ensure_schema(&self) -> Result<(), MembershipStoreError> {
        let pool = self.pool.clone();
        self.runtime.block_on(async move {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS collection_members (
                    collection_id UUID   NOT NULL,
                    member_id     BIGINT NOT NULL,
                    PRIMARY KEY (collection_id, member_id)
                )
                "#,
            )
            .execute(&*pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
            Ok(())
        })
    }
}

fn raw_ids<'a>(members: impl IntoIterator<Item = &'a MemberId>) -> Vec<i64> {
    members.into_iter().map(|m| m.get()).collect()
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> MembershipStoreError {
    match err {
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            MembershipStoreError::Unavailable(format!("{operation}: {err}"))
        }
        other => MembershipStoreError::Database(format!("{operation}: {other}")),
    }
}

impl MembershipStore for PostgresMembershipStore {
    #[instrument(skip(self, selection), fields(collection_id = %collection, selected = tracing::field::Empty), err)]
    fn members(
        &self,
        collection: CollectionId,
        selection: Option<&HashSet<MemberId>>,
    ) -> Result<HashSet<MemberId>, MembershipStoreError> {
        let pool = self.pool.clone();
        let collection_uuid: Uuid = collection.into();
        let selected = selection.map(|s| raw_ids(s));
        if let Some(ids) = &selected {
            Span::current().record("selected", ids.len());
        }

        self.runtime.block_on(async move {
            let rows = match selected {
                Some(ids) => {
                    sqlx::query(
                        r#"
                        SELECT member_id
                        FROM collection_members
                        WHERE collection_id = $1 AND member_id = ANY($2)
                        "#,
                    )
                    .bind(collection_uuid)
                    .bind(ids)
                    .fetch_all(&*pool)
                    .await
                }
                None => {
                    sqlx::query(
                        r#"
                        SELECT member_id
                        FROM collection_members
                        WHERE collection_id = $1
                        "#,
                    )
                    .bind(collection_uuid)
                    .fetch_all(&*pool)
                    .await
                }
            }
            .map_err(|e| map_sqlx_error("members", e))?;

            rows.iter()
                .map(|row| {
                    row.try_get::<i64, _>("member_id")
                        .map(MemberId::new)
                        .map_err(|e| map_sqlx_error("members", e))
                })
                .collect()
        })
    }

    #[instrument(skip(self, members), fields(collection_id = %collection, batch = members.len()), err)]
    fn insert_batch(
        &self,
        collection: CollectionId,
        members: &[MemberId],
    ) -> Result<Vec<MemberId>, MembershipStoreError> {
        if members.is_empty() {
            return Ok(Vec::new());
        }

        let pool = self.pool.clone();
        let collection_uuid: Uuid = collection.into();
        let ids = raw_ids(members);

        self.runtime.block_on(async move {
            let mut tx = pool
                .begin()
                .await
                .map_err(|e| map_sqlx_error("insert_batch", e))?;

            let mut written = Vec::with_capacity(ids.len());
            for id in ids {
                let row = sqlx::query(
                    r#"
                    INSERT INTO collection_members (collection_id, member_id)
                    VALUES ($1, $2)
                    ON CONFLICT (collection_id, member_id) DO NOTHING
                    RETURNING member_id
                    "#,
                )
                .bind(collection_uuid)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("insert_batch", e))?;

                if row.is_some() {
                    written.push(MemberId::new(id));
                }
            }

            // Dropping `tx` on an early return rolls the whole batch back.
            tx.commit()
                .await
                .map_err(|e| map_sqlx_error("insert_batch", e))?;

            Ok(written)
        })
    }

    #[instrument(skip(self, members), fields(collection_id = %collection, requested = members.len()), err)]
    fn delete_members(
        &self,
        collection: CollectionId,
        members: &HashSet<MemberId>,
    ) -> Result<u64, MembershipStoreError> {
        if members.is_empty() {
            return Ok(0);
        }

        let pool = self.pool.clone();
        let collection_uuid: Uuid = collection.into();
        let ids = raw_ids(members);

        self.runtime.block_on(async move {
            let result = sqlx::query(
                r#"
                DELETE FROM collection_members
                WHERE collection_id = $1 AND member_id = ANY($2)
                "#,
            )
            .bind(collection_uuid)
            .bind(ids)
            .execute(&*pool)
            .await
            .map_err(|e| map_sqlx_error("delete_members", e))?;

            Ok(result.rows_affected())
        })
    }
}
