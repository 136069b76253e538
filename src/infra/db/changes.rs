//! Postgres change log and notification channel.
//!
//! `append` writes the record and raises a `pg_notify` on
//! [`CHANGE_CHANNEL`] in the same transaction, so listeners wake only for
//! committed changes. Hosts that record changes inside their own entity
//! transaction use [`append_change_in_tx`].

use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgListener};
use sqlx::{Postgres, Transaction};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::warn;

use crate::application::repos::{ChangeLogRepo, ChangeSignal, RepoError};
use crate::domain::changes::{ChangeRecord, NewChange};
use crate::domain::types::{ChangeKind, Collection, RecordId};

use super::{PostgresRepositories, map_sqlx_error};

/// Notification channel raised on every committed change-log append.
pub const CHANGE_CHANNEL: &str = "telaio_entity_changes";

#[derive(sqlx::FromRow)]
struct ChangeRow {
    id: i64,
    entity_id: i64,
    collection: Collection,
    kind: ChangeKind,
    user_id: Option<i64>,
    site_id: Option<i64>,
    created_at: OffsetDateTime,
}

impl From<ChangeRow> for ChangeRecord {
    fn from(row: ChangeRow) -> Self {
        Self {
            id: row.id,
            entity_id: row.entity_id,
            collection: row.collection,
            kind: row.kind,
            user_id: row.user_id,
            site_id: row.site_id,
            created_at: row.created_at,
        }
    }
}

async fn insert_change(conn: &mut PgConnection, change: &NewChange) -> Result<RecordId, RepoError> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO entity_changes (entity_id, collection, kind, user_id, site_id, created_at)
        VALUES ($1, $2, $3, $4, $5, now())
        RETURNING id
        "#,
    )
    .bind(change.entity_id)
    .bind(change.collection)
    .bind(change.kind)
    .bind(change.user_id)
    .bind(change.site_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(CHANGE_CHANNEL)
        .bind(id.to_string())
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    Ok(id)
}

/// Append a change record inside the caller's transaction.
///
/// The record and the notification commit or roll back with the entity
/// mutation they describe.
pub async fn append_change_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    change: &NewChange,
) -> Result<RecordId, RepoError> {
    insert_change(&mut *tx, change).await
}

#[async_trait]
impl ChangeLogRepo for PostgresRepositories {
    async fn append(&self, change: NewChange) -> Result<RecordId, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        let id = insert_change(&mut *tx, &change).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(id)
    }

    async fn query_after(&self, after: RecordId) -> Result<Vec<ChangeRecord>, RepoError> {
        let rows = sqlx::query_as::<_, ChangeRow>(
            r#"
            SELECT id, entity_id, collection, kind, user_id, site_id, created_at
            FROM entity_changes
            WHERE id > $1
            ORDER BY id
            "#,
        )
        .bind(after)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(ChangeRecord::from).collect())
    }

    async fn max_id(&self) -> Result<Option<RecordId>, RepoError> {
        sqlx::query_scalar::<_, Option<i64>>("SELECT max(id) FROM entity_changes")
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)
    }
}

/// Push channel over Postgres `LISTEN`/`NOTIFY`.
pub struct PgChangeSignal {
    pool: sqlx::PgPool,
}

impl PgChangeSignal {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChangeSignal for PgChangeSignal {
    async fn listen(&self) -> Result<mpsc::UnboundedReceiver<()>, RepoError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|err| RepoError::NotificationsUnavailable {
                message: err.to_string(),
            })?;
        listener
            .listen(CHANGE_CHANNEL)
            .await
            .map_err(|err| RepoError::NotificationsUnavailable {
                message: err.to_string(),
            })?;

        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    // The payload is the record id, but the tracker only
                    // needs the wake-up; it reads the log for the data.
                    Ok(_notification) => {
                        if sender.send(()).is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        warn!(%error, "change notification listener failed");
                        break;
                    }
                }
            }
        });
        Ok(receiver)
    }
}
