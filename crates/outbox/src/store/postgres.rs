//! Postgres-backed outbox store.
//!
//! ## Table
//!
//! `outbox_messages`, one row per staged event. `sequence` is a `BIGSERIAL`
//! assigned on insert. Two partial indexes keep the hot paths cheap: pending
//! rows by `(occurred_at, sequence)` for FETCH, processed rows by
//! `processed_at` for the reaper.
//!
//! ## Claiming
//!
//! FETCH is a single `UPDATE ... WHERE id IN (SELECT ... FOR UPDATE SKIP
//! LOCKED) RETURNING ...`: concurrent dispatchers skip each other's rows and
//! the `locked_until` lease hides claimed rows after the statement commits.
//!
//! ## Error mapping
//!
//! | sqlx error | code | OutboxError |
//! |---|---|---|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | any | `Storage` |
//! | PoolClosed | | `Storage` |
//! | other | | `Storage` |

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{Span, debug, instrument, warn};

use devboard_core::{OutboxRecordId, TenantId};

use super::{OutboxStore, UnitOfWork, lease_deadline};
use crate::error::OutboxError;
use crate::record::{OutboxRecord, OutboxStats, PageRequest};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS outbox_messages (
        id UUID PRIMARY KEY,
        sequence BIGSERIAL NOT NULL,
        tenant_id UUID NOT NULL,
        event_type TEXT NOT NULL,
        payload TEXT NOT NULL,
        occurred_at TIMESTAMPTZ NOT NULL,
        processed_at TIMESTAMPTZ NULL,
        retry_count INTEGER NOT NULL DEFAULT 0 CHECK (retry_count >= 0),
        error TEXT NULL,
        locked_until TIMESTAMPTZ NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS ix_outbox_messages_pending
        ON outbox_messages (occurred_at, sequence)
        WHERE processed_at IS NULL
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS ix_outbox_messages_processed_at
        ON outbox_messages (processed_at)
        WHERE processed_at IS NOT NULL
    "#,
];

const COLUMNS: &str =
    "id, sequence, tenant_id, event_type, payload, occurred_at, processed_at, retry_count, error, locked_until";

#[derive(Debug, Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `outbox_messages` table and indexes if missing (dev convenience).
    pub async fn ensure_schema(&self) -> Result<(), OutboxError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    /// Open a unit of work on a fresh transaction. Business writes go through
    /// [`PgUnitOfWork::transaction`] on the same transaction.
    pub async fn begin(&self) -> Result<PgUnitOfWork, OutboxError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(PgUnitOfWork { tx })
    }

    async fn fetch_page(
        &self,
        operation: &str,
        where_and_order: &str,
        page: PageRequest,
    ) -> Result<Vec<OutboxRecord>, OutboxError> {
        let sql = format!("SELECT {COLUMNS} FROM outbox_messages {where_and_order} LIMIT $1 OFFSET $2");
        let rows = sqlx::query(&sql)
            .bind(page.limit() as i64)
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        rows_to_records(&rows)
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    #[instrument(
        skip(self, record),
        fields(record_id = %record.id, tenant_id = %record.tenant_id, event_type = %record.event_type),
        err
    )]
    async fn insert(&self, record: OutboxRecord) -> Result<(), OutboxError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        insert_record(&mut conn, &record).await
    }

    #[instrument(skip(self), fields(claimed = tracing::field::Empty), err)]
    async fn claim_pending(
        &self,
        batch_size: usize,
        max_retries: u32,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxRecord>, OutboxError> {
        let lease_until = lease_deadline(now, lease)?;

        let sql = format!(
            r#"
            UPDATE outbox_messages
            SET locked_until = $4
            WHERE id IN (
                SELECT id FROM outbox_messages
                WHERE processed_at IS NULL
                    AND retry_count < $1
                    AND (locked_until IS NULL OR locked_until <= $2)
                ORDER BY occurred_at ASC, sequence ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {COLUMNS}
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(saturating_i32(max_retries))
            .bind(now)
            .bind(i64::try_from(batch_size).unwrap_or(i64::MAX))
            .bind(lease_until)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("claim_pending", e))?;

        // RETURNING does not preserve the subquery order.
        let mut records = rows_to_records(&rows)?;
        records.sort_by(|a, b| (a.occurred_at, a.sequence).cmp(&(b.occurred_at, b.sequence)));

        Span::current().record("claimed", records.len());
        Ok(records)
    }

    #[instrument(skip(self, records), fields(batch = records.len(), saved = tracing::field::Empty), err)]
    async fn save_batch(&self, records: &[OutboxRecord], lease_until: DateTime<Utc>) -> Result<usize, OutboxError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut saved = 0;
        for record in records {
            if save_leased(&mut tx, record, lease_until).await? {
                saved += 1;
            } else {
                warn!(record_id = %record.id, "outbox record deleted or re-leased before save; skipping");
            }
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Span::current().record("saved", saved);
        Ok(saved)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn release(&self, ids: &[OutboxRecordId], lease_until: DateTime<Utc>) -> Result<(), OutboxError> {
        if ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<uuid::Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();

        sqlx::query(
            r#"
            UPDATE outbox_messages
            SET locked_until = NULL
            WHERE id = ANY($1) AND processed_at IS NULL AND locked_until = $2
            "#,
        )
        .bind(&ids)
        .bind(lease_until)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("release", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn delete_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, OutboxError> {
        let result = sqlx::query(
            r#"
            DELETE FROM outbox_messages
            WHERE processed_at IS NOT NULL AND processed_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_processed_before", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn stats(&self) -> Result<OutboxStats, OutboxError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE processed_at IS NULL) AS pending,
                COUNT(*) FILTER (WHERE processed_at IS NOT NULL AND error IS NULL) AS processed,
                COUNT(*) FILTER (WHERE processed_at IS NOT NULL AND error IS NOT NULL) AS failed
            FROM outbox_messages
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("stats", e))?;

        let count = |column: &str| -> Result<u64, OutboxError> {
            row.try_get::<i64, _>(column)
                .map(|v| v.max(0) as u64)
                .map_err(|e| OutboxError::Storage(format!("failed to read {column}: {e}")))
        };

        Ok(OutboxStats {
            total: count("total")?,
            pending: count("pending")?,
            processed: count("processed")?,
            failed: count("failed")?,
        })
    }

    #[instrument(skip(self), err)]
    async fn list_pending(&self, page: PageRequest) -> Result<Vec<OutboxRecord>, OutboxError> {
        self.fetch_page(
            "list_pending",
            "WHERE processed_at IS NULL ORDER BY occurred_at ASC, sequence ASC",
            page,
        )
        .await
    }

    #[instrument(skip(self), err)]
    async fn list_abandoned(&self, page: PageRequest) -> Result<Vec<OutboxRecord>, OutboxError> {
        self.fetch_page(
            "list_abandoned",
            "WHERE processed_at IS NOT NULL AND error IS NOT NULL ORDER BY processed_at DESC, sequence DESC",
            page,
        )
        .await
    }

    #[instrument(skip(self), fields(record_id = %id), err)]
    async fn get(&self, id: OutboxRecordId) -> Result<Option<OutboxRecord>, OutboxError> {
        let sql = format!("SELECT {COLUMNS} FROM outbox_messages WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.map(|row| row_to_record(&row)).transpose()
    }

    #[instrument(skip(self, record), fields(record_id = %record.id), err)]
    async fn update(&self, record: &OutboxRecord) -> Result<(), OutboxError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        update_record(&mut conn, record).await
    }

    #[instrument(skip(self), fields(record_id = %id), err)]
    async fn delete(&self, id: OutboxRecordId) -> Result<bool, OutboxError> {
        let result = sqlx::query("DELETE FROM outbox_messages WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete", e))?;
        Ok(result.rows_affected() > 0)
    }
}

/// Unit of work wrapping a Postgres transaction.
///
/// Dropping it without `commit` rolls the transaction back (sqlx semantics).
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl PgUnitOfWork {
    /// The underlying transaction, for the caller's business writes.
    pub fn transaction(&mut self) -> &mut Transaction<'static, Postgres> {
        &mut self.tx
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn stage(&mut self, record: OutboxRecord) -> Result<(), OutboxError> {
        insert_record(&mut self.tx, &record).await
    }

    async fn commit(self) -> Result<(), OutboxError> {
        self.tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self) -> Result<(), OutboxError> {
        self.tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))
    }
}

async fn insert_record(conn: &mut sqlx::PgConnection, record: &OutboxRecord) -> Result<(), OutboxError> {
    sqlx::query(
        r#"
        INSERT INTO outbox_messages (
            id, tenant_id, event_type, payload, occurred_at,
            processed_at, retry_count, error, locked_until
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(record.id.as_uuid())
    .bind(record.tenant_id.as_uuid())
    .bind(&record.event_type)
    .bind(&record.payload)
    .bind(record.occurred_at)
    .bind(record.processed_at)
    .bind(saturating_i32(record.retry_count))
    .bind(&record.error)
    .bind(record.locked_until)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("insert", e))?;

    debug!(record_id = %record.id, event_type = %record.event_type, "outbox record staged");
    Ok(())
}

async fn update_record(conn: &mut sqlx::PgConnection, record: &OutboxRecord) -> Result<(), OutboxError> {
    let result = sqlx::query(
        r#"
        UPDATE outbox_messages
        SET processed_at = $2, retry_count = $3, error = $4, locked_until = $5
        WHERE id = $1
        "#,
    )
    .bind(record.id.as_uuid())
    .bind(record.processed_at)
    .bind(saturating_i32(record.retry_count))
    .bind(&record.error)
    .bind(record.locked_until)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("update", e))?;

    if result.rows_affected() == 0 {
        return Err(OutboxError::NotFound(record.id));
    }
    Ok(())
}

/// Write a dispatched record back only while this claim still owns it.
async fn save_leased(
    conn: &mut sqlx::PgConnection,
    record: &OutboxRecord,
    lease_until: DateTime<Utc>,
) -> Result<bool, OutboxError> {
    let result = sqlx::query(
        r#"
        UPDATE outbox_messages
        SET processed_at = $2, retry_count = $3, error = $4, locked_until = $5
        WHERE id = $1 AND processed_at IS NULL AND locked_until = $6
        "#,
    )
    .bind(record.id.as_uuid())
    .bind(record.processed_at)
    .bind(saturating_i32(record.retry_count))
    .bind(&record.error)
    .bind(record.locked_until)
    .bind(lease_until)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("save", e))?;

    Ok(result.rows_affected() == 1)
}

fn saturating_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> OutboxError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => OutboxError::Conflict(msg),
                _ => OutboxError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => OutboxError::Storage(format!("connection pool closed in {operation}")),
        other => OutboxError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

#[derive(Debug)]
struct OutboxRow {
    id: uuid::Uuid,
    sequence: i64,
    tenant_id: uuid::Uuid,
    event_type: String,
    payload: String,
    occurred_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    retry_count: i32,
    error: Option<String>,
    locked_until: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for OutboxRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(OutboxRow {
            id: row.try_get("id")?,
            sequence: row.try_get("sequence")?,
            tenant_id: row.try_get("tenant_id")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            occurred_at: row.try_get("occurred_at")?,
            processed_at: row.try_get("processed_at")?,
            retry_count: row.try_get("retry_count")?,
            error: row.try_get("error")?,
            locked_until: row.try_get("locked_until")?,
        })
    }
}

impl From<OutboxRow> for OutboxRecord {
    fn from(row: OutboxRow) -> Self {
        OutboxRecord {
            id: OutboxRecordId::from_uuid(row.id),
            tenant_id: TenantId::from_uuid(row.tenant_id),
            event_type: row.event_type,
            payload: row.payload,
            occurred_at: row.occurred_at,
            processed_at: row.processed_at,
            retry_count: row.retry_count.max(0) as u32,
            error: row.error,
            sequence: row.sequence,
            locked_until: row.locked_until,
        }
    }
}

fn row_to_record(row: &PgRow) -> Result<OutboxRecord, OutboxError> {
    OutboxRow::from_row(row)
        .map(Into::into)
        .map_err(|e| OutboxError::Storage(format!("failed to deserialize outbox row: {e}")))
}

fn rows_to_records(rows: &[PgRow]) -> Result<Vec<OutboxRecord>, OutboxError> {
    rows.iter().map(row_to_record).collect()
}
