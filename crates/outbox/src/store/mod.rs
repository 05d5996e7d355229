//! Outbox persistence.
//!
//! The store is shared by the writer (via a unit of work), the dispatcher,
//! the reaper and the operator surface. Claims are leased: a claimed row
//! carries `locked_until` and is invisible to other dispatchers until the
//! lease expires or the row is saved/released.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};

use devboard_core::OutboxRecordId;

use crate::error::OutboxError;
use crate::record::{OutboxRecord, OutboxStats, PageRequest};

pub mod in_memory;
pub mod postgres;

pub use in_memory::{InMemoryOutboxStore, InMemoryUnitOfWork};
pub use postgres::{PgUnitOfWork, PostgresOutboxStore};

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Insert outside of any business transaction (tooling, tests).
    async fn insert(&self, record: OutboxRecord) -> Result<(), OutboxError>;

    /// Claim up to `batch_size` dispatchable records, oldest first, and lease
    /// them until [`lease_deadline`]`(now, lease)`.
    async fn claim_pending(
        &self,
        batch_size: usize,
        max_retries: u32,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxRecord>, OutboxError>;

    /// Persist the state of a processed batch in one commit.
    ///
    /// Only rows still pending and still leased until `lease_until` are
    /// written; a row deleted, finished or re-claimed by another dispatcher
    /// since the claim is skipped. Returns the number of rows written.
    async fn save_batch(&self, records: &[OutboxRecord], lease_until: DateTime<Utc>) -> Result<usize, OutboxError>;

    /// Drop the lease on claimed-but-unattempted records still held until `lease_until`.
    async fn release(&self, ids: &[OutboxRecordId], lease_until: DateTime<Utc>) -> Result<(), OutboxError>;

    /// Delete terminal records processed before `cutoff`. Pending records are never touched.
    async fn delete_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, OutboxError>;

    async fn stats(&self) -> Result<OutboxStats, OutboxError>;

    /// Pending records, oldest first.
    async fn list_pending(&self, page: PageRequest) -> Result<Vec<OutboxRecord>, OutboxError>;

    /// Abandoned records, most recently processed first.
    async fn list_abandoned(&self, page: PageRequest) -> Result<Vec<OutboxRecord>, OutboxError>;

    async fn get(&self, id: OutboxRecordId) -> Result<Option<OutboxRecord>, OutboxError>;

    /// Overwrite a single record. `NotFound` if it does not exist.
    async fn update(&self, record: &OutboxRecord) -> Result<(), OutboxError>;

    /// Returns `false` if the record did not exist.
    async fn delete(&self, id: OutboxRecordId) -> Result<bool, OutboxError>;
}

/// End of a claim lease taken at `now`.
///
/// Truncated to microseconds so the value round-trips through Postgres
/// `timestamptz` unchanged and can be compared for equality on save.
pub fn lease_deadline(now: DateTime<Utc>, lease: Duration) -> Result<DateTime<Utc>, OutboxError> {
    let lease = chrono::Duration::from_std(lease)
        .map_err(|e| OutboxError::InvalidState(format!("claim lease out of range: {e}")))?;
    now.checked_add_signed(lease)
        .map(|deadline| deadline.trunc_subsecs(6))
        .ok_or_else(|| OutboxError::InvalidState("claim lease out of range".to_string()))
}

/// A business transaction the writer can stage outbox records into.
///
/// Nothing staged is visible until `commit`; dropping an uncommitted unit of
/// work discards it.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn stage(&mut self, record: OutboxRecord) -> Result<(), OutboxError>;

    async fn commit(self) -> Result<(), OutboxError>
    where
        Self: Sized;

    async fn rollback(self) -> Result<(), OutboxError>
    where
        Self: Sized;
}
