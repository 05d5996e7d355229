//! In-memory outbox store (tests/dev).

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use devboard_core::OutboxRecordId;

use super::{OutboxStore, UnitOfWork, lease_deadline};
use crate::error::OutboxError;
use crate::record::{OutboxRecord, OutboxStats, PageRequest, RecordStatus};

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<OutboxRecordId, OutboxRecord>,
    next_sequence: i64,
}

impl Inner {
    fn insert(&mut self, mut record: OutboxRecord) -> Result<(), OutboxError> {
        if self.records.contains_key(&record.id) {
            return Err(OutboxError::Conflict(format!("duplicate outbox record id {}", record.id)));
        }
        self.next_sequence += 1;
        record.sequence = self.next_sequence;
        self.records.insert(record.id, record);
        Ok(())
    }
}

/// Outbox store backed by a `HashMap` under a `RwLock`.
///
/// Claims happen under the write lock, so concurrent dispatchers sharing one
/// store never receive the same record.
#[derive(Debug, Default)]
pub struct InMemoryOutboxStore {
    inner: RwLock<Inner>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a unit of work whose staged records land here on commit.
    pub fn begin(self: &Arc<Self>) -> InMemoryUnitOfWork {
        InMemoryUnitOfWork {
            store: Arc::clone(self),
            staged: Vec::new(),
        }
    }

    /// Snapshot of every record, in insertion order.
    pub fn all(&self) -> Result<Vec<OutboxRecord>, OutboxError> {
        let inner = self.read()?;
        let mut records: Vec<_> = inner.records.values().cloned().collect();
        records.sort_by_key(|r| r.sequence);
        Ok(records)
    }

    pub fn len(&self) -> usize {
        self.read().map(|inner| inner.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, OutboxError> {
        self.inner
            .read()
            .map_err(|_| OutboxError::Storage("outbox store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, OutboxError> {
        self.inner
            .write()
            .map_err(|_| OutboxError::Storage("outbox store lock poisoned".to_string()))
    }

    fn page_of(
        &self,
        page: PageRequest,
        filter: impl Fn(&OutboxRecord) -> bool,
        order: impl Fn(&OutboxRecord, &OutboxRecord) -> std::cmp::Ordering,
    ) -> Result<Vec<OutboxRecord>, OutboxError> {
        let inner = self.read()?;
        let mut records: Vec<_> = inner.records.values().filter(|r| filter(r)).cloned().collect();
        records.sort_by(order);
        Ok(records.into_iter().skip(page.offset()).take(page.limit()).collect())
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn insert(&self, record: OutboxRecord) -> Result<(), OutboxError> {
        self.write()?.insert(record)
    }

    async fn claim_pending(
        &self,
        batch_size: usize,
        max_retries: u32,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxRecord>, OutboxError> {
        let lease_until = lease_deadline(now, lease)?;
        let mut inner = self.write()?;

        let mut ids: Vec<(DateTime<Utc>, i64, OutboxRecordId)> = inner
            .records
            .values()
            .filter(|r| r.is_dispatchable(max_retries, now))
            .map(|r| (r.occurred_at, r.sequence, r.id))
            .collect();
        ids.sort();
        ids.truncate(batch_size);

        let mut claimed = Vec::with_capacity(ids.len());
        for (_, _, id) in ids {
            if let Some(record) = inner.records.get_mut(&id) {
                record.locked_until = Some(lease_until);
                claimed.push(record.clone());
            }
        }
        Ok(claimed)
    }

    async fn save_batch(&self, records: &[OutboxRecord], lease_until: DateTime<Utc>) -> Result<usize, OutboxError> {
        let mut inner = self.write()?;
        let mut saved = 0;
        for record in records {
            match inner.records.get_mut(&record.id) {
                Some(existing) if holds_lease(existing, lease_until) => {
                    *existing = record.clone();
                    saved += 1;
                }
                Some(_) => warn!(record_id = %record.id, "outbox record lease lost before save; skipping"),
                None => warn!(record_id = %record.id, "outbox record deleted before save; skipping"),
            }
        }
        Ok(saved)
    }

    async fn release(&self, ids: &[OutboxRecordId], lease_until: DateTime<Utc>) -> Result<(), OutboxError> {
        let mut inner = self.write()?;
        for id in ids {
            if let Some(record) = inner.records.get_mut(id) {
                if holds_lease(record, lease_until) {
                    record.locked_until = None;
                }
            }
        }
        Ok(())
    }

    async fn delete_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, OutboxError> {
        let mut inner = self.write()?;
        let before = inner.records.len();
        inner
            .records
            .retain(|_, r| !matches!(r.processed_at, Some(at) if at < cutoff));
        Ok((before - inner.records.len()) as u64)
    }

    async fn stats(&self) -> Result<OutboxStats, OutboxError> {
        let inner = self.read()?;
        let mut stats = OutboxStats {
            total: inner.records.len() as u64,
            ..OutboxStats::default()
        };
        for record in inner.records.values() {
            match record.status() {
                RecordStatus::Pending => stats.pending += 1,
                RecordStatus::Delivered => stats.processed += 1,
                RecordStatus::Abandoned => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    async fn list_pending(&self, page: PageRequest) -> Result<Vec<OutboxRecord>, OutboxError> {
        self.page_of(page, OutboxRecord::is_pending, |a, b| {
            (a.occurred_at, a.sequence).cmp(&(b.occurred_at, b.sequence))
        })
    }

    async fn list_abandoned(&self, page: PageRequest) -> Result<Vec<OutboxRecord>, OutboxError> {
        self.page_of(
            page,
            |r| r.status() == RecordStatus::Abandoned,
            |a, b| b.processed_at.cmp(&a.processed_at).then(b.sequence.cmp(&a.sequence)),
        )
    }

    async fn get(&self, id: OutboxRecordId) -> Result<Option<OutboxRecord>, OutboxError> {
        Ok(self.read()?.records.get(&id).cloned())
    }

    async fn update(&self, record: &OutboxRecord) -> Result<(), OutboxError> {
        let mut inner = self.write()?;
        match inner.records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(OutboxError::NotFound(record.id)),
        }
    }

    async fn delete(&self, id: OutboxRecordId) -> Result<bool, OutboxError> {
        Ok(self.write()?.records.remove(&id).is_some())
    }
}

fn holds_lease(record: &OutboxRecord, lease_until: DateTime<Utc>) -> bool {
    record.is_pending() && record.locked_until == Some(lease_until)
}

/// Unit of work over [`InMemoryOutboxStore`].
///
/// Staged records are buffered and inserted under one write lock on commit.
#[derive(Debug)]
pub struct InMemoryUnitOfWork {
    store: Arc<InMemoryOutboxStore>,
    staged: Vec<OutboxRecord>,
}

impl InMemoryUnitOfWork {
    pub fn staged(&self) -> &[OutboxRecord] {
        &self.staged
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn stage(&mut self, record: OutboxRecord) -> Result<(), OutboxError> {
        self.staged.push(record);
        Ok(())
    }

    async fn commit(mut self) -> Result<(), OutboxError> {
        let staged = std::mem::take(&mut self.staged);
        let mut inner = self.store.write()?;
        if let Some(dup) = staged.iter().find(|r| inner.records.contains_key(&r.id)) {
            return Err(OutboxError::Conflict(format!("duplicate outbox record id {}", dup.id)));
        }
        for record in staged {
            inner.insert(record)?;
        }
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), OutboxError> {
        self.staged.clear();
        Ok(())
    }
}

impl Drop for InMemoryUnitOfWork {
    fn drop(&mut self) {
        if !self.staged.is_empty() {
            debug!(staged = self.staged.len(), "unit of work dropped without commit; discarding");
        }
    }
}
