//! Operator surface over the outbox (statistics, listings, requeue, delete, sweep).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use devboard_core::OutboxRecordId;

use crate::error::OutboxError;
use crate::record::{OutboxRecord, OutboxStats, PageRequest};
use crate::store::OutboxStore;

#[derive(Clone)]
pub struct OutboxAdmin {
    store: Arc<dyn OutboxStore>,
}

impl OutboxAdmin {
    pub fn new(store: Arc<dyn OutboxStore>) -> Self {
        Self { store }
    }

    pub async fn statistics(&self) -> Result<OutboxStats, OutboxError> {
        self.store.stats().await
    }

    pub async fn pending(&self, page: PageRequest) -> Result<Vec<OutboxRecord>, OutboxError> {
        self.store.list_pending(page).await
    }

    pub async fn failed(&self, page: PageRequest) -> Result<Vec<OutboxRecord>, OutboxError> {
        self.store.list_abandoned(page).await
    }

    pub async fn get(&self, id: OutboxRecordId) -> Result<OutboxRecord, OutboxError> {
        self.store.get(id).await?.ok_or(OutboxError::NotFound(id))
    }

    /// Move a terminal record back to pending with a fresh retry budget.
    pub async fn retry(&self, id: OutboxRecordId) -> Result<OutboxRecord, OutboxError> {
        let mut record = self.get(id).await?;
        if record.is_pending() {
            return Err(OutboxError::InvalidState(format!("outbox record {id} is already pending")));
        }

        record.requeue();
        self.store.update(&record).await?;
        info!(record_id = %id, tenant_id = %record.tenant_id, event_type = %record.event_type, "outbox record requeued");
        Ok(record)
    }

    pub async fn delete(&self, id: OutboxRecordId) -> Result<(), OutboxError> {
        if !self.store.delete(id).await? {
            return Err(OutboxError::NotFound(id));
        }
        info!(record_id = %id, "outbox record deleted");
        Ok(())
    }

    /// Delete terminal records processed more than `days` days before `now`.
    pub async fn cleanup_at(&self, days: u32, now: DateTime<Utc>) -> Result<u64, OutboxError> {
        let cutoff = now - chrono::Duration::days(i64::from(days));
        let deleted = self.store.delete_processed_before(cutoff).await?;
        info!(deleted, days, "manual outbox cleanup");
        Ok(deleted)
    }

    pub async fn cleanup(&self, days: u32) -> Result<u64, OutboxError> {
        self.cleanup_at(days, Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryOutboxStore;
    use devboard_core::TenantId;

    #[tokio::test]
    async fn requeue_rejects_pending_records() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let record = OutboxRecord::new(TenantId::new(), "board.created", "{}", Utc::now());
        store.insert(record.clone()).await.unwrap();

        let admin = OutboxAdmin::new(store);
        assert!(matches!(admin.retry(record.id).await, Err(OutboxError::InvalidState(_))));
        assert!(matches!(
            admin.retry(OutboxRecordId::new()).await,
            Err(OutboxError::NotFound(_))
        ));
    }
}
