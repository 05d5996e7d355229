//! Outbox writer: stages an integration event inside the caller's unit of work.

use async_trait::async_trait;
use tracing::debug;

use devboard_core::OutboxRecordId;
use devboard_events::IntegrationEvent;

use crate::error::OutboxError;
use crate::record::OutboxRecord;
use crate::store::UnitOfWork;

/// Append integration events to an already-open unit of work.
///
/// The writer never opens a transaction and never talks to the broker: the
/// caller's commit makes the record durable, a rollback (or dropping the unit
/// of work) means it never existed.
///
/// ```ignore
/// let mut uow = store.begin().await?;
/// // ... business writes on the same transaction ...
/// uow.append(&TaskItemCreated { .. }).await?;
/// uow.commit().await?;
/// ```
#[async_trait]
pub trait OutboxWriter {
    async fn append<E: IntegrationEvent>(&mut self, event: &E) -> Result<OutboxRecordId, OutboxError>;
}

#[async_trait]
impl<U: UnitOfWork> OutboxWriter for U {
    async fn append<E: IntegrationEvent>(&mut self, event: &E) -> Result<OutboxRecordId, OutboxError> {
        let payload = serde_json::to_string(event)?;
        let record = OutboxRecord::new(event.tenant_id(), E::EVENT_TYPE, payload, event.occurred_at());
        let id = record.id;

        self.stage(record).await?;

        debug!(
            record_id = %id,
            tenant_id = %event.tenant_id(),
            event_type = E::EVENT_TYPE,
            "integration event staged"
        );
        Ok(id)
    }
}
