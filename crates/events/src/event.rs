use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use devboard_core::{EventId, TenantId};

/// An integration event: a fact published to other services through the outbox.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **tenant-scoped** (every event names its owning tenant)
/// - **self-describing** (`EVENT_TYPE` selects the deserializer on the way out)
pub trait IntegrationEvent:
    Serialize + DeserializeOwned + Clone + core::fmt::Debug + Send + Sync + 'static
{
    /// Stable event name/type identifier (e.g. "task_item.created").
    ///
    /// Persisted with the outbox record and used as the broker routing key, so it
    /// must never change once events of this type have been written.
    const EVENT_TYPE: &'static str;

    /// Unique identity of this occurrence (consumer idempotency key).
    fn event_id(&self) -> EventId;

    /// Owning tenant.
    fn tenant_id(&self) -> TenantId;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
