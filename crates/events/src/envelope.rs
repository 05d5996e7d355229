use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use devboard_core::{EventId, TenantId};

use crate::event::IntegrationEvent;

/// Header carrying the owning tenant (set on every published envelope).
pub const TENANT_ID_HEADER: &str = "tenant-id";

/// Header carrying the id of the outbox record the envelope was published from.
pub const OUTBOX_RECORD_ID_HEADER: &str = "outbox-record-id";

/// Envelope for a published integration event.
///
/// This is the unit handed to the broker and received by consumers.
///
/// Notes:
/// - **Multi-tenancy** travels both as `tenant_id` and as the `tenant-id` header,
///   so transport-level tooling can filter without decoding the payload.
/// - `event_type` is the routing key.
/// - `payload` is the serialized event body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<P = JsonValue> {
    event_id: EventId,
    tenant_id: TenantId,
    event_type: String,
    occurred_at: DateTime<Utc>,

    #[serde(default)]
    headers: BTreeMap<String, String>,

    payload: P,
}

impl<P> EventEnvelope<P> {
    pub fn new(
        event_id: EventId,
        tenant_id: TenantId,
        event_type: impl Into<String>,
        occurred_at: DateTime<Utc>,
        payload: P,
    ) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(TENANT_ID_HEADER.to_string(), tenant_id.to_string());

        Self {
            event_id,
            tenant_id,
            event_type: event_type.into(),
            occurred_at,
            headers,
            payload,
        }
    }

    /// Attach (or overwrite) a transport header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }
}

impl EventEnvelope<JsonValue> {
    /// Wrap a typed integration event, copying its metadata into the envelope.
    pub fn from_event<E: IntegrationEvent>(event: &E) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_value(event)?;
        Ok(Self::new(
            event.event_id(),
            event.tenant_id(),
            E::EVENT_TYPE,
            event.occurred_at(),
            payload,
        ))
    }

    /// Decode the payload back into a typed event.
    pub fn decode<E: IntegrationEvent>(&self) -> Result<E, serde_json::Error> {
        E::deserialize(&self.payload)
    }
}
