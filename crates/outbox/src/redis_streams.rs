//! Redis Streams broker (`redis` feature).
//!
//! Each envelope is `XADD`ed to `prefix:event_type` with the tenant and event
//! ids as separate fields, so consumers can filter without decoding.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use devboard_events::{ErrorKind, EventEnvelope};

use crate::broker::{Broker, PublishError};

const DEFAULT_PREFIX: &str = "devboard:events";

#[derive(Debug, Clone)]
pub struct RedisStreamsBroker {
    client: Arc<redis::Client>,
    prefix: String,
}

impl RedisStreamsBroker {
    pub fn new(redis_url: impl AsRef<str>, prefix: Option<String>) -> Result<Self, PublishError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| PublishError::transport(format!("redis connection error: {e}")))?;
        Ok(Self {
            client: Arc::new(client),
            prefix: prefix.unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
        })
    }

    pub fn stream_key(&self, event_type: &str) -> String {
        format!("{}:{}", self.prefix, event_type)
    }

    fn publish_sync(client: &redis::Client, stream_key: &str, envelope: &EventEnvelope) -> Result<(), PublishError> {
        let body = serde_json::to_string(envelope)
            .map_err(|e| PublishError::new(ErrorKind::MalformedPayload, e.to_string()))?;

        let mut conn = client
            .get_connection()
            .map_err(|e| PublishError::transport(format!("redis connection error: {e}")))?;

        let _: String = redis::cmd("XADD")
            .arg(stream_key)
            .arg("*")
            .arg("event_id")
            .arg(envelope.event_id().to_string())
            .arg("tenant_id")
            .arg(envelope.tenant_id().to_string())
            .arg("event_type")
            .arg(envelope.event_type())
            .arg("envelope")
            .arg(&body)
            .query(&mut conn)
            .map_err(|e| PublishError::transport(format!("XADD failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl Broker for RedisStreamsBroker {
    #[instrument(
        skip(self, envelope),
        fields(event_type = envelope.event_type(), tenant_id = %envelope.tenant_id()),
        err
    )]
    async fn publish(&self, envelope: EventEnvelope) -> Result<(), PublishError> {
        let client = Arc::clone(&self.client);
        let stream_key = self.stream_key(envelope.event_type());

        // The redis client is synchronous; keep it off the async workers.
        tokio::task::spawn_blocking(move || Self::publish_sync(&client, &stream_key, &envelope))
            .await
            .map_err(|e| PublishError::new(ErrorKind::Unknown, format!("publish task failed: {e}")))?
    }
}
