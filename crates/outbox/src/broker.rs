//! Broker publish seam used by the dispatcher.

use std::time::Duration;

use async_trait::async_trait;

use devboard_events::{ErrorKind, EventBus, EventEnvelope, HasErrorKind};

/// A failed publish attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct PublishError {
    kind: ErrorKind,
    message: String,
}

impl PublishError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(ErrorKind::Timeout, format!("publish timed out after {}ms", after.as_millis()))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl HasErrorKind for PublishError {
    fn error_kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Publishes envelopes to the message broker, routed by `event_type`.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, envelope: EventEnvelope) -> Result<(), PublishError>;
}

/// Broker over any [`EventBus`] of envelopes (in-process pub/sub).
#[derive(Debug, Clone)]
pub struct BusBroker<B> {
    bus: B,
}

impl<B> BusBroker<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

#[async_trait]
impl<B> Broker for BusBroker<B>
where
    B: EventBus<EventEnvelope>,
{
    async fn publish(&self, envelope: EventEnvelope) -> Result<(), PublishError> {
        self.bus
            .publish(envelope)
            .map_err(|e| PublishError::transport(e.to_string()))
    }
}
