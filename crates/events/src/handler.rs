//! Consumer-side handler contract.
//!
//! Delivery is at-least-once: the outbox republishes when the dispatcher dies
//! between "published" and "marked delivered", and the consumer runtime
//! redelivers after handler failures. Handlers must therefore make their
//! observable side effects idempotent; [`IdempotentHandler`] does this for the
//! common case by remembering processed event ids.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Mutex;

use tracing::debug;

use devboard_core::EventId;

use crate::envelope::EventEnvelope;
use crate::event::IntegrationEvent;
use crate::failure::{ErrorKind, HasErrorKind};

/// Failure reported by a handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct HandlerError {
    kind: ErrorKind,
    message: String,
}

impl HandlerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedPayload, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl HasErrorKind for HandlerError {
    fn error_kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Handles one envelope (one logical handler per event type).
pub trait EventHandler: Send + Sync {
    fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError>;
}

impl<F> EventHandler for F
where
    F: Fn(&EventEnvelope) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        self(envelope)
    }
}

/// Adapts a typed closure into an [`EventHandler`] by decoding the payload first.
///
/// A payload that does not decode is reported as [`ErrorKind::MalformedPayload`],
/// which the default classifier treats as terminal.
pub struct TypedHandler<E, F> {
    f: F,
    _event: PhantomData<fn() -> E>,
}

impl<E, F> TypedHandler<E, F>
where
    E: IntegrationEvent,
    F: Fn(&E) -> Result<(), HandlerError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _event: PhantomData,
        }
    }
}

impl<E, F> EventHandler for TypedHandler<E, F>
where
    E: IntegrationEvent,
    F: Fn(&E) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let event: E = envelope.decode().map_err(|e| {
            HandlerError::malformed(format!("cannot decode {}: {e}", E::EVENT_TYPE))
        })?;
        (self.f)(&event)
    }
}

/// Suppresses duplicate deliveries of the same event.
///
/// An event id is remembered only after the inner handler succeeds, so a failed
/// attempt is still redelivered.
pub struct IdempotentHandler<H> {
    inner: H,
    processed: Mutex<HashSet<EventId>>,
}

impl<H: EventHandler> IdempotentHandler<H> {
    pub fn new(inner: H) -> Self {
        Self {
            inner,
            processed: Mutex::new(HashSet::new()),
        }
    }

    pub fn processed_count(&self) -> usize {
        self.processed.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl<H: EventHandler> EventHandler for IdempotentHandler<H> {
    fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let event_id = envelope.event_id();
        {
            let processed = self
                .processed
                .lock()
                .map_err(|_| HandlerError::new(ErrorKind::Unknown, "idempotency set poisoned"))?;
            if processed.contains(&event_id) {
                debug!(event_id = %event_id, event_type = envelope.event_type(), "duplicate delivery skipped");
                return Ok(());
            }
        }

        self.inner.handle(envelope)?;

        self.processed
            .lock()
            .map_err(|_| HandlerError::new(ErrorKind::Unknown, "idempotency set poisoned"))?
            .insert(event_id);
        Ok(())
    }
}
