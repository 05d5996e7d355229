//! Integration events and the delivery mechanics around them.
//!
//! - `event` / `catalog`: the integration event contract and the DevBoard events
//! - `envelope`: the broker-facing message (metadata + JSON payload)
//! - `bus` / `in_memory_bus`: publish/subscribe transport abstraction
//! - `failure`: error-kind classification (retryable vs. terminal)
//! - `handler` / `consumer`: idempotent consumer handlers with redelivery and dead-lettering

pub mod bus;
pub mod catalog;
pub mod consumer;
pub mod envelope;
pub mod event;
pub mod failure;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use consumer::{
    ConsumerHandle, ConsumerRunner, DeadLetter, DeadLetterError, DeadLetterSink, DeliveryOutcome,
    InMemoryDeadLetterSink, RedeliveryPolicy,
};
pub use envelope::{EventEnvelope, OUTBOX_RECORD_ID_HEADER, TENANT_ID_HEADER};
pub use event::IntegrationEvent;
pub use failure::{ErrorKind, FailureClassifier, HasErrorKind, Retryability};
pub use handler::{EventHandler, HandlerError, IdempotentHandler, TypedHandler};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
