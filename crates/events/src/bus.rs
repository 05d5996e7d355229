//! Publish/subscribe transport abstraction (mechanics only).
//!
//! The bus is what the outbox dispatcher ultimately hands envelopes to and what
//! consumer runners read from.
//!
//! - **Transport-agnostic**: in-memory channels, Redis Streams, a real broker.
//! - **At-least-once**: the outbox may republish after a crash, so every
//!   consumer must be idempotent.
//! - **No persistence**: the outbox table is the durable copy until delivery.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to the bus.
///
/// Each subscription receives a copy of every published message (broadcast
/// semantics). Subscriptions are meant to be consumed from a single thread.
///
/// ```ignore
/// let subscription = bus.subscribe();
/// loop {
///     match subscription.recv_timeout(Duration::from_millis(250)) {
///         Ok(envelope) => runner.deliver(&envelope),
///         Err(RecvTimeoutError::Timeout) => continue, // check for shutdown
///         Err(RecvTimeoutError::Disconnected) => break,
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Event bus (pub/sub abstraction).
///
/// `publish()` may fail (bus closed, network error). The outbox dispatcher treats
/// such a failure as a failed delivery attempt and retries on a later cycle;
/// the record stays in the outbox until a publish succeeds.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Display + core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
