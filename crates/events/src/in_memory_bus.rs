//! In-process bus the outbox dispatcher publishes to when no external broker
//! is configured.
//!
//! Envelopes handed over by `BusBroker` are fanned out to every live consumer
//! subscription in the same process. Nothing is persisted here: the outbox
//! row stays the durable copy, and a publish only counts once every current
//! subscriber has a copy queued.

use std::sync::{Mutex, MutexGuard, mpsc};

use crate::bus::{EventBus, Subscription};

#[derive(Debug, thiserror::Error)]
pub enum InMemoryBusError {
    /// A thread panicked while holding the bus state; the dispatcher retries the record later.
    #[error("in-process bus state poisoned")]
    Poisoned,
}

#[derive(Debug)]
struct Fanout<M> {
    consumers: Vec<mpsc::Sender<M>>,
    published: u64,
}

/// Broadcast bus for a single process (dev, tests, in-memory deployments).
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    state: Mutex<Fanout<M>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Envelopes accepted since start; each counts once however many consumers got it.
    pub fn published_count(&self) -> u64 {
        self.state.lock().map(|s| s.published).unwrap_or(0)
    }

    /// Consumers still attached. Closed subscriptions are dropped on the next publish.
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().map(|s| s.consumers.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Fanout<M>>, InMemoryBusError> {
        self.state.lock().map_err(|_| InMemoryBusError::Poisoned)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            state: Mutex::new(Fanout {
                consumers: Vec::new(),
                published: 0,
            }),
        }
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, envelope: M) -> Result<(), Self::Error> {
        let mut state = self.lock()?;
        state.consumers.retain(|consumer| consumer.send(envelope.clone()).is_ok());
        state.published += 1;
        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();
        // Poisoned: the subscription is returned but stays silent.
        if let Ok(mut state) = self.lock() {
            state.consumers.push(tx);
        }
        Subscription::new(rx)
    }
}
