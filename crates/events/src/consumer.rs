//! Consumer runtime: routes envelopes to handlers, redelivers, dead-letters.
//!
//! Transport-level redelivery is independent of the outbox's own retry
//! bookkeeping. It uses an incremental backoff (`initial`, `initial + step`,
//! `initial + 2*step`, ...) bounded by `retry_limit`; a failure the classifier
//! marks terminal skips the remaining retries. Exhausted messages go to the
//! dead-letter sink.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use devboard_core::TenantId;

use crate::bus::Subscription;
use crate::envelope::EventEnvelope;
use crate::event::IntegrationEvent;
use crate::failure::{ErrorKind, FailureClassifier};
use crate::handler::{EventHandler, HandlerError, TypedHandler};

/// Incremental redelivery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    /// Redeliveries after the first attempt (0 = no redelivery).
    pub retry_limit: u32,
    /// Delay before the first redelivery.
    pub initial_interval: Duration,
    /// Added to the delay for every further redelivery.
    pub interval_increment: Duration,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            initial_interval: Duration::from_secs(5),
            interval_increment: Duration::from_secs(5),
        }
    }
}

impl RedeliveryPolicy {
    pub fn incremental(retry_limit: u32, initial_interval: Duration, interval_increment: Duration) -> Self {
        Self {
            retry_limit,
            initial_interval,
            interval_increment,
        }
    }

    /// Policy that never waits between redeliveries (tests).
    pub fn immediate(retry_limit: u32) -> Self {
        Self::incremental(retry_limit, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before redelivery number `retry` (1-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        self.initial_interval + self.interval_increment * (retry - 1)
    }
}

/// A message the consumer gave up on.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub envelope: EventEnvelope,
    pub error: String,
    pub error_kind: ErrorKind,
    pub attempts: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DeadLetterError {
    #[error("dead-letter storage error: {0}")]
    Storage(String),
}

/// Destination for messages whose redelivery budget is exhausted.
pub trait DeadLetterSink: Send + Sync {
    fn dead_letter(&self, letter: DeadLetter) -> Result<(), DeadLetterError>;
}

/// In-memory dead-letter queue for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterSink {
    letters: Mutex<Vec<DeadLetter>>,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Dead letters belonging to one tenant.
    pub fn letters_for_tenant(&self, tenant_id: TenantId) -> Vec<DeadLetter> {
        self.letters()
            .into_iter()
            .filter(|l| l.envelope.tenant_id() == tenant_id)
            .collect()
    }
}

impl DeadLetterSink for InMemoryDeadLetterSink {
    fn dead_letter(&self, letter: DeadLetter) -> Result<(), DeadLetterError> {
        self.letters
            .lock()
            .map_err(|_| DeadLetterError::Storage("lock poisoned".to_string()))?
            .push(letter);
        Ok(())
    }
}

/// What happened to one delivered envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// A handler accepted the message after `attempts` tries.
    Handled { attempts: u32 },
    /// No handler is registered for the event type.
    Unrouted,
    /// Redelivery exhausted (or failure was terminal); parked in the dead-letter sink.
    DeadLettered { attempts: u32 },
}

/// Routes envelopes to the handler registered for their event type.
pub struct ConsumerRunner {
    handlers: HashMap<String, Box<dyn EventHandler>>,
    policy: RedeliveryPolicy,
    classifier: FailureClassifier,
    dead_letters: Arc<dyn DeadLetterSink>,
}

impl ConsumerRunner {
    pub fn new(policy: RedeliveryPolicy, dead_letters: Arc<dyn DeadLetterSink>) -> Self {
        Self {
            handlers: HashMap::new(),
            policy,
            classifier: FailureClassifier::default(),
            dead_letters,
        }
    }

    pub fn with_classifier(mut self, classifier: FailureClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Register the handler for an event type, replacing any previous one.
    pub fn register(&mut self, event_type: impl Into<String>, handler: impl EventHandler + 'static) {
        self.handlers.insert(event_type.into(), Box::new(handler));
    }

    /// Register a typed handler; the event type comes from `E::EVENT_TYPE`.
    pub fn register_typed<E, F>(&mut self, f: F)
    where
        E: IntegrationEvent,
        F: Fn(&E) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.register(E::EVENT_TYPE, TypedHandler::new(f));
    }

    pub fn handles(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// Deliver one envelope, redelivering per policy.
    pub fn deliver(&self, envelope: &EventEnvelope) -> DeliveryOutcome {
        let Some(handler) = self.handlers.get(envelope.event_type()) else {
            debug!(event_type = envelope.event_type(), "no handler registered; skipping");
            return DeliveryOutcome::Unrouted;
        };

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let err = match handler.handle(envelope) {
                Ok(()) => return DeliveryOutcome::Handled { attempts },
                Err(err) => err,
            };

            let retries_used = attempts - 1;
            let retryable = self.classifier.is_retryable(err.kind());
            if !retryable || retries_used >= self.policy.retry_limit {
                warn!(
                    event_id = %envelope.event_id(),
                    event_type = envelope.event_type(),
                    tenant_id = %envelope.tenant_id(),
                    attempts,
                    retryable,
                    error = %err,
                    "handler failed; dead-lettering"
                );
                self.park(envelope, &err, attempts);
                return DeliveryOutcome::DeadLettered { attempts };
            }

            let delay = self.policy.delay_for_retry(attempts);
            debug!(
                event_id = %envelope.event_id(),
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "handler failed; redelivering"
            );
            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }
    }

    fn park(&self, envelope: &EventEnvelope, err: &HandlerError, attempts: u32) {
        let letter = DeadLetter {
            envelope: envelope.clone(),
            error: err.message().to_string(),
            error_kind: err.kind(),
            attempts,
            dead_lettered_at: Utc::now(),
        };
        if let Err(e) = self.dead_letters.dead_letter(letter) {
            error!(event_id = %envelope.event_id(), error = %e, "failed to dead-letter message");
        }
    }

    /// Spawn a worker thread that feeds the subscription through this runner.
    ///
    /// `tenant_id`: when provided, envelopes for other tenants are ignored.
    pub fn spawn(
        self,
        name: &'static str,
        subscription: Subscription<EventEnvelope>,
        tenant_id: Option<TenantId>,
    ) -> std::io::Result<ConsumerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || consumer_loop(name, self, subscription, shutdown_rx, tenant_id))?;

        Ok(ConsumerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

/// Handle to control and join a consumer thread.
#[derive(Debug)]
pub struct ConsumerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl ConsumerHandle {
    /// Request graceful shutdown and wait for the consumer to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

fn consumer_loop(
    name: &'static str,
    runner: ConsumerRunner,
    subscription: Subscription<EventEnvelope>,
    shutdown_rx: mpsc::Receiver<()>,
    tenant_id: Option<TenantId>,
) {
    let tick = Duration::from_millis(250);
    info!(consumer = name, "consumer started");

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match subscription.recv_timeout(tick) {
            Ok(envelope) => {
                if let Some(t) = tenant_id {
                    if envelope.tenant_id() != t {
                        continue;
                    }
                }
                runner.deliver(&envelope);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(consumer = name, "consumer stopped");
}
