//! Outbox dispatcher: delivers pending records to the broker.
//!
//! One cycle:
//!
//! 1. claim up to `batch_size` dispatchable records (oldest first, leased)
//! 2. for each record: decode, publish with a timeout, update its state
//! 3. persist every mutation in one `save_batch`, release anything not attempted
//!
//! A record is only attempted while the lease still covers a full publish
//! timeout; the rest of the batch is released for the next cycle. The save
//! writes back only rows this claim still owns, so a slow cycle whose lease
//! ran out can never overwrite the outcome of the dispatcher that re-claimed
//! the row.
//!
//! Per-record failures never abort the batch. A cycle-level error (store
//! unreachable) is logged and the loop carries on; leases expire and the rows
//! are picked up again later.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use devboard_events::{FailureClassifier, OUTBOX_RECORD_ID_HEADER};

use crate::broker::{Broker, PublishError};
use crate::config::DispatcherSettings;
use crate::error::OutboxError;
use crate::record::{FailureOutcome, OutboxRecord};
use crate::registry::EventRegistry;
use crate::store::{OutboxStore, lease_deadline};
use crate::worker::{WorkerHandle, shutdown_requested, sleep_or_shutdown};

/// Counts for one dispatch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub claimed: usize,
    pub delivered: usize,
    /// Failed but still pending.
    pub retried: usize,
    /// Failed and parked (retry budget spent or terminal failure).
    pub abandoned: usize,
    /// Unknown event type or undeserializable payload.
    pub undeliverable: usize,
    /// Claimed but not attempted (shutdown, or the lease running out).
    pub released: usize,
    /// Attempted but not saved: deleted or re-claimed elsewhere meanwhile.
    pub stale: usize,
}

impl CycleReport {
    pub fn failed(&self) -> usize {
        self.retried + self.abandoned + self.undeliverable
    }
}

/// Source of the timestamps written onto records.
#[derive(Debug, Clone, Copy)]
enum Clock {
    System,
    Fixed(DateTime<Utc>),
}

impl Clock {
    fn now(self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(at) => at,
        }
    }
}

pub struct OutboxDispatcher {
    store: Arc<dyn OutboxStore>,
    broker: Arc<dyn Broker>,
    registry: Arc<EventRegistry>,
    classifier: FailureClassifier,
    settings: DispatcherSettings,
}

impl OutboxDispatcher {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        broker: Arc<dyn Broker>,
        registry: Arc<EventRegistry>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            store,
            broker,
            registry,
            classifier: FailureClassifier::default(),
            settings,
        }
    }

    pub fn with_classifier(mut self, classifier: FailureClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    /// Run one cycle now. Each record is stamped with the time its attempt finished.
    pub async fn run_cycle(&self) -> Result<CycleReport, OutboxError> {
        self.dispatch(Clock::System, None).await
    }

    /// Run one cycle with an explicit clock reading used for every record.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleReport, OutboxError> {
        self.dispatch(Clock::Fixed(now), None).await
    }

    /// Like [`run_cycle_at`](Self::run_cycle_at), stopping between records once
    /// `shutdown` flips to `true`.
    pub async fn run_cycle_until(
        &self,
        now: DateTime<Utc>,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<CycleReport, OutboxError> {
        self.dispatch(Clock::Fixed(now), Some(shutdown)).await
    }

    async fn dispatch(&self, clock: Clock, shutdown: Option<&watch::Receiver<bool>>) -> Result<CycleReport, OutboxError> {
        let s = &self.settings;
        let claimed_at = clock.now();
        let lease_until = lease_deadline(claimed_at, s.claim_lease)?;
        let batch = self
            .store
            .claim_pending(s.batch_size, s.max_retries, s.claim_lease, claimed_at)
            .await?;
        // Last moment a publish can start and still finish inside the lease.
        let last_start = Instant::now() + s.claim_lease.saturating_sub(s.publish_timeout);

        let mut report = CycleReport {
            claimed: batch.len(),
            ..CycleReport::default()
        };
        if batch.is_empty() {
            debug!("no pending outbox records");
            return Ok(report);
        }

        let mut processed = Vec::with_capacity(batch.len());
        let mut unattempted = Vec::new();

        for mut record in batch {
            if !unattempted.is_empty() || shutdown.is_some_and(shutdown_requested) || Instant::now() > last_start {
                unattempted.push(record.id);
                continue;
            }
            self.process(&mut record, clock, &mut report).await;
            processed.push(record);
        }
        report.released = unattempted.len();

        let saved = self.store.save_batch(&processed, lease_until).await?;
        report.stale = processed.len().saturating_sub(saved);
        if report.stale > 0 {
            warn!(stale = report.stale, "outbox records changed hands during dispatch; their outcome was discarded");
        }
        if !unattempted.is_empty() {
            self.store.release(&unattempted, lease_until).await?;
            info!(released = unattempted.len(), "released unattempted outbox records");
        }

        info!(
            claimed = report.claimed,
            delivered = report.delivered,
            failed = report.failed(),
            abandoned = report.abandoned + report.undeliverable,
            stale = report.stale,
            "outbox dispatch cycle complete"
        );
        Ok(report)
    }

    async fn process(&self, record: &mut OutboxRecord, clock: Clock, report: &mut CycleReport) {
        let envelope = match self.registry.decode(&record.event_type, &record.payload) {
            Ok(envelope) => envelope.with_header(OUTBOX_RECORD_ID_HEADER, record.id.to_string()),
            Err(e) => {
                error!(
                    record_id = %record.id,
                    tenant_id = %record.tenant_id,
                    event_type = %record.event_type,
                    error = %e,
                    "outbox record cannot be decoded; marking undeliverable"
                );
                record.mark_undeliverable(&e.to_string(), clock.now());
                report.undeliverable += 1;
                return;
            }
        };

        let timeout = self.settings.publish_timeout;
        let published = match tokio::time::timeout(timeout, self.broker.publish(envelope)).await {
            Ok(result) => result,
            Err(_) => Err(PublishError::timeout(timeout)),
        };

        match published {
            Ok(()) => {
                record.mark_delivered(clock.now());
                report.delivered += 1;
                debug!(
                    record_id = %record.id,
                    tenant_id = %record.tenant_id,
                    event_type = %record.event_type,
                    "outbox record delivered"
                );
            }
            Err(e) => self.record_failure(record, &e, clock.now(), report),
        }
    }

    fn record_failure(&self, record: &mut OutboxRecord, err: &PublishError, now: DateTime<Utc>, report: &mut CycleReport) {
        let s = &self.settings;
        let terminal = s.short_circuit_terminal && !self.classifier.is_retryable_error(err);
        let backoff = s.backoff.delay_for_attempt(record.retry_count + 1);

        match record.record_failure(err.message(), now, s.max_retries, terminal, backoff) {
            FailureOutcome::Retrying => {
                report.retried += 1;
                warn!(
                    record_id = %record.id,
                    tenant_id = %record.tenant_id,
                    event_type = %record.event_type,
                    retry_count = record.retry_count,
                    error_kind = ?err.kind(),
                    error = %err,
                    "outbox publish failed; will retry"
                );
            }
            FailureOutcome::Abandoned => {
                report.abandoned += 1;
                error!(
                    record_id = %record.id,
                    tenant_id = %record.tenant_id,
                    event_type = %record.event_type,
                    retry_count = record.retry_count,
                    error_kind = ?err.kind(),
                    error = %err,
                    "outbox publish failed; record abandoned"
                );
            }
        }
    }

    /// Poll forever (startup delay, then every `interval`) until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.settings.interval.as_millis() as u64,
            batch_size = self.settings.batch_size,
            max_retries = self.settings.max_retries,
            "outbox dispatcher started"
        );

        if sleep_or_shutdown(self.settings.startup_delay, &mut shutdown).await {
            info!("outbox dispatcher stopped before first cycle");
            return;
        }

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.dispatch(Clock::System, Some(&shutdown)).await {
                        error!(error = %e, "outbox dispatch cycle failed");
                    }
                    if shutdown_requested(&shutdown) {
                        break;
                    }
                }
            }
        }

        info!("outbox dispatcher stopped");
    }

    pub fn spawn(self) -> WorkerHandle {
        WorkerHandle::spawn("outbox-dispatcher", move |shutdown| self.run(shutdown))
    }
}
