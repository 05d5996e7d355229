//! Outbox record: the persisted unit of undelivered work.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use devboard_core::{OutboxRecordId, TenantId};

/// Timestamp format prefixed to stored failure messages.
const ERROR_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A staged integration event.
///
/// State machine:
/// - `processed_at == None`: pending (eligible for dispatch while
///   `retry_count < max_retries` and not leased)
/// - `processed_at != None, error == None`: delivered
/// - `processed_at != None, error != None`: abandoned
///
/// Terminal records are never dispatched again; only the operator requeue
/// action moves them back to pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: OutboxRecordId,
    pub tenant_id: TenantId,
    pub event_type: String,
    /// Serialized event body (JSON text).
    pub payload: String,
    pub occurred_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub error: Option<String>,
    /// Store-assigned insertion order; tie-breaker for equal `occurred_at`.
    pub sequence: i64,
    /// Claim lease / retry backoff. Hidden from FETCH while in the future.
    pub locked_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Delivered,
    Abandoned,
}

/// Result of recording a failed publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Still pending; will be retried on a later cycle.
    Retrying,
    /// Retry budget exhausted (or failure was terminal); parked.
    Abandoned,
}

impl OutboxRecord {
    /// New pending record. `sequence` is assigned by the store on insert.
    pub fn new(
        tenant_id: TenantId,
        event_type: impl Into<String>,
        payload: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OutboxRecordId::new(),
            tenant_id,
            event_type: event_type.into(),
            payload: payload.into(),
            occurred_at,
            processed_at: None,
            retry_count: 0,
            error: None,
            sequence: 0,
            locked_until: None,
        }
    }

    pub fn status(&self) -> RecordStatus {
        match (&self.processed_at, &self.error) {
            (None, _) => RecordStatus::Pending,
            (Some(_), None) => RecordStatus::Delivered,
            (Some(_), Some(_)) => RecordStatus::Abandoned,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.processed_at.is_none()
    }

    /// Eligible for FETCH at `now`.
    pub fn is_dispatchable(&self, max_retries: u32, now: DateTime<Utc>) -> bool {
        self.is_pending()
            && self.retry_count < max_retries
            && self.locked_until.is_none_or(|until| until <= now)
    }

    pub fn mark_delivered(&mut self, now: DateTime<Utc>) {
        self.processed_at = Some(now);
        self.error = None;
        self.locked_until = None;
    }

    /// Unknown event type or undeserializable payload: terminal without
    /// touching `retry_count`.
    pub fn mark_undeliverable(&mut self, message: &str, now: DateTime<Utc>) {
        self.processed_at = Some(now);
        self.error = Some(format_error(message, now));
        self.locked_until = None;
    }

    /// Record one failed publish attempt.
    ///
    /// `force_abandon` parks the record regardless of the remaining budget.
    /// `backoff` (if any) hides a still-pending record from FETCH until
    /// `now + backoff`.
    pub fn record_failure(
        &mut self,
        message: &str,
        now: DateTime<Utc>,
        max_retries: u32,
        force_abandon: bool,
        backoff: Option<Duration>,
    ) -> FailureOutcome {
        self.retry_count = self.retry_count.saturating_add(1);
        self.error = Some(format_error(message, now));

        if force_abandon || self.retry_count >= max_retries {
            self.processed_at = Some(now);
            self.locked_until = None;
            return FailureOutcome::Abandoned;
        }

        self.locked_until = backoff
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| now + d);
        FailureOutcome::Retrying
    }

    /// Operator requeue: back to a fresh pending state.
    pub fn requeue(&mut self) {
        self.processed_at = None;
        self.error = None;
        self.retry_count = 0;
        self.locked_until = None;
    }
}

/// `"[yyyy-MM-dd HH:mm:ss] message"`
pub fn format_error(message: &str, at: DateTime<Utc>) -> String {
    format!("[{}] {}", at.format(ERROR_TIMESTAMP_FORMAT), message)
}

/// Aggregate counts for the operator surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxStats {
    pub total: u64,
    pub pending: u64,
    /// Delivered (processed without error).
    pub processed: u64,
    /// Abandoned (processed with error).
    pub failed: u64,
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
        }
    }
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self { page, page_size }
    }

    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1) * self.limit()
    }

    pub fn limit(&self) -> usize {
        self.page_size.max(1) as usize
    }
}
