//! Outbox error types.

use devboard_core::OutboxRecordId;
use devboard_events::{ErrorKind, HasErrorKind};

/// Errors raised by outbox stores, the writer and the operator surface.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OutboxError {
    /// Event payload could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backing store failed (connection, query, pool closed).
    #[error("storage error: {0}")]
    Storage(String),

    /// Unique constraint violated (e.g. duplicate record id).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("outbox record not found: {0}")]
    NotFound(OutboxRecordId),

    /// Requested transition is not valid for the record's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl From<serde_json::Error> for OutboxError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl HasErrorKind for OutboxError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            Self::Serialization(_) => ErrorKind::MalformedPayload,
            Self::Storage(_) => ErrorKind::Database,
            Self::Conflict(_) => ErrorKind::ConcurrencyConflict,
            Self::NotFound(_) => ErrorKind::InvalidArgument,
            Self::InvalidState(_) => ErrorKind::InvalidOperation,
        }
    }
}

/// Invalid configuration value (startup error, never silently defaulted).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid value for {var}: {value:?} ({reason})")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

impl ConfigError {
    pub fn new(var: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            var,
            value: value.into(),
            reason: reason.into(),
        }
    }
}
