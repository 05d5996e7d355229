//! Failure classification: which errors are worth retrying.
//!
//! A plain lookup table from [`ErrorKind`] to [`Retryability`]. Kinds missing
//! from the table (and [`ErrorKind::Unknown`]) are retried: retrying costs a
//! little time, dropping an event silently loses data.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Coarse category of a delivery or handling failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Operation exceeded its deadline.
    Timeout,
    /// Transient local I/O failure.
    Io,
    /// Network / broker / HTTP connectivity failure.
    Transport,
    /// Database unavailable or returned a transient error.
    Database,
    /// Optimistic concurrency conflict at the transport or storage level.
    ConcurrencyConflict,
    /// A required value was missing.
    NullArgument,
    /// A value was present but invalid.
    InvalidArgument,
    /// Operation not valid in the current state.
    InvalidOperation,
    /// Caller is not allowed to perform the operation.
    Unauthorized,
    /// Code path not implemented.
    NotImplemented,
    /// Payload could not be decoded into the expected schema.
    MalformedPayload,
    /// Anything else.
    Unknown,
}

/// Outcome of classifying a failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retryability {
    Retryable,
    Terminal,
}

const DEFAULT_TABLE: &[(ErrorKind, Retryability)] = &[
    (ErrorKind::Timeout, Retryability::Retryable),
    (ErrorKind::Io, Retryability::Retryable),
    (ErrorKind::Transport, Retryability::Retryable),
    (ErrorKind::Database, Retryability::Retryable),
    (ErrorKind::ConcurrencyConflict, Retryability::Retryable),
    (ErrorKind::NullArgument, Retryability::Terminal),
    (ErrorKind::InvalidArgument, Retryability::Terminal),
    (ErrorKind::InvalidOperation, Retryability::Terminal),
    (ErrorKind::Unauthorized, Retryability::Terminal),
    (ErrorKind::NotImplemented, Retryability::Terminal),
    (ErrorKind::MalformedPayload, Retryability::Terminal),
];

/// Errors that can be mapped onto an [`ErrorKind`].
pub trait HasErrorKind {
    fn error_kind(&self) -> ErrorKind;
}

/// Table-driven failure classifier.
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    table: HashMap<ErrorKind, Retryability>,
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.iter().copied().collect(),
        }
    }
}

impl FailureClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the classification of a single kind.
    pub fn with_rule(mut self, kind: ErrorKind, retryability: Retryability) -> Self {
        self.table.insert(kind, retryability);
        self
    }

    pub fn classify(&self, kind: ErrorKind) -> Retryability {
        self.table
            .get(&kind)
            .copied()
            .unwrap_or(Retryability::Retryable)
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.classify(kind) == Retryability::Retryable
    }

    /// Classify any error that knows its kind.
    pub fn is_retryable_error<E: HasErrorKind + ?Sized>(&self, error: &E) -> bool {
        self.is_retryable(error.error_kind())
    }
}
