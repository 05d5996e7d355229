use thiserror::Error;

/// A string that does not parse as the requested identifier type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid {kind}: {reason}")]
pub struct InvalidId {
    /// Identifier type name, e.g. `OutboxRecordId`.
    pub kind: &'static str,
    pub reason: String,
}
