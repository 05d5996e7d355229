//! Shared building blocks for the DevBoard services.
//!
//! Strongly-typed identifiers for tenants, projects, boards, task items,
//! integration events and outbox records.

pub mod error;
pub mod id;

pub use error::InvalidId;
pub use id::{BoardId, EventId, OutboxRecordId, ProjectId, TaskItemId, TenantId, UserId};
