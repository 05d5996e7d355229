//! Transactional outbox for DevBoard integration events.
//!
//! A business write and the record "this event happened" commit together
//! ([`OutboxWriter`] on a [`UnitOfWork`]); the [`OutboxDispatcher`] later
//! delivers pending records to a [`Broker`] at-least-once, with bounded
//! retries and abandonment; the [`OutboxReaper`] purges old terminal records.
//! [`OutboxAdmin`] is the operator surface.

pub mod admin;
pub mod broker;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod reaper;
pub mod record;
pub mod registry;
pub mod store;
pub mod worker;
pub mod writer;

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(test)]
mod integration_tests;

pub use admin::OutboxAdmin;
pub use broker::{Broker, BusBroker, PublishError};
pub use config::{
    BackoffStrategy, DispatcherSettings, OutboxSettings, ReaperSettings, RetryBackoff,
    redelivery_policy_from_env, redelivery_policy_from_lookup,
};
pub use dispatcher::{CycleReport, OutboxDispatcher};
pub use error::{ConfigError, OutboxError};
pub use reaper::OutboxReaper;
pub use record::{FailureOutcome, OutboxRecord, OutboxStats, PageRequest, RecordStatus};
pub use registry::{DecodeError, EventRegistry};
pub use store::{
    InMemoryOutboxStore, InMemoryUnitOfWork, OutboxStore, PgUnitOfWork, PostgresOutboxStore, UnitOfWork, lease_deadline,
};
pub use worker::WorkerHandle;
pub use writer::OutboxWriter;

#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsBroker;
