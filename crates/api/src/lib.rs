//! DevBoard API: outbox operator endpoints and the background delivery workers.

pub mod app;
pub mod config;
pub mod consumers;
pub mod middleware;
