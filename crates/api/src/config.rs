//! Process configuration for the DevBoard API binary.

use std::net::SocketAddr;

use devboard_events::RedeliveryPolicy;
use devboard_outbox::{ConfigError, OutboxSettings, redelivery_policy_from_lookup};

const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_addr: SocketAddr,
    /// Postgres outbox store instead of the in-memory one.
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    /// Redis Streams broker instead of the in-process bus (`redis` feature).
    pub redis_url: Option<String>,
    pub outbox: OutboxSettings,
    pub consumer: RedeliveryPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            use_persistent_stores: false,
            database_url: None,
            redis_url: None,
            outbox: OutboxSettings::default(),
            consumer: RedeliveryPolicy::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let raw_addr = non_empty("DEVBOARD_HTTP_ADDR").unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string());
        let http_addr = raw_addr
            .parse()
            .map_err(|e| ConfigError::new("DEVBOARD_HTTP_ADDR", raw_addr.clone(), format!("{e}")))?;

        let use_persistent_stores = match non_empty("USE_PERSISTENT_STORES") {
            None => false,
            Some(raw) => parse_flag(&raw)
                .ok_or_else(|| ConfigError::new("USE_PERSISTENT_STORES", raw.clone(), "expected true/false"))?,
        };

        let database_url = non_empty("DATABASE_URL");
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::new(
                "DATABASE_URL",
                "",
                "required when USE_PERSISTENT_STORES=true",
            ));
        }

        Ok(Self {
            http_addr,
            use_persistent_stores,
            database_url,
            redis_url: non_empty("REDIS_URL"),
            outbox: OutboxSettings::from_lookup(&lookup)?,
            consumer: redelivery_policy_from_lookup(&lookup)?,
        })
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}
