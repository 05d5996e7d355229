//! Outbox and consumer settings, loaded from environment variables.
//!
//! Every variable is optional; unset means the default. A set-but-invalid
//! value is a [`ConfigError`].

use std::time::Duration;

use devboard_events::RedeliveryPolicy;

use crate::error::ConfigError;

/// Backoff curve applied to a pending record after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffStrategy {
    /// Retry on the next poll.
    #[default]
    None,
    /// `base` every time.
    Fixed,
    /// `base * attempt`
    Linear,
    /// `base * 2^(attempt - 1)`
    Exponential,
}

impl std::str::FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "fixed" => Ok(Self::Fixed),
            "linear" => Ok(Self::Linear),
            "exponential" => Ok(Self::Exponential),
            other => Err(format!("unknown backoff strategy '{other}'")),
        }
    }
}

/// Per-record retry backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBackoff {
    pub strategy: BackoffStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::None,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(600),
        }
    }
}

impl RetryBackoff {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            base_delay: delay,
            max_delay: delay,
        }
    }

    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay,
            max_delay,
        }
    }

    /// Delay after failed attempt number `attempt` (1-indexed), capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        let attempt = attempt.max(1);
        let delay = match self.strategy {
            BackoffStrategy::None => return None,
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                self.base_delay.saturating_mul(factor)
            }
        };
        Some(delay.min(self.max_delay))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherSettings {
    pub interval: Duration,
    pub batch_size: usize,
    pub max_retries: u32,
    pub startup_delay: Duration,
    pub publish_timeout: Duration,
    pub claim_lease: Duration,
    pub backoff: RetryBackoff,
    /// Abandon a record immediately when the classifier marks the publish
    /// failure terminal.
    pub short_circuit_terminal: bool,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            batch_size: 20,
            max_retries: 5,
            startup_delay: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(5),
            claim_lease: Duration::from_secs(60),
            backoff: RetryBackoff::default(),
            short_circuit_terminal: false,
        }
    }
}

impl DispatcherSettings {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    pub fn with_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_short_circuit_terminal(mut self, enabled: bool) -> Self {
        self.short_circuit_terminal = enabled;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaperSettings {
    pub interval: Duration,
    pub retention: Duration,
    pub startup_delay: Duration,
}

impl Default for ReaperSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 60 * 60),
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            startup_delay: Duration::from_secs(5 * 60),
        }
    }
}

impl ReaperSettings {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboxSettings {
    pub dispatcher: DispatcherSettings,
    pub reaper: ReaperSettings,
}

impl OutboxSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup (environment, map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let vars = Vars(&lookup);

        let backoff = RetryBackoff {
            strategy: vars.parse("OUTBOX_RETRY_BACKOFF", defaults.dispatcher.backoff.strategy)?,
            base_delay: vars.secs("OUTBOX_RETRY_BACKOFF_BASE_SECS", defaults.dispatcher.backoff.base_delay, 1)?,
            max_delay: vars.secs("OUTBOX_RETRY_BACKOFF_MAX_SECS", defaults.dispatcher.backoff.max_delay, 1)?,
        };

        let dispatcher = DispatcherSettings {
            interval: vars.secs("OUTBOX_DISPATCHER_INTERVAL_SECS", defaults.dispatcher.interval, 1)?,
            batch_size: vars.positive("OUTBOX_DISPATCHER_BATCH_SIZE", defaults.dispatcher.batch_size)?,
            max_retries: vars.positive("OUTBOX_MAX_RETRIES", defaults.dispatcher.max_retries)?,
            startup_delay: vars.secs("OUTBOX_DISPATCHER_STARTUP_DELAY_SECS", defaults.dispatcher.startup_delay, 0)?,
            publish_timeout: vars.secs("OUTBOX_PUBLISH_TIMEOUT_SECS", defaults.dispatcher.publish_timeout, 1)?,
            claim_lease: vars.secs("OUTBOX_CLAIM_LEASE_SECS", defaults.dispatcher.claim_lease, 1)?,
            backoff,
            short_circuit_terminal: vars.parse(
                "OUTBOX_SHORT_CIRCUIT_TERMINAL",
                defaults.dispatcher.short_circuit_terminal,
            )?,
        };

        // Stored in an INTEGER column.
        if dispatcher.max_retries > i32::MAX as u32 {
            return Err(ConfigError::new(
                "OUTBOX_MAX_RETRIES",
                dispatcher.max_retries.to_string(),
                format!("must be <= {}", i32::MAX),
            ));
        }
        if dispatcher.claim_lease <= dispatcher.publish_timeout {
            return Err(ConfigError::new(
                "OUTBOX_CLAIM_LEASE_SECS",
                dispatcher.claim_lease.as_secs().to_string(),
                "must exceed OUTBOX_PUBLISH_TIMEOUT_SECS",
            ));
        }

        let reaper = ReaperSettings {
            interval: vars.scaled("OUTBOX_REAPER_INTERVAL_HOURS", defaults.reaper.interval, 3600, 1)?,
            retention: vars.scaled("OUTBOX_REAPER_RETENTION_DAYS", defaults.reaper.retention, 86_400, 0)?,
            startup_delay: vars.scaled("OUTBOX_REAPER_STARTUP_DELAY_MINUTES", defaults.reaper.startup_delay, 60, 0)?,
        };

        Ok(Self { dispatcher, reaper })
    }
}

/// Consumer redelivery policy from `CONSUMER_RETRY_LIMIT` and
/// `CONSUMER_RETRY_INTERVAL_SECS` (used as both first delay and increment).
pub fn redelivery_policy_from_env() -> Result<RedeliveryPolicy, ConfigError> {
    redelivery_policy_from_lookup(|key| std::env::var(key).ok())
}

pub fn redelivery_policy_from_lookup<F>(lookup: F) -> Result<RedeliveryPolicy, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = RedeliveryPolicy::default();
    let vars = Vars(&lookup);
    let retry_limit: u32 = vars.parse("CONSUMER_RETRY_LIMIT", defaults.retry_limit)?;
    let interval = vars.secs("CONSUMER_RETRY_INTERVAL_SECS", defaults.initial_interval, 0)?;
    Ok(RedeliveryPolicy::incremental(retry_limit, interval, interval))
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match (self.0)(var) {
            None => Ok(default),
            Some(raw) if raw.trim().is_empty() => Ok(default),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map_err(|e| ConfigError::new(var, raw.clone(), e.to_string())),
        }
    }

    fn positive<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr + PartialOrd + std::fmt::Display + From<u8>,
        T::Err: std::fmt::Display,
    {
        self.at_least(var, default, T::from(1))
    }

    /// Parsed straight into `T`, so values outside its range are rejected.
    fn at_least<T>(&self, var: &'static str, default: T, min: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr + PartialOrd + std::fmt::Display,
        T::Err: std::fmt::Display,
    {
        let value: T = self.parse(var, default)?;
        if value < min {
            return Err(ConfigError::new(var, value.to_string(), format!("must be >= {min}")));
        }
        Ok(value)
    }

    fn secs(&self, var: &'static str, default: Duration, min: u64) -> Result<Duration, ConfigError> {
        self.scaled(var, default, 1, min)
    }

    /// Integer in `unit_secs` units (hours = 3600, days = 86400).
    fn scaled(&self, var: &'static str, default: Duration, unit_secs: u64, min: u64) -> Result<Duration, ConfigError> {
        let value = self.at_least(var, default.as_secs() / unit_secs, min)?;
        let secs = value
            .checked_mul(unit_secs)
            .ok_or_else(|| ConfigError::new(var, value.to_string(), "out of range"))?;
        Ok(Duration::from_secs(secs))
    }
}
