//! Configuration loading and representation.
//!
//! Configuration is read once (typically from the environment) into an explicit
//! [`QueueConfig`] that is handed to the components that need it. Nothing in
//! the pipeline looks configuration up on its own.

use std::time::Duration;

/// Default number of delivery attempts per work item.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;

/// Default share of attempts failed on purpose when failure simulation is on.
pub const DEFAULT_FAILURE_RATE_PERCENT: u8 = 20;

/// Default number of messages handled per consumer invocation.
pub const DEFAULT_MAX_MESSAGES: usize = 10;

pub const ENV_ENABLED: &str = "ORDERMAIL_ENABLED";
pub const ENV_MAX_RETRY_ATTEMPTS: &str = "ORDERMAIL_MAX_RETRY_ATTEMPTS";
pub const ENV_SIMULATE_FAILURES: &str = "ORDERMAIL_SIMULATE_FAILURES";
pub const ENV_FAILURE_RATE_PERCENT: &str = "ORDERMAIL_FAILURE_RATE_PERCENT";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Order email queue settings.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct QueueConfig {
    /// Queue order emails instead of sending them during checkout.
    pub enabled: bool,
    /// Total delivery attempts before a work item is dead-lettered.
    pub max_retry_attempts: u32,
    /// Fail a share of delivery attempts on purpose (exercises the retry path).
    pub simulate_failures: bool,
    /// Share of attempts failed when `simulate_failures` is on (0-100).
    pub failure_rate_percent: u8,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            simulate_failures: false,
            failure_rate_percent: DEFAULT_FAILURE_RATE_PERCENT,
        }
    }
}

impl QueueConfig {
    /// Load from `ORDERMAIL_*` environment variables; unset keys keep defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_ENABLED) {
            config.enabled = parse_bool(ENV_ENABLED, &value)?;
        }

        if let Some(value) = lookup(ENV_MAX_RETRY_ATTEMPTS) {
            config.max_retry_attempts = parse_max_retries(&value)?;
        }

        if let Some(value) = lookup(ENV_SIMULATE_FAILURES) {
            config.simulate_failures = parse_bool(ENV_SIMULATE_FAILURES, &value)?;
        }

        if let Some(value) = lookup(ENV_FAILURE_RATE_PERCENT) {
            let rate = value
                .trim()
                .parse::<u32>()
                .map_err(|_| invalid(ENV_FAILURE_RATE_PERCENT, &value))?;
            config.failure_rate_percent = rate.min(100) as u8;
        }

        Ok(config)
    }

    pub fn with_max_retry_attempts(mut self, max_retry_attempts: u32) -> Self {
        self.max_retry_attempts = normalize_max_retries(i64::from(max_retry_attempts));
        self
    }

    pub fn with_simulated_failures(mut self, rate_percent: u8) -> Self {
        self.simulate_failures = true;
        self.failure_rate_percent = rate_percent.min(100);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Queue consumer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerOptions {
    /// Upper bound on messages handled by one `drain` call.
    pub max_messages: usize,
    /// Idle wait between polls of an empty queue (background consumers only).
    pub poll_interval: Duration,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_MAX_MESSAGES,
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl ConsumerOptions {
    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

fn invalid(key: &'static str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

// Blank, zero and negative values all mean "use the default".
fn parse_max_retries(value: &str) -> Result<u32, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(DEFAULT_MAX_RETRY_ATTEMPTS);
    }

    let parsed = trimmed
        .parse::<i64>()
        .map_err(|_| invalid(ENV_MAX_RETRY_ATTEMPTS, value))?;
    Ok(normalize_max_retries(parsed))
}

fn normalize_max_retries(value: i64) -> u32 {
    if value <= 0 {
        DEFAULT_MAX_RETRY_ATTEMPTS
    } else {
        u32::try_from(value).unwrap_or(u32::MAX)
    }
}
