//! Retry policy: retry-or-dead-letter decision and exponential backoff.
//!
//! The policy is pure. It never sleeps; the computed backoff is advisory
//! metadata handed to the broker together with the redelivery request.

use std::time::Duration;

use serde::Serialize;

use crate::config::{DEFAULT_MAX_RETRY_ATTEMPTS, QueueConfig};

/// Outcome of consulting the policy after a failed attempt.
///
/// Derived on every failure from the work item's `retry_count`; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryDecision {
    pub should_retry: bool,
    /// `retry_count` the work item carries from now on.
    pub next_retry_count: u32,
    /// `2^next_retry_count` seconds.
    pub backoff_seconds: u64,
}

impl RetryDecision {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_seconds)
    }
}

/// Exponential backoff (base 2) with a cap on total delivery attempts.
///
/// With `max_retries = N` a work item is attempted at most `N` times: failures
/// 1..N-1 are retried, failure N is dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRY_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// `0` falls back to the default of 3.
    pub fn new(max_retries: u32) -> Self {
        if max_retries == 0 {
            Self::default()
        } else {
            Self { max_retries }
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.max_retry_attempts)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Decide what happens after the attempt made with `current_retry_count` failed.
    pub fn decide(&self, current_retry_count: u32) -> RetryDecision {
        let next_retry_count = current_retry_count.saturating_add(1);

        RetryDecision {
            should_retry: next_retry_count < self.max_retries,
            next_retry_count,
            backoff_seconds: backoff_seconds(next_retry_count),
        }
    }
}

/// `2^attempt` seconds, saturating at `u64::MAX`.
pub fn backoff_seconds(attempt: u32) -> u64 {
    1u64.checked_shl(attempt).unwrap_or(u64::MAX)
}
