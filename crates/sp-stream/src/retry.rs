//! Retry policies consulted by remote sources.
//!
//! A policy only sees the error and how many retries already happened; the
//! source decides how to resume.

use std::fmt;
use std::time::Duration;

use sp_core::config::RetryConfig;
use sp_core::Error;

/// Decides whether and when a failed remote read is retried.
pub trait RetryPolicy: Send + Sync + fmt::Debug {
    /// `attempt` is the number of retries already performed for the segment.
    fn should_retry(&self, error: &Error, attempt: u32) -> bool;

    /// Delay before retry number `attempt` (0-based).
    fn delay_for_attempt(&self, attempt: u32) -> Duration;
}

/// Retries transient errors with exponentially growing, capped delays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, config.base_delay(), config.max_delay())
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn should_retry(&self, error: &Error, attempt: u32) -> bool {
        attempt < self.max_retries && error.is_transient()
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Never retries: the first failure fails the segment.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn should_retry(&self, _error: &Error, _attempt: u32) -> bool {
        false
    }

    fn delay_for_attempt(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}
