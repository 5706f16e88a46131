//! Retry policy for failed chunk attempts.

use crate::config::SchedulerConfig;
use crate::error::TranscriptionError;
use std::time::Duration;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep this long, then try again.
    RetryAfter(Duration),
    GiveUp,
}

/// Exponential backoff with a fixed attempt budget.
///
/// Pure: the caller owns the timer, so tests can check decisions without
/// sleeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            base,
            max_backoff,
        }
    }

    /// Decide after attempt number `attempt` (1-based) failed with `error`.
    pub fn decide(&self, attempt: u32, error: &TranscriptionError) -> RetryDecision {
        if !error.retryable || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(self.backoff(attempt))
    }

    /// `base · 2^(attempt − 1)`, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl From<&SchedulerConfig> for RetryPolicy {
    fn from(config: &SchedulerConfig) -> Self {
        Self::new(config.max_attempts, config.backoff_base, config.backoff_max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}
