//! Retry policy for recoverable load failures

use std::time::Duration;

use crate::error::ErrorCode;

/// Linear back-off: attempt `n` waits `n × base_delay`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry `attempt` (1-based), `None` once the bound is exceeded
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        Some(self.base_delay * attempt)
    }

    /// Whether a failure with `code` after `attempts_made` retries gets another
    pub fn should_retry(&self, code: ErrorCode, attempts_made: u32) -> bool {
        code.is_recoverable() && attempts_made < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}
