//! Retry limits and backoff schedule

use chrono::Duration;

/// Failed attempts after which an entry is marked `failed`
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Exponential backoff: after the k-th failure the next attempt waits
/// `2 * 2^(k-1)` base units (2, 4, 8, 16, 32 with the default limit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// One backoff time unit
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::minutes(1),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay scheduled after `retry_count` consecutive failures
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(20);
        self.base_delay * (2_i32 << exponent)
    }
}
