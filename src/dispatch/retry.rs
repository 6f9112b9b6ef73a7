//! Retry schedule for notification attempts.

use std::time::Duration;

/// Exponential-backoff retry policy.
///
/// The first attempt fires immediately; attempt `n` then waits
/// `base_delay_ms * 2^(n-2)`, so with the defaults attempts land at
/// t = 0s, 1s and 3s relative to the first send.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per contact and channel
    pub max_attempts: u32,
    /// Backoff unit in milliseconds
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Delay to sleep before the 1-based `attempt_no`, or `None` when
    /// the attempt budget is spent.
    pub fn delay_before(&self, attempt_no: u32) -> Option<Duration> {
        if attempt_no == 0 || attempt_no > self.max_attempts {
            return None;
        }
        if attempt_no == 1 {
            return Some(Duration::ZERO);
        }
        let factor = 1u64 << (attempt_no - 2).min(32);
        Some(Duration::from_millis(self.base_delay_ms * factor))
    }
}
