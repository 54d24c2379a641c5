//! Reconnect backoff policy.
//!
//! Delays double from a base up to a ceiling, `min(max_delay, base · 2^n)`,
//! and the channel gives up for good after a fixed number of consecutive
//! failures – a dead relay is surfaced to the operator instead of being
//! retried forever.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// First retry delay.
    pub base: Duration,
    /// Delay ceiling.
    pub max_delay: Duration,
    /// Consecutive failures tolerated before the channel is abandoned.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u128 << attempt.min(31);
        let ms = self.base.as_millis().saturating_mul(factor);
        Duration::from_millis(ms.min(self.max_delay.as_millis()) as u64)
    }

    /// Whether `attempts` consecutive failures exhaust the budget.
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}
