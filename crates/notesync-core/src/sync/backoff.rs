//! Exponential backoff shared by per-record retries and the scheduler.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// `delay = min(base * 2^attempts, cap)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    /// Base delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

const fn default_base_delay_ms() -> u64 {
    1_000
}

const fn default_max_delay_ms() -> u64 {
    5 * 60 * 1_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base_delay_ms: base.as_millis() as u64,
            max_delay_ms: cap.as_millis() as u64,
        }
    }

    /// Delay before the next attempt after `attempts` failures
    #[must_use]
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let factor = 1_u64.checked_shl(attempts).unwrap_or(u64::MAX);
        let delay = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Same as [`Self::delay_for`], in signed milliseconds for timestamp math
    #[must_use]
    pub fn delay_ms_for(&self, attempts: u32) -> i64 {
        i64::try_from(self.delay_for(attempts).as_millis()).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_cap() {
        let policy = RetryPolicy::new(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(4), Duration::from_secs(1));
        assert_eq!(policy.delay_for(200), Duration::from_secs(1));
    }

    #[test]
    fn defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_ms_for(30), 300_000);
    }
}
