//! Backoff between payout retries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay every time.
    Fixed,
    /// base * 2^(attempt - 1)
    #[default]
    Exponential,
    /// base * attempt
    Linear,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first failure (0 = never retry).
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_secs(900), Duration::from_secs(6 * 3600))
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Delay before retry number `attempt` (1-indexed). Attempt 0 waits nothing.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
        };
        delay.min(self.max_delay)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Earliest time retry number `attempt` may run, counted from `last`.
    pub fn next_attempt_at(&self, last: DateTime<Utc>, attempt: u32) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.delay_for_attempt(attempt))
            .unwrap_or(chrono::Duration::MAX);
        last.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn exponential_doubles_until_the_cap() {
        let policy = RetryPolicy::exponential(10, Duration::from_secs(60), Duration::from_secs(300));
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(120));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(240));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(300));
    }

    #[test]
    fn fixed_and_linear() {
        let fixed = RetryPolicy::fixed(3, Duration::from_secs(10));
        assert_eq!(fixed.delay_for_attempt(3), Duration::from_secs(10));

        let linear = RetryPolicy {
            strategy: BackoffStrategy::Linear,
            ..RetryPolicy::fixed(3, Duration::from_secs(10))
        };
        let linear = RetryPolicy {
            max_delay: Duration::from_secs(100),
            ..linear
        };
        assert_eq!(linear.delay_for_attempt(3), Duration::from_secs(30));
    }

    #[test]
    fn retry_budget() {
        let policy = RetryPolicy::fixed(2, Duration::from_secs(1));
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
        assert!(!RetryPolicy::no_retry().should_retry(0));
    }

    #[test]
    fn next_attempt_is_offset_from_last() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(90));
        let last = Utc::now();
        assert_eq!(policy.next_attempt_at(last, 1), last + chrono::Duration::seconds(90));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn delays_never_exceed_cap(attempt in 0u32..200, base in 1u64..10_000, cap in 1u64..100_000) {
            let policy = RetryPolicy::exponential(5, Duration::from_millis(base), Duration::from_millis(cap));
            prop_assert!(policy.delay_for_attempt(attempt) <= Duration::from_millis(cap));
        }
    }
}
