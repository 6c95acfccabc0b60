//! Exponential backoff with jitter, shared by article fetching and the
//! inference API client.
//!
//! The delay before retry `n` (1-based) is
//!
//! ```text
//! delay = min(base_delay * 2^(n-1), max_delay) + random_jitter(0..=jitter)
//! ```

use rand::{Rng, rng};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one; at least 1.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles with each attempt.
    pub base_delay: Duration,
    /// Cap for the exponential part.
    pub max_delay: Duration,
    /// Upper bound of the random extra delay.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// A policy that never waits, for callers that want bare retries.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Whether another attempt may follow attempt number `attempt`.
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return delay;
        }
        let extra: u64 = rng().random_range(0..=jitter_ms);
        delay + Duration::from_millis(extra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: Duration::ZERO,
        }
    }

    #[test]
    fn test_delay_doubles() {
        let policy = no_jitter();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(5), Duration::from_secs(16));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = no_jitter();
        assert_eq!(policy.delay_for(6), Duration::from_secs(30));
        assert_eq!(policy.delay_for(60), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy {
            jitter: Duration::from_millis(250),
            ..no_jitter()
        };
        for _ in 0..50 {
            let d = policy.delay_for(1);
            assert!(d >= Duration::from_secs(1));
            assert!(d <= Duration::from_millis(1250));
        }
    }

    #[test]
    fn test_allows_retry_after() {
        let policy = RetryPolicy::immediate(3);
        assert!(policy.allows_retry_after(1));
        assert!(policy.allows_retry_after(2));
        assert!(!policy.allows_retry_after(3));
        assert!(!RetryPolicy::immediate(0).allows_retry_after(1));
    }
}
