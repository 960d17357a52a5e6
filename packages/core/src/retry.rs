//! Backoff strategies for automatic retries.

use std::time::Duration;

/// Decides how long a job waits before it becomes claimable again.
///
/// Implementations are stateless: the delay depends only on the retry number,
/// so the same strategy can be shared by every worker.
pub trait RetryStrategy: Send + Sync + std::fmt::Debug {
    /// Delay before retry number `attempt` (1-indexed).
    fn delay_for(&self, attempt: u32) -> Duration;
}

/// Doubling delay starting at `base`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            max: Duration::from_secs(300),
        }
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        // 2^31 already overflows any sensible cap.
        let exp = (attempt - 1).min(31);
        self.base
            .checked_mul(1u32 << exp)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Same delay for every retry. `FixedDelay(Duration::ZERO)` retries immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixedDelay(pub Duration);

impl RetryStrategy for FixedDelay {
    fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 { Duration::ZERO } else { self.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_doubles_from_two_seconds() {
        let backoff = ExponentialBackoff::default();
        assert_eq!(backoff.delay_for(0), Duration::ZERO);
        assert_eq!(backoff.delay_for(1), Duration::from_secs(2));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(4));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(8));
    }

    #[test]
    fn exponential_is_capped() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(2), Duration::from_secs(10));
        assert_eq!(backoff.delay_for(4), Duration::from_secs(10));
        assert_eq!(backoff.delay_for(200), Duration::from_secs(10));
    }

    #[test]
    fn fixed_delay_ignores_attempt() {
        let fixed = FixedDelay(Duration::from_millis(50));
        assert_eq!(fixed.delay_for(1), Duration::from_millis(50));
        assert_eq!(fixed.delay_for(9), Duration::from_millis(50));
    }
}
