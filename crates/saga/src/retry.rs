//! Retry policy for activity invocations.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Geometric backoff with a cap and an attempt limit.
///
/// The wait before retry `k` (0-based) is
/// `min(initial_interval * backoff_coefficient^k, maximum_interval)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub maximum_interval: Duration,
    pub maximum_attempts: u32,
}

impl RetryPolicy {
    /// 1s, doubling, capped at 1m, 3 attempts.
    pub fn standard() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(60),
            maximum_attempts: 3,
        }
    }

    /// For calls that usually recover quickly.
    pub fn aggressive() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(30),
            maximum_attempts: 5,
        }
    }

    /// For expensive calls that should not be hammered.
    pub fn conservative() -> Self {
        Self {
            initial_interval: Duration::from_secs(2),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(120),
            maximum_attempts: 2,
        }
    }

    pub fn no_retry() -> Self {
        Self {
            maximum_attempts: 1,
            ..Self::standard()
        }
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_maximum_interval(mut self, interval: Duration) -> Self {
        self.maximum_interval = interval;
        self
    }

    pub fn with_maximum_attempts(mut self, attempts: u32) -> Self {
        self.maximum_attempts = attempts;
        self
    }

    /// Attempts actually made; a zero limit still allows one call.
    pub fn attempts(&self) -> u32 {
        self.maximum_attempts.max(1)
    }

    /// Wait before retry number `retry` (0 for the wait after the first failure).
    pub fn interval_for(&self, retry: u32) -> Duration {
        let factor = self.backoff_coefficient.max(1.0).powi(retry.min(i32::MAX as u32) as i32);
        let interval = self.initial_interval.as_secs_f64() * factor;
        let capped = interval.min(self.maximum_interval.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.maximum_interval)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_grows_geometrically_until_capped() {
        let policy = RetryPolicy::standard();
        assert_eq!(policy.interval_for(0), Duration::from_secs(1));
        assert_eq!(policy.interval_for(1), Duration::from_secs(2));
        assert_eq!(policy.interval_for(2), Duration::from_secs(4));
        assert_eq!(policy.interval_for(6), Duration::from_secs(60));
        assert_eq!(policy.interval_for(40), Duration::from_secs(60));
    }

    #[test]
    fn huge_maximum_interval_does_not_overflow() {
        let policy = RetryPolicy::standard().with_maximum_interval(Duration::MAX);
        assert_eq!(policy.interval_for(0), Duration::from_secs(1));
        assert_eq!(policy.interval_for(u32::MAX), Duration::MAX);

        let policy = RetryPolicy::standard()
            .with_initial_interval(Duration::MAX)
            .with_maximum_interval(Duration::MAX);
        assert_eq!(policy.interval_for(3), Duration::MAX);
    }

    #[test]
    fn presets() {
        assert_eq!(RetryPolicy::aggressive().maximum_attempts, 5);
        assert_eq!(RetryPolicy::conservative().initial_interval, Duration::from_secs(2));
        assert_eq!(RetryPolicy::no_retry().attempts(), 1);
        assert_eq!(RetryPolicy::standard().with_maximum_attempts(0).attempts(), 1);
    }
}
