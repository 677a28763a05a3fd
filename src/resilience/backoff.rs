//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Backoff bounds for a retry loop.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl BackoffPolicy {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self { base_ms, max_ms }
    }

    /// Delay before attempt `attempt + 1`, given `attempt` failures so far.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponential = 2u64.saturating_pow(attempt - 1);
        let capped = self.base_ms.saturating_mul(exponential).min(self.max_ms);

        // Apply jitter (0 to 10% of the delay)
        let jitter_range = capped / 10;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };

        Duration::from_millis(capped + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = BackoffPolicy::new(100, 1_000);
        assert_eq!(policy.delay_for(0), Duration::ZERO);

        let first = policy.delay_for(1).as_millis();
        assert!((100..110).contains(&first));

        let second = policy.delay_for(2).as_millis();
        assert!((200..220).contains(&second));

        let capped = policy.delay_for(30).as_millis();
        assert!((1_000..1_100).contains(&capped));
    }
}
