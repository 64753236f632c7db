use rand::Rng;
use std::time::Duration;

const JITTER_FACTOR: f64 = 0.3; // Add 0-30% random jitter

/// Retry contract for generation calls: `max_retries` is the total number
/// of attempts, with a backoff sleep before every attempt after the first.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Base delay before the given attempt (1-based); doubles per attempt.
    /// The first attempt never sleeps.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        self.initial_delay * 2u32.saturating_pow(attempt - 2)
    }

    /// Backoff with additive jitter to avoid thundering-herd retries.
    /// Jitter only lengthens the delay, preserving the minimum interval.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.backoff_delay(attempt);
        if base.is_zero() {
            return base;
        }
        let jitter = rand::rng().random_range(0.0..JITTER_FACTOR);
        base.mul_f64(1.0 + jitter)
    }
}
