//! Exponential backoff with jitter for upload retries.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfiguration;

/// Yields the delay before each retry.
///
/// The delay for retry `n` (1-based) is `base_interval * factor^(n - 1)`,
/// randomized by `±jitter` and capped at `max_interval`. The iterator ends
/// once `max_attempts - 1` delays were produced, so together with the first
/// attempt an operation runs at most `max_attempts` times.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_interval: Duration,
    max_interval: Duration,
    factor: f64,
    jitter: f64,
    max_retries: u32,
    current_retry: u32,
}

impl ExponentialBackoff {
    /// Creates a backoff from the retry configuration.
    pub fn new(config: &RetryConfiguration) -> Self {
        Self {
            base_interval: Duration::from_millis(config.base_interval_in_ms),
            max_interval: Duration::from_millis(config.max_interval_in_ms),
            factor: config.factor,
            jitter: config.jitter,
            max_retries: config.max_attempts.saturating_sub(1),
            current_retry: 0,
        }
    }

    fn calculate_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.max(1) - 1).unwrap_or(i32::MAX);
        let base_delay_ms = (self.base_interval.as_millis() as f64) * self.factor.powi(exponent);

        if self.jitter == 0.0 {
            return Duration::from_millis(base_delay_ms as u64).min(self.max_interval);
        }

        let jitter_factor: f64 = rand::rng().random_range(1.0 - self.jitter..=1.0 + self.jitter);

        Duration::from_millis((base_delay_ms * jitter_factor) as u64).min(self.max_interval)
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_retry >= self.max_retries {
            return None;
        }

        self.current_retry += 1;

        Some(self.calculate_delay(self.current_retry))
    }
}
