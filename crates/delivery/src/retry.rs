/*!
 * Retry Policy
 *
 * Exponential backoff with additive jitter, honouring subscriber
 * `Retry-After` hints.
 */

use rand::Rng;
use std::time::Duration;

/// Backoff policy for retryable delivery failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
    max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            max_retries: 5,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64, max_retries: u32) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            max_retries,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether another attempt remains for an event that has already been
    /// retried `retry_count` times.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Delay before attempt `retry_count + 1`.
    ///
    /// Formula: `cap + U[0, cap]` where `cap = min(base * 2^retry_count, max)`.
    /// The jitter is additive, so the worst case is twice the cap.
    pub fn calculate_delay(&self, retry_count: u32) -> Duration {
        let cap = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(retry_count))
            .min(self.max_delay_ms);

        let jitter = rand::thread_rng().gen_range(0..=cap);

        Duration::from_millis(cap + jitter)
    }

    /// Like [`calculate_delay`](Self::calculate_delay), but a positive
    /// `Retry-After` hint overrides the jittered backoff (never below the
    /// base delay).
    pub fn delay_with_hint(&self, retry_count: u32, retry_after_seconds: Option<i64>) -> Duration {
        match retry_after_seconds {
            Some(secs) if secs > 0 => {
                Duration::from_millis((secs as u64 * 1_000).max(self.base_delay_ms))
            }
            _ => self.calculate_delay(retry_count),
        }
    }
}
