//! Exponential-backoff retry policy for ComfyUI WebSocket connections.
//!
//! The progress monitor consults [`RetryPolicy`] when a handshake fails
//! or an established stream drops: it waits
//! [`delay_for_retry`](RetryPolicy::delay_for_retry) before the next
//! attempt and gives up once [`max_attempts`](RetryPolicy::max_attempts)
//! consecutive attempts have failed.

use std::time::Duration;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Consecutive failed attempts tolerated before giving up.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based):
    /// `initial_delay * multiplier^(retry - 1)`, clamped to `max_delay`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let mut delay = self.initial_delay;
        for _ in 1..retry {
            delay = next_delay(delay, self);
        }
        delay.min(self.max_delay)
    }

    /// Whether another attempt is allowed after `failed` consecutive
    /// failures.
    pub fn allows_retry(&self, failed: u32) -> bool {
        failed < self.max_attempts
    }
}

/// Calculate the next backoff delay from the current delay and policy.
///
/// The result is clamped to [`RetryPolicy::max_delay`].
pub fn next_delay(current: Duration, policy: &RetryPolicy) -> Duration {
    let next_ms = (current.as_millis() as f64 * policy.multiplier) as u64;
    Duration::from_millis(next_ms).min(policy.max_delay)
}
