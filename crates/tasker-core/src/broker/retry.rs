//! Retry policy: decides backoff delays.

use std::time::Duration;

/// Exponential backoff, capped.
///
/// delay = min(base_delay * multiplier^(attempt - 1), max_delay)
///
/// Example with base_delay=10s, multiplier=2.0, max_delay=10min:
/// - attempt 1 (first failure): 10s
/// - attempt 2: 20s
/// - attempt 3: 40s
/// - ...
/// - attempt 7 and later: 10min
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            base_delay,
            // multiplier < 1 would make delays shrink
            multiplier: multiplier.max(1.0),
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Delay before re-leasing a task after its `attempt`-th failure (1-indexed).
    ///
    /// Never decreases as `attempt` grows.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), 2.0, Duration::from_secs(600))
    }
}
