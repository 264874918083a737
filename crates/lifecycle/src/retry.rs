//! Backoff schedule for shipment attempts.

use std::time::Duration;

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub multiplier: f64,
    /// Upper bound on any single wait between attempts.
    pub max_backoff: Duration,
    /// Attempts in total, the first one included.
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(2),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(10),
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Wait before the attempt following `failed_attempts` failures.
    ///
    /// The first retry waits `initial_backoff`; each later one multiplies it,
    /// never exceeding `max_backoff`.
    pub fn backoff_after(&self, failed_attempts: u32) -> Duration {
        if failed_attempts == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(failed_attempts - 1).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    pub fn has_budget(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}
