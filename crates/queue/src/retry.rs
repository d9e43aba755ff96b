//! Requeue delays for failed jobs.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Exponential backoff applied when a failed job goes back to pending.
///
/// This is separate from the HTTP retry inside the API client: a job is only
/// requeued after the client has already given up on its own retries.
#[derive(Debug, Clone)]
pub struct JobRetryConfig {
    /// Delay before the first requeued run.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Growth factor per failed attempt.
    pub multiplier: f64,
}

impl Default for JobRetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(3600),
            multiplier: 2.0,
        }
    }
}

impl JobRetryConfig {
    /// Delay after the given number of failures (0-indexed).
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(63) as i32;
        let delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs.max(0.0))
    }

    /// When a job that has failed `attempt_count` times becomes runnable again.
    #[must_use]
    pub fn next_run_at(&self, now: DateTime<Utc>, attempt_count: u32) -> DateTime<Utc> {
        let delay = self.delay_for_attempt(attempt_count.saturating_sub(1));
        chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(now)
    }

    /// Whether a job with `attempt_count` recorded failures may run again.
    #[must_use]
    pub const fn should_retry(attempt_count: u32, max_attempts: u32) -> bool {
        attempt_count < max_attempts
    }
}
