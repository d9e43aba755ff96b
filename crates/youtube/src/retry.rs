//! Retry policy with jittered exponential backoff.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::ApiError;

/// Retry configuration for upstream calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Fraction of the delay randomly added or removed, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Calculate the backoff before retry number `attempt` (0-indexed).
    #[must_use]
    pub fn calculate_retry_delay(&self, attempt: u32) -> Duration {
        self.delay_with_sample(attempt, rand::random::<f64>())
    }

    /// Backoff for `attempt` given a uniform sample in `[0, 1)`.
    #[must_use]
    pub fn delay_with_sample(&self, attempt: u32, sample: f64) -> Duration {
        let delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));

        if self.jitter <= 0.0 {
            return delay;
        }

        let factor = self.jitter.mul_add(2.0f64.mul_add(sample, -1.0), 1.0);
        delay.mul_f64(factor.max(0.0))
    }

    /// Check if another attempt is allowed after `attempt` failures.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Run `operation` until it succeeds, fails fatally, or retries run out.
    ///
    /// The closure receives the 0-indexed attempt number.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, ApiError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 0;
        loop {
            match call(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && self.should_retry(attempt) => {
                    let delay = self.calculate_retry_delay(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying upstream request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter(base_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(base_ms),
            jitter: 0.0,
        }
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = no_jitter(1000);

        assert_eq!(policy.calculate_retry_delay(0), Duration::from_millis(1000));
        assert_eq!(policy.calculate_retry_delay(1), Duration::from_millis(2000));
        assert_eq!(policy.calculate_retry_delay(2), Duration::from_millis(4000));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy {
            jitter: 0.5,
            ..no_jitter(1000)
        };

        assert_eq!(policy.delay_with_sample(0, 0.0), Duration::from_millis(500));
        assert_eq!(policy.delay_with_sample(0, 0.5), Duration::from_millis(1000));
        for _ in 0..100 {
            let delay = policy.calculate_retry_delay(1);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(3000));
        }
    }

    #[test]
    fn test_should_retry() {
        let policy = no_jitter(1);

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = no_jitter(1000);

        let counter = calls.clone();
        let result = policy
            .run("test", |_| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ApiError::Network("reset".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert!(matches!(result, Ok(42)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_fatal_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = no_jitter(1000);

        let counter = calls.clone();
        let result: Result<(), _> = policy
            .run("test", |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::QuotaExceeded("spent".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(ApiError::QuotaExceeded(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            max_retries: 2,
            ..no_jitter(1000)
        };

        let counter = calls.clone();
        let result: Result<(), _> = policy
            .run("test", |attempt| {
                let counter = counter.clone();
                async move {
                    assert_eq!(counter.fetch_add(1, Ordering::SeqCst), attempt);
                    Err(ApiError::from_response(500, ""))
                }
            })
            .await;

        assert!(matches!(result, Err(ApiError::Http { status: 500, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
