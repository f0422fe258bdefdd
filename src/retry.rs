//! Retry with exponential backoff and jitter.
//!
//! The policy is pure with respect to the operation it drives: it never
//! swallows or reclassifies errors, and the final attempt's error is
//! returned to the caller unchanged.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Exponential backoff policy for fallible async operations.
///
/// `retries` is the number of *additional* attempts after the first one,
/// so an operation runs at most `retries + 1` times. The unjittered delay
/// before the k-th retry (0-indexed) is `min(max_delay, base_delay * 2^k)`,
/// then scaled by a jitter factor drawn uniformly from [0.8, 1.2].
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(retries: u32, base_delay: Duration) -> Self {
        Self {
            retries,
            base_delay,
            max_delay: Duration::from_secs(5),
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Run `op` until it succeeds or `retries` additional attempts have failed.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= self.retries {
                        error!(retries = self.retries, error = %err, "all retries exhausted");
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt = attempt + 1,
                        retries = self.retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Jittered delay before the retry following the `attempt`-th failure.
    fn delay_for(&self, attempt: u32) -> Duration {
        let raw = self.base_delay.as_secs_f64() * 2f64.powi(attempt.min(30) as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        Duration::from_secs_f64(capped * jitter)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let policy = BackoffPolicy::new(3, Duration::from_millis(1));
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result: Result<u32, String> = policy
            .run(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_at_most_retries_plus_one_attempts() {
        let policy = BackoffPolicy::new(3, Duration::from_millis(1));
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result: Result<u32, String> = policy
            .run(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("boom".to_string())
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_zero_retries_runs_once() {
        let policy = BackoffPolicy::new(0, Duration::from_millis(1));
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result: Result<u32, String> = policy
            .run(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("boom".to_string())
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_final_error_propagated_unchanged() {
        let policy = BackoffPolicy::new(2, Duration::from_millis(1));
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result: Result<u32, String> = policy
            .run(|| {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    Err(format!("failure {}", n))
                }
            })
            .await;

        // The last attempt's error, not the first
        assert_eq!(result.unwrap_err(), "failure 2");
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let policy = BackoffPolicy::new(3, Duration::from_millis(1));
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result: Result<&str, String> = policy
            .run(|| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_delay_within_jitter_bounds() {
        let policy = BackoffPolicy::new(5, Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(1));

        for attempt in 0..6 {
            let unjittered = (0.1 * 2f64.powi(attempt as i32)).min(1.0);
            for _ in 0..50 {
                let delay = policy.delay_for(attempt).as_secs_f64();
                assert!(delay >= unjittered * 0.8 - 1e-9, "delay {} below bound", delay);
                assert!(delay <= unjittered * 1.2 + 1e-9, "delay {} above bound", delay);
                assert!(delay > 0.0);
            }
        }
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = BackoffPolicy::new(10, Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(2));

        // 1 * 2^9 = 512s raw, capped to 2s before jitter
        let delay = policy.delay_for(9).as_secs_f64();
        assert!(delay <= 2.0 * 1.2 + 1e-9);
    }
}
