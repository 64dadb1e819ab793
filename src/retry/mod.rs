//! Timeout and retry-with-backoff for backend calls.
//!
//! Retries dispatch on `GenError::is_retryable`, so validation, quota and
//! permission failures surface after the first attempt.

use std::future::Future;
use std::time::Duration;

use crate::errors::GenError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    /// Budget for each attempt; `None` waits forever.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            attempt_timeout: Some(Duration::from_secs(60)),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based): 1s, 2s, 4s, ...
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let ms = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32 - 1);
        Duration::from_millis(ms.min(self.max_delay.as_millis() as f64) as u64)
    }
}

/// Run `fut`, turning a hang longer than `limit` into `GenError::Timeout`.
pub async fn with_timeout<T, F>(limit: Option<Duration>, fut: F) -> Result<T, GenError>
where
    F: Future<Output = Result<T, GenError>>,
{
    match limit {
        None => fut.await,
        Some(d) => match tokio::time::timeout(d, fut).await {
            Ok(res) => res,
            Err(_) => Err(GenError::Timeout { secs: d.as_secs() }),
        },
    }
}

/// Call `operation` until it succeeds, fails with a non-retryable error, or
/// runs out of attempts. The last error is returned.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, label: &str, mut operation: F) -> Result<T, GenError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GenError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match with_timeout(policy.attempt_timeout, operation()).await {
            Ok(v) => {
                if attempt > 1 {
                    tracing::info!(label, attempt, "succeeded after retry");
                }
                return Ok(v);
            }
            Err(e) if !e.is_retryable() => {
                tracing::warn!(label, attempt, error = %e, "non-retryable error");
                return Err(e);
            }
            Err(e) if attempt >= max_attempts => {
                tracing::warn!(label, attempt, error = %e, "giving up after max attempts");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(label, attempt, delay_ms = delay.as_millis() as u64, error = %e, "attempt failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[test]
    fn test_delay_doubles() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_after(1), Duration::from_secs(1));
        assert_eq!(p.delay_after(2), Duration::from_secs(2));
        assert_eq!(p.delay_after(3), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();

        let res = retry_with_backoff(&RetryPolicy::default(), "item", || {
            let calls = calls.clone();
            let stamps = stamps.clone();
            async move {
                stamps.lock().push(start.elapsed());
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(GenError::Transient("server hiccup".into()))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(res, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let stamps = stamps.lock();
        let first_gap = stamps[1] - stamps[0];
        let second_gap = stamps[2] - stamps[1];
        assert!(first_gap >= Duration::from_millis(1000) && first_gap < Duration::from_millis(1100));
        assert!(second_gap >= Duration::from_millis(2000) && second_gap < Duration::from_millis(2100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let res: Result<(), GenError> = retry_with_backoff(&RetryPolicy::default(), "item", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GenError::from_remote_message("You do not have permission to edit this generation"))
            }
        })
        .await;

        assert!(matches!(res, Err(GenError::Permission(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let res: Result<(), GenError> = retry_with_backoff(&RetryPolicy::default(), "item", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GenError::Transient("boom".into()))
            }
        })
        .await;

        assert_eq!(res, Err(GenError::Transient("boom".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hang_becomes_timeout() {
        let res: Result<(), GenError> = with_timeout(Some(Duration::from_secs(60)), async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        })
        .await;
        assert_eq!(res, Err(GenError::Timeout { secs: 60 }));
    }
}
