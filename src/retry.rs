//! Retry-with-backoff wrapper for outbound API calls.
//!
//! Every remote call goes through [`with_retry`] rather than hand-rolling a
//! loop per call site. The policy is exponential: the base delay doubles per
//! attempt, a random jitter factor in [0.7, 1.3] is applied, and the result
//! is bounded by `max_delay`. A server-supplied `Retry-After` takes
//! precedence over the computed backoff.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::errors::ApiError;

/// Statuses worth retrying: rate limiting and transient server faults.
pub const DEFAULT_RETRYABLE_STATUSES: &[u16] = &[429, 500, 502, 503, 504];

/// Backoff parameters for one logical request.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound applied after jitter.
    pub max_delay: Duration,
    /// Response statuses that warrant a retry.
    pub retryable_statuses: &'static [u16],
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES,
        }
    }
}

impl RetryPolicy {
    /// Whether the error could succeed on a fresh attempt. Transport-level
    /// failures always qualify; remote failures qualify by status.
    pub fn is_retryable(&self, error: &ApiError) -> bool {
        if error.is_transport() {
            return true;
        }
        match error.status() {
            Some(status) => self.retryable_statuses.contains(&status),
            None => false,
        }
    }

    /// Jittered exponential delay before retry number `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base_ms = self.initial_delay.as_millis() as f64 * 2f64.powi(exponent as i32);
        let jitter = rand::thread_rng().gen_range(0.7..=1.3);
        let delay_ms = (base_ms * jitter).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

/// A single failed attempt, with the server's `Retry-After` when it sent one.
#[derive(Debug)]
pub struct AttemptError {
    pub error: ApiError,
    pub retry_after: Option<Duration>,
}

impl From<ApiError> for AttemptError {
    fn from(error: ApiError) -> Self {
        Self {
            error,
            retry_after: None,
        }
    }
}

/// Run `op` until it succeeds, the error is not retryable, or the policy's
/// retry budget is exhausted. Surfaces the last error on exhaustion.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let mut retries = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(attempt) => {
                retries += 1;
                if retries > policy.max_retries || !policy.is_retryable(&attempt.error) {
                    return Err(attempt.error);
                }
                let delay = attempt
                    .retry_after
                    .unwrap_or_else(|| policy.backoff_delay(retries));
                warn!(
                    "{} failed ({}), retry {}/{} in {:?}",
                    label, attempt.error, retries, policy.max_retries, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn remote(status: u16) -> ApiError {
        ApiError::Remote {
            status,
            detail: "test".to_string(),
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES,
        }
    }

    #[test]
    fn test_backoff_delay_doubles_within_jitter_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 1..=3u32 {
            let base_ms = 1000f64 * 2f64.powi(attempt as i32 - 1);
            for _ in 0..50 {
                let delay = policy.backoff_delay(attempt).as_millis() as f64;
                assert!(
                    delay >= (base_ms * 0.7).floor() && delay <= base_ms * 1.3,
                    "attempt {}: delay {}ms outside [{}ms, {}ms]",
                    attempt,
                    delay,
                    base_ms * 0.7,
                    base_ms * 1.3
                );
            }
        }
    }

    #[test]
    fn test_backoff_delay_bounded_by_cap() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            // 2^9 seconds of base delay, far past the 10s cap.
            let delay = policy.backoff_delay(10);
            assert!(delay <= policy.max_delay);
        }
    }

    #[test]
    fn test_is_retryable_statuses() {
        let policy = RetryPolicy::default();
        for status in [429u16, 500, 502, 503, 504] {
            assert!(policy.is_retryable(&remote(status)), "{}", status);
        }
        for status in [400u16, 401, 403, 404, 409] {
            assert!(!policy.is_retryable(&remote(status)), "{}", status);
        }
        assert!(!policy.is_retryable(&ApiError::MalformedSignature("x".into())));
    }

    #[tokio::test]
    async fn test_with_retry_three_503s_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let result = with_retry(&fast_policy(), "test", move || {
            let calls = calls_in.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 3 {
                    Err(AttemptError::from(remote(503)))
                } else {
                    Ok("payload")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "payload");
        // Exactly 3 retries: 4 attempts total.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_with_retry_exhaustion_surfaces_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let result: Result<(), ApiError> = with_retry(&fast_policy(), "test", move || {
            let calls = calls_in.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AttemptError::from(remote(503)))
            }
        })
        .await;
        assert_eq!(result.unwrap_err().status(), Some(503));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_with_retry_non_retryable_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let result: Result<(), ApiError> = with_retry(&fast_policy(), "test", move || {
            let calls = calls_in.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AttemptError::from(remote(404)))
            }
        })
        .await;
        assert_eq!(result.unwrap_err().status(), Some(404));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_honors_retry_after() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let start = tokio::time::Instant::now();
        let result = with_retry(&fast_policy(), "test", move || {
            let calls = calls_in.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(AttemptError {
                        error: remote(429),
                        retry_after: Some(Duration::from_secs(30)),
                    })
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(result.is_ok());
        // The server-supplied delay is used verbatim, not the 1ms backoff.
        assert!(start.elapsed() >= Duration::from_secs(30));
    }
}
