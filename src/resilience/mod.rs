//! Retry policy for GitHub API calls.
//!
//! Each attempt reports a [`RetryDecision`]; [`RetryExecutor`] owns the loop,
//! the attempt counter and the (injectable) backoff between attempts.

use crate::config::RetryConfig;
use crate::errors::{RuntimeError, RuntimeResult};
use rand::Rng;
use reqwest::StatusCode;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// How a response status should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 2xx.
    Success,
    /// 401 or 5xx; likely transient.
    Retryable,
    /// Any other status; usually a caller error such as a missing file.
    Terminal,
}

/// Classifies a response status.
pub fn classify_status(status: StatusCode) -> StatusClass {
    let code = status.as_u16();
    if status.is_success() {
        StatusClass::Success
    } else if code == 401 || (500..=599).contains(&code) {
        StatusClass::Retryable
    } else {
        StatusClass::Terminal
    }
}

/// Outcome of a single attempt.
#[derive(Debug)]
pub enum RetryDecision<T> {
    /// Hand the value back to the caller.
    Accept(T),
    /// Try again if attempts remain.
    Retry(RuntimeError),
    /// Give up immediately.
    Fail(RuntimeError),
}

/// Computes the delay before a retry.
pub trait BackoffPolicy: Send + Sync {
    /// Delay before retry number `retry` (starting at 1).
    fn delay(&self, retry: u32) -> Duration;
}

/// Exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
}

impl ExponentialBackoff {
    /// Creates an exponential backoff policy.
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            initial,
            max,
            multiplier,
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Delay for `retry` before jitter is applied.
    fn base_delay(&self, retry: u32) -> f64 {
        let base = self.initial.as_millis() as f64
            * self.multiplier.powi(retry.saturating_sub(1) as i32);
        base.min(self.max.as_millis() as f64)
    }
}

impl From<&RetryConfig> for ExponentialBackoff {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.initial_backoff,
            config.max_backoff,
            config.multiplier,
            config.jitter,
        )
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn delay(&self, retry: u32) -> Duration {
        let capped = self.base_delay(retry);
        let jitter_range = capped * self.jitter;
        let jitter_value = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        Duration::from_millis((capped + jitter_value).max(0.0) as u64)
    }
}

/// Retries immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackoff;

impl BackoffPolicy for NoBackoff {
    fn delay(&self, _retry: u32) -> Duration {
        Duration::ZERO
    }
}

/// Runs an operation until it is accepted, fails, or runs out of retries.
#[derive(Clone)]
pub struct RetryExecutor {
    max_retries: u32,
    backoff: Arc<dyn BackoffPolicy>,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl RetryExecutor {
    /// Creates a retry executor.
    pub fn new(max_retries: u32, backoff: Arc<dyn BackoffPolicy>) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Creates an executor with exponential backoff from configuration.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, Arc::new(ExponentialBackoff::from(config)))
    }

    /// Retries after the first attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Executes `operation`, passing the zero-based attempt number.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> RuntimeResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = RetryDecision<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation(attempt).await {
                RetryDecision::Accept(value) => return Ok(value),
                RetryDecision::Fail(error) => return Err(error),
                RetryDecision::Retry(error) => {
                    if attempt >= self.max_retries {
                        return Err(error.into_exhausted(attempt + 1));
                    }
                    attempt += 1;

                    let delay = self.backoff.delay(attempt);
                    tracing::info!("{}", error.message());
                    tracing::info!(
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Retry {} of {}.",
                        attempt,
                        self.max_retries
                    );

                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use test_case::test_case;

    #[test_case(200, StatusClass::Success ; "ok")]
    #[test_case(201, StatusClass::Success ; "created")]
    #[test_case(401, StatusClass::Retryable ; "unauthorized")]
    #[test_case(500, StatusClass::Retryable ; "internal error")]
    #[test_case(503, StatusClass::Retryable ; "unavailable")]
    #[test_case(599, StatusClass::Retryable ; "upper bound")]
    #[test_case(400, StatusClass::Terminal ; "bad request")]
    #[test_case(403, StatusClass::Terminal ; "forbidden")]
    #[test_case(404, StatusClass::Terminal ; "not found")]
    #[test_case(422, StatusClass::Terminal ; "unprocessable")]
    #[test_case(429, StatusClass::Terminal ; "too many requests")]
    #[test_case(304, StatusClass::Terminal ; "not modified")]
    fn test_classify_status(code: u16, expected: StatusClass) {
        let status = StatusCode::from_u16(code).unwrap();
        assert_eq!(classify_status(status), expected);
    }

    #[test]
    fn test_backoff_calculation() {
        let backoff = ExponentialBackoff::new(
            Duration::from_secs(1),
            Duration::from_secs(5),
            2.0,
            0.0,
        );

        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(2));
        assert_eq!(backoff.delay(3), Duration::from_secs(4));
        assert_eq!(backoff.delay(4), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_jitter_stays_in_range() {
        let backoff = ExponentialBackoff::new(
            Duration::from_secs(1),
            Duration::from_secs(60),
            2.0,
            0.1,
        );

        for _ in 0..50 {
            let delay = backoff.delay(1);
            assert!(delay >= Duration::from_millis(900));
            assert!(delay <= Duration::from_millis(1100));
        }
    }

    #[tokio::test]
    async fn test_retries_up_to_limit() {
        let executor = RetryExecutor::new(3, Arc::new(NoBackoff));
        let calls = AtomicU32::new(0);

        let result: RuntimeResult<()> = executor
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { RetryDecision::Retry(RuntimeError::retryable_status(500, "u")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RetriesExhausted);
        assert_eq!(err.status_code(), Some(500));
    }

    #[tokio::test]
    async fn test_accepts_after_transient_failures() {
        let executor = RetryExecutor::new(3, Arc::new(NoBackoff));

        let result = executor
            .execute(|attempt| async move {
                if attempt < 2 {
                    RetryDecision::Retry(RuntimeError::timeout("slow"))
                } else {
                    RetryDecision::Accept(attempt)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_fail_is_not_retried() {
        let executor = RetryExecutor::new(3, Arc::new(NoBackoff));
        let calls = AtomicU32::new(0);

        let result: RuntimeResult<()> = executor
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { RetryDecision::Fail(RuntimeError::configuration("broken")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidConfiguration);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays_are_slept() {
        let executor = RetryExecutor::new(
            2,
            Arc::new(ExponentialBackoff::new(
                Duration::from_secs(1),
                Duration::from_secs(60),
                2.0,
                0.0,
            )),
        );
        let start = tokio::time::Instant::now();

        let _: RuntimeResult<()> = executor
            .execute(|_| async { RetryDecision::Retry(RuntimeError::timeout("slow")) })
            .await;

        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_each_retry_logs_reason_and_count() {
        let (logs, _guard) = crate::mocks::LogCapture::install();
        let executor = RetryExecutor::new(3, Arc::new(NoBackoff));

        let value = executor
            .execute(|attempt| async move {
                if attempt < 2 {
                    RetryDecision::Retry(RuntimeError::retryable_status(500, "https://api.test/x"))
                } else {
                    RetryDecision::Accept(attempt)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(logs.count("Request failed (status: 500 url: https://api.test/x)."), 2);
        assert_eq!(logs.count("Retry 1 of 3."), 1);
        assert_eq!(logs.count("Retry 2 of 3."), 1);
        assert_eq!(logs.count("Retry 3 of 3."), 0);
    }
}
