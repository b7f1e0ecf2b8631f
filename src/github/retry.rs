//! Bounded timeouts and exponential-backoff retry for platform calls.
//!
//! Each attempt runs under a per-call timeout; an expired timeout is a
//! transient failure, not an abort of the whole cycle. Only transient
//! failures retry within a cycle; rate limits surface immediately so the
//! scheduler can back off, and not-found/auth failures are never retried.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::effects::FailureKind;

use super::error::PlatformApiError;

/// Bound on any single platform call.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for exponential backoff retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the initial attempt).
    pub max_retries: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Cap on the exponential growth of delays.
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Default retry configuration: 3 retries with 2s, 4s, 8s delays.
    pub const DEFAULT: Self = Self {
        max_retries: 3,
        initial_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(16),
    };

    /// Computes the delay for the given retry attempt (0-indexed), doubling
    /// each time and capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2f64.powi(attempt as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Executes an async platform operation with a per-attempt timeout and
/// exponential backoff on transient failures.
///
/// Non-transient failures (rate limit, not found, auth) are returned
/// immediately; they carry meaning the caller must act on.
pub async fn retry_with_backoff<T, F, Fut>(
    config: RetryConfig,
    mut operation: F,
) -> Result<T, PlatformApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PlatformApiError>>,
{
    let mut attempt = 0u32;
    loop {
        let result = match tokio::time::timeout(CALL_TIMEOUT, operation()).await {
            Ok(result) => result,
            Err(_) => Err(PlatformApiError::transient(format!(
                "call exceeded {}s timeout",
                CALL_TIMEOUT.as_secs()
            ))),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.kind == FailureKind::Transient && attempt < config.max_retries => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    attempt = attempt + 1,
                    delay_secs = delay.as_secs(),
                    error = %err,
                    "Transient platform failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delays_double_and_cap() {
        let config = RetryConfig::DEFAULT;
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(8));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(16));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(16));
    }

    #[tokio::test]
    async fn transient_failures_retry_until_success() {
        let config = RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        };
        let calls = AtomicU32::new(0);

        let result = retry_with_backoff(config, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(PlatformApiError::transient("flaky"))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_failures_return_immediately() {
        let config = RetryConfig {
            max_retries: 5,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        };
        let calls = AtomicU32::new(0);

        let result: Result<u32, _> = retry_with_backoff(config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PlatformApiError::not_found("gone")) }
        })
        .await;

        assert_eq!(result.unwrap_err().kind, FailureKind::NotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_exhaust_with_last_error() {
        let config = RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let calls = AtomicU32::new(0);

        let result: Result<u32, _> = retry_with_backoff(config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PlatformApiError::transient("still down")) }
        })
        .await;

        assert_eq!(result.unwrap_err().kind, FailureKind::Transient);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
