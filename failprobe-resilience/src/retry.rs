//! Retry policy and executor

use failprobe_core::HarnessError;
use log::{debug, info, warn};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// How many attempts a run gets and how long to wait between them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Pause after every failed attempt that is followed by another one
    pub pause: Duration,
}

impl RetryPolicy {
    /// Same pause between every attempt
    pub fn fixed(max_attempts: u32, pause: Duration) -> Self {
        Self {
            max_attempts,
            pause,
        }
    }
}

/// Trait for errors that can be retried
pub trait Retryable {
    /// Whether this error is retryable
    fn is_retryable(&self) -> bool;
}

impl Retryable for HarnessError {
    fn is_retryable(&self) -> bool {
        matches!(self, HarnessError::AttemptTimeout { .. })
    }
}

/// Retry executor
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Execute a function with retry logic, passing the 1-based attempt number
    pub async fn execute_with_context<F, Fut, T, E>(&self, mut f: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let mut attempt = 1;

        loop {
            debug!(
                "Executing attempt {} of {}",
                attempt, self.policy.max_attempts
            );

            match f(attempt).await {
                Ok(result) => {
                    if attempt > 1 {
                        info!("Operation succeeded after {} attempts", attempt);
                    }
                    return Ok(result);
                }
                Err(error) => {
                    if !error.is_retryable() {
                        warn!("Operation failed with non-retryable error: {}", error);
                        return Err(RetryError::NonRetryableError(error));
                    }

                    if attempt >= self.policy.max_attempts {
                        warn!("Operation failed after {} attempts: {}", attempt, error);
                        return Err(RetryError::MaxAttemptsExceeded {
                            attempts: attempt,
                            last_error: error,
                        });
                    }

                    let delay = self.policy.pause;

                    warn!(
                        "Attempt {} failed: {}. Retrying in {:?}",
                        attempt, error, delay
                    );
                    sleep(delay).await;

                    attempt += 1;
                }
            }
        }
    }
}

/// Retry error types
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Maximum retry attempts exceeded
    #[error("Maximum retry attempts ({attempts}) exceeded. Last error: {last_error}")]
    MaxAttemptsExceeded { attempts: u32, last_error: E },

    /// Non-retryable error encountered
    #[error("Non-retryable error: {0}")]
    NonRetryableError(E),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn timeout_error(attempt: u32) -> HarnessError {
        HarnessError::AttemptTimeout {
            attempt,
            deadline: Duration::from_secs(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_after_timeout() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let executor = RetryExecutor::new(RetryPolicy::fixed(3, Duration::from_secs(60)));
        let start = tokio::time::Instant::now();

        let result = executor
            .execute_with_context(|_attempt| {
                let count = counter_clone.fetch_add(1, Ordering::Relaxed);
                async move {
                    if count < 1 {
                        Err(timeout_error(count + 1))
                    } else {
                        Ok("matched")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "matched");
        assert_eq!(counter.load(Ordering::Relaxed), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_pause_after_last_attempt() {
        let executor = RetryExecutor::new(RetryPolicy::fixed(2, Duration::from_secs(1)));
        let start = tokio::time::Instant::now();

        let result: Result<(), RetryError<HarnessError>> = executor
            .execute_with_context(|attempt| async move { Err(timeout_error(attempt)) })
            .await;

        match result {
            Err(RetryError::MaxAttemptsExceeded {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 2);
                assert!(matches!(
                    last_error,
                    HarnessError::AttemptTimeout { attempt: 2, .. }
                ));
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        // One pause between the two attempts, none after the last
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let executor = RetryExecutor::new(RetryPolicy::fixed(5, Duration::from_millis(1)));

        let result: Result<(), RetryError<HarnessError>> = executor
            .execute_with_context(|_attempt| {
                attempts_clone.fetch_add(1, Ordering::Relaxed);
                async { Err(HarnessError::PolicyUnsatisfiable("no primary".into())) }
            })
            .await;

        assert!(matches!(
            result.unwrap_err(),
            RetryError::NonRetryableError(HarnessError::PolicyUnsatisfiable(_))
        ));
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_pause_between_every_attempt() {
        let executor = RetryExecutor::new(RetryPolicy::fixed(3, Duration::from_secs(2)));
        let start = tokio::time::Instant::now();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let result: Result<(), RetryError<HarnessError>> = executor
            .execute_with_context(|attempt| {
                seen_clone.lock().unwrap().push((attempt, start.elapsed()));
                async move { Err(timeout_error(attempt)) }
            })
            .await;

        assert!(matches!(
            result,
            Err(RetryError::MaxAttemptsExceeded { attempts: 3, .. })
        ));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (1, Duration::ZERO),
                (2, Duration::from_secs(2)),
                (3, Duration::from_secs(4)),
            ]
        );
    }
}
