//! Classification-driven retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use log::{debug, error, warn};
use rand::Rng;
use tokio::time::Instant;

use crate::errors::{ApiError, RetryClass};

/// Default number of attempts (one initial attempt plus three retries).
const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Default base delay for backoff.
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default cap for a single backoff delay.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default upper bound on the time a single logical call may take.
const DEFAULT_MAX_TOTAL_WAIT: Duration = Duration::from_secs(120);

/// Retry policy for a logical API call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each following retry.
    pub base_delay: Duration,
    /// Cap for a single backoff delay.
    pub max_delay: Duration,
    /// Random jitter added to each delay, as a fraction of `base_delay`.
    pub jitter_ratio: f64,
    /// Ceiling on the whole call, waits and attempts included.
    pub max_total_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_ratio: 0.25,
            max_total_wait: DEFAULT_MAX_TOTAL_WAIT,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (1-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    fn jitter(&self) -> Duration {
        if self.jitter_ratio <= 0.0 {
            return Duration::ZERO;
        }
        let fraction: f64 = rand::thread_rng().gen();
        self.base_delay.mul_f64(self.jitter_ratio * fraction)
    }
}

/// Runs one logical request, repeating failed attempts according to a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `attempt` until it succeeds, fails with a non-retryable error,
    /// runs out of attempts, or the total wait ceiling is reached.
    ///
    /// Non-retryable errors are returned right after the failing attempt. When
    /// attempts run out the last error is returned as-is. Hitting the ceiling
    /// yields [`ApiError::WaitTimeout`].
    pub async fn execute<F, Fut, T>(&self, mut attempt: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let started = Instant::now();
        let deadline = started + self.policy.max_total_wait;
        let mut attempt_no: u32 = 0;

        loop {
            attempt_no += 1;

            let outcome = match tokio::time::timeout_at(deadline, attempt()).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!(
                        "Request did not complete within {:?} (attempt {})",
                        self.policy.max_total_wait, attempt_no
                    );
                    return Err(ApiError::WaitTimeout {
                        waited: started.elapsed(),
                    });
                }
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let class = err.retry_class();
            if class == RetryClass::Never {
                debug!("Not retrying non-retryable error: {}", err);
                return Err(err);
            }

            if attempt_no >= self.policy.max_attempts {
                error!("Giving up after {} attempts: {}", attempt_no, err);
                return Err(err);
            }

            let delay = self.delay_for(&err, attempt_no);
            let now = Instant::now();
            if now + delay > deadline {
                error!(
                    "Next retry in {:?} would exceed the {:?} wait ceiling: {}",
                    delay, self.policy.max_total_wait, err
                );
                return Err(ApiError::WaitTimeout {
                    waited: now - started,
                });
            }

            warn!(
                "Attempt {}/{} failed: {}. Retrying in {:?}",
                attempt_no, self.policy.max_attempts, err, delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Delay before the retry that follows attempt `attempt_no`.
    fn delay_for(&self, err: &ApiError, attempt_no: u32) -> Duration {
        if let ApiError::RateLimited {
            retry_at: Some(retry_at),
            ..
        } = err
        {
            let until_reset = retry_at.saturating_duration_since(Instant::now());
            if !until_reset.is_zero() {
                return until_reset;
            }
        }
        self.policy.backoff(attempt_no) + self.policy.jitter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn test_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_ratio: 0.25,
            max_total_wait: Duration::from_secs(600),
        }
    }

    /// Records the instant of every attempt and fails with the given error.
    async fn run_failing(executor: &RetryExecutor, error: ApiError) -> (Vec<Instant>, ApiError) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let result: Result<(), ApiError> = executor
            .execute(|| {
                let calls = calls.clone();
                let error = error.clone();
                async move {
                    calls.lock().unwrap().push(Instant::now());
                    Err(error)
                }
            })
            .await;
        let calls = calls.lock().unwrap().clone();
        (calls, result.unwrap_err())
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = test_policy();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(6), Duration::from_secs(30));
        assert_eq!(policy.backoff(40), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_attempted_once() {
        let executor = RetryExecutor::new(test_policy());
        let start = Instant::now();
        let (calls, err) = run_failing(
            &executor,
            ApiError::NotFound {
                path: "/equity/history/orders".to_string(),
            },
        )
        .await;

        assert_eq!(calls.len(), 1);
        assert!(matches!(err, ApiError::NotFound { .. }));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_retries_with_increasing_delays() {
        let executor = RetryExecutor::new(test_policy());
        let (calls, err) = run_failing(&executor, ApiError::ServerError { status: 503 }).await;

        assert_eq!(calls.len(), 4);
        assert!(matches!(err, ApiError::ServerError { status: 503 }));

        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps[0] >= Duration::from_secs(1));
        for pair in gaps.windows(2) {
            assert!(pair[1] > pair[0], "delays must strictly increase: {:?}", gaps);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failure() {
        let executor = RetryExecutor::new(test_policy());
        let attempts = Arc::new(Mutex::new(0u32));

        let result = executor
            .execute(|| {
                let attempts = attempts.clone();
                async move {
                    let mut n = attempts.lock().unwrap();
                    *n += 1;
                    if *n < 3 {
                        Err(ApiError::RequestTimeout {
                            path: "/history/dividends".to_string(),
                            status: Some(408),
                        })
                    } else {
                        Ok(*n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_waits_for_advertised_reset() {
        let executor = RetryExecutor::new(test_policy());
        let retry_at = Instant::now() + Duration::from_secs(7);
        let attempts = Arc::new(Mutex::new(Vec::new()));

        let result = executor
            .execute(|| {
                let attempts = attempts.clone();
                async move {
                    let mut calls = attempts.lock().unwrap();
                    calls.push(Instant::now());
                    if calls.len() == 1 {
                        Err(ApiError::RateLimited {
                            path: "/history/transactions".to_string(),
                            retry_at: Some(retry_at),
                        })
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        let calls = attempts.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls[1] >= retry_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ceiling_surfaces_as_timeout() {
        let executor = RetryExecutor::new(RetryPolicy {
            max_attempts: 10,
            max_total_wait: Duration::from_secs(5),
            ..test_policy()
        });

        let (calls, err) = run_failing(&executor, ApiError::ServerError { status: 502 }).await;

        assert!(matches!(err, ApiError::WaitTimeout { .. }));
        assert!(calls.len() < 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_attempt_is_cancelled_at_ceiling() {
        let executor = RetryExecutor::new(RetryPolicy {
            max_total_wait: Duration::from_secs(3),
            ..test_policy()
        });

        let result: Result<(), ApiError> = executor
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;

        match result {
            Err(ApiError::WaitTimeout { waited }) => assert!(waited >= Duration::from_secs(3)),
            other => panic!("expected WaitTimeout, got {:?}", other),
        }
    }
}
