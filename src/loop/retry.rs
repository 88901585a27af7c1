//! Bounded retry with exponential backoff and per-attempt timeouts.
//!
//! Every externally-fallible loop step runs through a [`RetryExecutor`].
//! Each attempt is raced against a timeout; a timed-out attempt is dropped
//! (the future is cancelled), not left running.
//!
//! # Example
//!
//! ```rust,ignore
//! use converge::r#loop::retry::{RetryExecutor, RetryPolicy};
//!
//! let executor = RetryExecutor::new(RetryPolicy::default())?;
//! let status = executor
//!     .run("deploy", Duration::from_secs(30), |_attempt| health.check(&url, None))
//!     .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::RetrySettings;
use crate::error::{ConvergeError, Result};

// ============================================================================
// Policy and backoff
// ============================================================================

/// Retry parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    /// Timeout used when a step is given a zero timeout.
    pub min_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            backoff_factor: settings.backoff_factor,
            max_delay: Duration::from_millis(settings.max_delay_ms),
            min_timeout: Duration::from_millis(settings.min_timeout_ms),
        }
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }
}

/// Delay before the retry that follows attempt `attempt` (0-based):
/// `min(initial_delay * backoff_factor^attempt, max_delay)`.
#[must_use]
pub fn calculate_backoff(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let secs = policy.initial_delay.as_secs_f64() * policy.backoff_factor.powi(exponent);
    let max = policy.max_delay.as_secs_f64();
    if !secs.is_finite() || secs >= max {
        policy.max_delay
    } else {
        Duration::from_secs_f64(secs.max(0.0))
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Final failure of a retried step: the last observed error.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The last attempt timed out.
    #[error("step '{step}' timed out after {attempts} attempt(s) ({}s per attempt)", timeout.as_secs_f64())]
    Timeout {
        step: String,
        attempts: u32,
        timeout: Duration,
    },

    /// The last attempt returned an error.
    #[error("step '{step}' failed after {attempts} attempt(s): {last_error}")]
    Failed {
        step: String,
        attempts: u32,
        last_error: E,
    },
}

impl<E> RetryError<E> {
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Timeout { attempts, .. } | Self::Failed { attempts, .. } => *attempts,
        }
    }
}

impl RetryError<anyhow::Error> {
    /// Convert into a [`ConvergeError`], keeping typed collaborator errors.
    pub fn into_converge(self) -> ConvergeError {
        match self {
            Self::Timeout { step, timeout, .. } => ConvergeError::StepTimeout { step, timeout },
            Self::Failed { last_error, .. } => match last_error.downcast::<ConvergeError>() {
                Ok(typed) => typed,
                Err(other) => ConvergeError::Other(other),
            },
        }
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Runs async operations with bounded retries.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Create an executor. `max_retries` below 1 is rejected.
    pub fn new(policy: RetryPolicy) -> Result<Self> {
        if policy.max_retries < 1 {
            return Err(ConvergeError::invalid_config(
                "retry.maxRetries",
                format!("must be at least 1, got {}", policy.max_retries),
            ));
        }
        if policy.backoff_factor.is_nan() || policy.backoff_factor < 1.0 {
            return Err(ConvergeError::invalid_config(
                "retry.backoffFactor",
                format!("must be at least 1.0, got {}", policy.backoff_factor),
            ));
        }
        if policy.min_timeout.is_zero() {
            return Err(ConvergeError::invalid_config(
                "retry.minTimeoutMs",
                "must be greater than 0",
            ));
        }
        Ok(Self { policy })
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Per-attempt timeout for a step; zero means the policy minimum.
    #[must_use]
    pub fn effective_timeout(&self, step_timeout: Duration) -> Duration {
        if step_timeout.is_zero() {
            self.policy.min_timeout
        } else {
            step_timeout
        }
    }

    /// Run `op` until it succeeds or attempts run out. `op` receives the
    /// 1-based attempt number.
    pub async fn run<T, E, F, Fut>(
        &self,
        step: &str,
        step_timeout: Duration,
        op: F,
    ) -> std::result::Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        self.run_if(step, step_timeout, op, |_| true).await
    }

    /// Like [`run`](Self::run), but stops early when `should_retry` returns
    /// false for an error.
    pub async fn run_if<T, E, F, Fut, P>(
        &self,
        step: &str,
        step_timeout: Duration,
        mut op: F,
        should_retry: P,
    ) -> std::result::Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let timeout = self.effective_timeout(step_timeout);
        let max = self.policy.max_retries;
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(step, attempt, max, "Attempting step");

            let failure = match tokio::time::timeout(timeout, op(attempt)).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(error)) => {
                    warn!(step, attempt, max, "Step failed: {}", error);
                    let retryable = should_retry(&error);
                    let failure = RetryError::Failed {
                        step: step.to_string(),
                        attempts: attempt,
                        last_error: error,
                    };
                    if !retryable {
                        debug!(step, "Error is not retryable");
                        return Err(failure);
                    }
                    failure
                }
                Err(_) => {
                    warn!(
                        step,
                        attempt,
                        max,
                        "Step timed out after {:.1}s",
                        timeout.as_secs_f64()
                    );
                    RetryError::Timeout {
                        step: step.to_string(),
                        attempts: attempt,
                        timeout,
                    }
                }
            };

            if attempt >= max {
                return Err(failure);
            }
            let delay = calculate_backoff(&self.policy, attempt - 1);
            debug!(step, "Retrying in {:.1}s", delay.as_secs_f64());
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
            min_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_calculate_backoff() {
        let p = policy();
        assert_eq!(calculate_backoff(&p, 0), Duration::from_secs(1));
        assert_eq!(calculate_backoff(&p, 1), Duration::from_secs(2));
        assert_eq!(calculate_backoff(&p, 2), Duration::from_secs(4));
        assert_eq!(calculate_backoff(&p, 10), Duration::from_secs(30));
        assert_eq!(calculate_backoff(&p, u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_zero_retries_rejected() {
        let err = RetryExecutor::new(policy().with_max_retries(0)).unwrap_err();
        assert!(matches!(err, ConvergeError::InvalidConfig { .. }));
    }

    #[test]
    fn test_zero_min_timeout_rejected() {
        let mut p = policy();
        p.min_timeout = Duration::ZERO;
        let err = RetryExecutor::new(p).unwrap_err();
        assert!(err.to_string().contains("retry.minTimeoutMs"));
    }

    #[test]
    fn test_zero_timeout_uses_minimum() {
        let executor = RetryExecutor::new(policy()).unwrap();
        assert_eq!(executor.effective_timeout(Duration::ZERO), Duration::from_secs(5));
        assert_eq!(
            executor.effective_timeout(Duration::from_secs(9)),
            Duration::from_secs(9)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt_with_backoff() {
        let executor = RetryExecutor::new(policy()).unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let c = Arc::clone(&calls);
        let result: std::result::Result<&str, RetryError<String>> = executor
            .run("submit", Duration::from_secs(10), move |attempt| {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 {
                        Err(format!("flake {attempt}"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // slept 1s then 2s
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_last_error_when_exhausted() {
        let executor = RetryExecutor::new(policy()).unwrap();
        let result: std::result::Result<(), RetryError<String>> = executor
            .run("email", Duration::from_secs(10), |attempt| async move {
                Err(format!("failure {attempt}"))
            })
            .await;

        match result.unwrap_err() {
            RetryError::Failed {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error, "failure 3");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_enforced() {
        let executor = RetryExecutor::new(policy().with_max_retries(2)).unwrap();
        let start = Instant::now();
        let result: std::result::Result<(), RetryError<String>> = executor
            .run("deploy", Duration::from_secs(4), |_| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, RetryError::Timeout { attempts: 2, .. }));
        // two 4s attempts plus one 1s backoff
        assert_eq!(start.elapsed(), Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_stops_immediately() {
        let executor = RetryExecutor::new(policy()).unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: std::result::Result<(), RetryError<String>> = executor
            .run_if(
                "submit",
                Duration::from_secs(10),
                move |_| {
                    let c = Arc::clone(&c);
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Err("400 bad request".to_string())
                    }
                },
                |e: &String| !e.starts_with("4"),
            )
            .await;

        assert_eq!(result.unwrap_err().attempts(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_into_converge_keeps_typed_errors() {
        let err: RetryError<anyhow::Error> = RetryError::Failed {
            step: "analyze".into(),
            attempts: 1,
            last_error: ConvergeError::TemplateNotFound { name: "x".into() }.into(),
        };
        assert!(matches!(
            err.into_converge(),
            ConvergeError::TemplateNotFound { .. }
        ));

        let timeout: RetryError<anyhow::Error> = RetryError::Timeout {
            step: "email".into(),
            attempts: 3,
            timeout: Duration::from_secs(1),
        };
        assert!(timeout.into_converge().is_transient());
    }
}
