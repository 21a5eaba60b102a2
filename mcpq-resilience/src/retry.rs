//! Retry policy and executor

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::backoff::delay_for_attempt;

/// Portion of the operation deadline held back from the retry budget so
/// the final attempt still has room to run.
const BUDGET_RESERVE: Duration = Duration::from_secs(5);

/// No retry is scheduled once less than this much budget remains.
const MIN_REMAINING: Duration = Duration::from_secs(1);

/// Trait for errors that can be retried
pub trait Retryable {
    /// Whether this error is transient and worth another attempt
    fn is_retryable(&self) -> bool;
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,

    /// Base delay for the exponential backoff
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Build the policy from `MCPQ_MAX_RETRIES` / `MCPQ_RETRY_DELAY` (ms),
    /// falling back to the defaults for unset or unparsable values.
    pub fn from_env() -> Self {
        let mut policy = Self::default();
        if let Some(max) = env_number("MCPQ_MAX_RETRIES") {
            policy.max_attempts = max.max(1) as u32;
        }
        if let Some(delay_ms) = env_number("MCPQ_RETRY_DELAY") {
            policy.base_delay = Duration::from_millis(delay_ms);
        }
        policy
    }

    /// The retry budget for an operation that must finish by `deadline`.
    pub fn budget_until(deadline: Instant) -> Instant {
        deadline.checked_sub(BUDGET_RESERVE).unwrap_or(deadline)
    }
}

fn env_number(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.parse().ok()
}

/// Retry error types
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// All attempts failed; carries only the final failure
    #[error("{last_error} (after {attempts} attempt(s))")]
    AttemptsExhausted { attempts: u32, last_error: E },

    /// The first terminal (non-transient) failure
    #[error("{0}")]
    NonRetryable(E),

    /// The deadline budget ran out before attempts did
    #[error("{last_error} (retry budget exhausted)")]
    BudgetExhausted { last_error: E },
}

impl<E> RetryError<E> {
    /// The underlying error from the final attempt.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::AttemptsExhausted { last_error, .. } => last_error,
            RetryError::NonRetryable(error) => error,
            RetryError::BudgetExhausted { last_error } => last_error,
        }
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

    pub fn from_env() -> Self {
        Self::new(RetryPolicy::from_env())
    }

    /// Run `f` until it succeeds, turns terminal, exhausts its attempts,
    /// or runs out of budget. Retries are strictly sequential and invisible
    /// to the caller unless the final attempt fails.
    pub async fn execute<F, Fut, T, E>(&self, budget_end: Instant, mut f: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let mut attempt: u32 = 0;

        loop {
            match f().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(attempt = attempt + 1, "operation succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(error) => {
                    if !error.is_retryable() {
                        return Err(RetryError::NonRetryable(error));
                    }

                    let attempts_used = attempt + 1;
                    if attempts_used >= self.policy.max_attempts {
                        warn!(attempts = attempts_used, %error, "giving up after final attempt");
                        return Err(RetryError::AttemptsExhausted {
                            attempts: attempts_used,
                            last_error: error,
                        });
                    }

                    let remaining = budget_end.saturating_duration_since(Instant::now());
                    if remaining <= MIN_REMAINING {
                        return Err(RetryError::BudgetExhausted { last_error: error });
                    }

                    let delay = delay_for_attempt(attempt, self.policy.base_delay, remaining);
                    debug!(attempt = attempts_used, ?delay, %error, "transient failure, retrying");
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
