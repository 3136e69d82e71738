//! Retry logic with exponential backoff and jitter.
//!
//! Optimistic conflicts and transient store failures are expected under a
//! registration spike. This module retries such operations with a bounded
//! budget (attempt count and wall-clock deadline) so tail latency stays
//! bounded.
//!
//! # Example
//!
//! ```rust
//! use jersey_runtime::retry::{RetryPolicy, retry_with_predicate};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(10))
//!     .max_delay(Duration::from_secs(1))
//!     .multiplier(2.0)
//!     .build();
//!
//! let result = retry_with_predicate(
//!     &policy,
//!     || async { Ok::<_, String>(42) },
//!     |err: &String| err.contains("transient"),
//! )
//! .await;
//! assert_eq!(result.ok(), Some(42));
//! # Ok(())
//! # }
//! ```

use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep};

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 16
/// - `initial_delay`: 5ms
/// - `max_delay`: 500ms
/// - `multiplier`: 2.0 (delay doubles each retry)
/// - `deadline`: 10 seconds
///
/// Delays are jittered: each computed delay is scaled by a random factor in
/// `0.5..=1.0`, so contending writers spread out instead of colliding again.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first one
    pub max_retries: u32,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Total wall-clock budget across all attempts
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
            deadline: None,
        }
    }

    /// Un-jittered delay for a given attempt number (0-indexed).
    ///
    /// `initial_delay * multiplier ^ attempt`, capped at `max_delay`.
    #[must_use]
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        #[allow(clippy::cast_possible_wrap)]
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let base_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped_secs = base_secs.min(self.max_delay.as_secs_f64());

        if capped_secs.is_finite() && capped_secs >= 0.0 {
            Duration::from_secs_f64(capped_secs)
        } else {
            self.max_delay
        }
    }

    /// Jittered delay for a given attempt number (0-indexed).
    ///
    /// `base_delay_for_attempt(attempt) * random(0.5..=1.0)`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let jitter = rand::thread_rng().gen_range(0.5..=1.0);
        self.base_delay_for_attempt(attempt).mul_f64(jitter)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: Option<u32>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
    deadline: Option<Duration>,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Set the total wall-clock budget.
    #[must_use]
    pub const fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(16),
            initial_delay: self.initial_delay.unwrap_or(Duration::from_millis(5)),
            max_delay: self.max_delay.unwrap_or(Duration::from_millis(500)),
            multiplier: self.multiplier.unwrap_or(2.0),
            deadline: self.deadline.unwrap_or(Duration::from_secs(10)),
        }
    }
}

/// Why a retried operation gave up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The operation failed with an error the predicate deemed permanent.
    #[error("failed permanently after {attempts} attempt(s): {error}")]
    Permanent {
        /// Attempts made, including the failing one.
        attempts: u32,
        /// The permanent error.
        error: E,
    },

    /// The retry budget or the deadline ran out.
    #[error("gave up after {attempts} attempt(s) in {elapsed:?}: {last_error}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Time spent across all attempts and delays.
        elapsed: Duration,
        /// Error of the final attempt.
        last_error: E,
    },
}

/// Retry an async operation while `is_retryable` accepts its errors.
///
/// The deadline is checked between attempts, never during one: an attempt
/// that is already talking to the store runs to completion, because a write
/// dropped mid-flight may still commit on the server.
///
/// # Errors
///
/// - [`RetryError::Permanent`] for the first non-retryable error
/// - [`RetryError::Exhausted`] when `max_retries` or `deadline` runs out
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => {
                let attempts = attempt + 1;

                if !is_retryable(&err) {
                    return Err(RetryError::Permanent {
                        attempts,
                        error: err,
                    });
                }

                let delay = policy.delay_for_attempt(attempt);
                let elapsed = started.elapsed();

                if attempt >= policy.max_retries || elapsed + delay > policy.deadline {
                    tracing::error!(
                        attempts,
                        elapsed_ms = elapsed.as_millis(),
                        error = %err,
                        "Operation failed after exhausting retry budget"
                    );
                    return Err(RetryError::Exhausted {
                        attempts,
                        elapsed,
                        last_error: err,
                    });
                }

                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Operation failed, retrying..."
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Retry an async operation on every error.
///
/// # Errors
///
/// Returns [`RetryError::Exhausted`] when the budget runs out.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_predicate(policy, operation, |_| true).await
}
