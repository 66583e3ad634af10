//! Retry logic with exponential backoff for fallible side effects.
//!
//! A [`RetryPolicy`] is a plain value object handed to whoever invokes the side
//! effect. It bounds the work in three ways:
//!
//! - `max_attempts`: total number of attempts, the first one included
//! - `attempt_timeout`: how long a single attempt may run (start-to-close)
//! - `schedule_to_close`: how long the whole retry sequence may run, sleeps included
//!
//! Backoff is deterministic (no jitter) so a replayed run waits the same intervals.
//!
//! # Example
//!
//! ```rust
//! use abandoned_cart_runtime::context::WorkflowContext;
//! use abandoned_cart_runtime::retry::{RetryPolicy, retry_with_backoff};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (ctx, _cancel) = WorkflowContext::new("CART-1");
//! let policy = RetryPolicy::builder()
//!     .max_attempts(5)
//!     .initial_interval(Duration::from_millis(1))
//!     .max_interval(Duration::from_millis(10))
//!     .backoff_coefficient(2.0)
//!     .build();
//!
//! let result = retry_with_backoff(&policy, &ctx, |_attempt| async {
//!     Ok::<_, String>(42)
//! })
//! .await;
//!
//! assert!(matches!(result, Ok(ref success) if success.value == 42 && success.attempts == 1));
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};

use crate::context::WorkflowContext;
use crate::metrics::RetryMetrics;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_attempts`: 5
/// - `initial_interval`: 1 second
/// - `backoff_coefficient`: 2.0 (interval doubles each retry)
/// - `max_interval`: 1 minute
/// - `attempt_timeout`: 1 minute
/// - `schedule_to_close`: 5 minutes
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Interval before the first retry
    pub initial_interval: Duration,
    /// Multiplier applied to the interval after each retry
    pub backoff_coefficient: f64,
    /// Cap for the interval between attempts
    pub max_interval: Duration,
    /// Upper bound for a single attempt
    pub attempt_timeout: Option<Duration>,
    /// Upper bound for the whole retry sequence
    pub schedule_to_close: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            max_interval: Duration::from_secs(60),
            attempt_timeout: Some(Duration::from_secs(60)),
            schedule_to_close: Some(Duration::from_secs(300)),
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder seeded with the defaults.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: Self::default(),
        }
    }

    /// Calculate the interval before retry number `retry` (0 = first retry).
    ///
    /// `initial_interval * backoff_coefficient ^ retry`, capped at `max_interval`.
    #[must_use]
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        if retry == 0 {
            return self.initial_interval.min(self.max_interval);
        }

        // Exponent saturates well before i32::MAX matters for any sane policy
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let delay_secs =
            self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);

        if !delay_secs.is_finite() || delay_secs >= self.max_interval.as_secs_f64() {
            self.max_interval
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }

    /// Sum of every backoff interval the policy can sleep through
    #[must_use]
    pub fn total_backoff(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|retry| self.delay_for_attempt(retry))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Set the maximum number of attempts (clamped to at least 1).
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.policy.max_attempts = attempts.max(1);
        self
    }

    /// Set the interval before the first retry.
    #[must_use]
    pub const fn initial_interval(mut self, interval: Duration) -> Self {
        self.policy.initial_interval = interval;
        self
    }

    /// Set the backoff coefficient (values below 1.0 are raised to 1.0).
    #[must_use]
    pub fn backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.policy.backoff_coefficient = coefficient.max(1.0);
        self
    }

    /// Set the cap for the interval between attempts.
    #[must_use]
    pub const fn max_interval(mut self, interval: Duration) -> Self {
        self.policy.max_interval = interval;
        self
    }

    /// Set the per-attempt timeout (`None` = unbounded).
    #[must_use]
    pub const fn attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.policy.attempt_timeout = timeout;
        self
    }

    /// Set the total budget for the retry sequence (`None` = unbounded).
    #[must_use]
    pub const fn schedule_to_close(mut self, budget: Option<Duration>) -> Self {
        self.policy.schedule_to_close = budget;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

/// Why a single attempt did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure<E> {
    /// The operation returned an error
    Failed(E),
    /// The operation did not finish within the attempt timeout
    TimedOut(Duration),
}

impl<E: fmt::Display> fmt::Display for AttemptFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(error) => write!(f, "{error}"),
            Self::TimedOut(after) => write!(f, "attempt timed out after {after:?}"),
        }
    }
}

/// A successful retry sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySuccess<T> {
    /// The operation's result
    pub value: T,
    /// Number of attempts it took, the successful one included
    pub attempts: u32,
}

/// Terminal failure of a retry sequence
///
/// None of these are fatal to the caller's workflow; they are outcomes to report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every allowed attempt failed
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Failure of the final attempt
        last: AttemptFailure<E>,
    },
    /// The schedule-to-close budget ran out before the attempts did
    BudgetExceeded {
        /// Attempts made
        attempts: u32,
        /// Time spent in the sequence
        elapsed: Duration,
        /// Failure of the final attempt
        last: AttemptFailure<E>,
    },
    /// The predicate classified the error as permanent
    NonRetryable {
        /// Attempts made
        attempts: u32,
        /// The permanent error
        error: E,
    },
    /// The workflow was cancelled while the sequence was in flight
    Cancelled {
        /// Attempts started before cancellation
        attempts: u32,
    },
}

impl<E> RetryError<E> {
    /// Number of attempts started before the sequence ended
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. }
            | Self::BudgetExceeded { attempts, .. }
            | Self::NonRetryable { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
        }
    }

    /// Whether the sequence ended because of cancellation
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted { attempts, last } => {
                write!(f, "retries exhausted after {attempts} attempts: {last}")
            },
            Self::BudgetExceeded {
                attempts,
                elapsed,
                last,
            } => write!(
                f,
                "retry budget exceeded after {attempts} attempts ({elapsed:?}): {last}"
            ),
            Self::NonRetryable { attempts, error } => {
                write!(f, "non-retryable error on attempt {attempts}: {error}")
            },
            Self::Cancelled { attempts } => {
                write!(f, "cancelled after {attempts} attempts")
            },
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

/// Retry an async operation with exponential backoff.
///
/// The operation receives the 1-based attempt number. Cancellation of `ctx` stops
/// the sequence promptly, whether an attempt or a backoff sleep is in flight.
///
/// # Errors
///
/// Returns a [`RetryError`] describing why the sequence ended without success.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    ctx: &WorkflowContext,
    operation: F,
) -> Result<RetrySuccess<T>, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    retry_with_predicate(policy, ctx, operation, |_| true).await
}

/// Retry an async operation, consulting `is_retryable` after each failure.
///
/// # Errors
///
/// Returns a [`RetryError`] describing why the sequence ended without success.
#[allow(clippy::cognitive_complexity)]
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    ctx: &WorkflowContext,
    mut operation: F,
    is_retryable: P,
) -> Result<RetrySuccess<T>, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
    P: Fn(&E) -> bool,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        RetryMetrics::record_attempt();

        let timeout = attempt_timeout(policy, started.elapsed());
        let outcome = tokio::select! {
            biased;
            () = ctx.cancelled() => {
                tracing::info!(attempt, "Retry sequence cancelled during attempt");
                RetryMetrics::record_cancelled();
                return Err(RetryError::Cancelled { attempts: attempt });
            }
            outcome = run_attempt(timeout, operation(attempt)) => outcome,
        };

        let failure = match outcome {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Operation succeeded after retry");
                    RetryMetrics::record_success();
                }
                return Ok(RetrySuccess {
                    value,
                    attempts: attempt,
                });
            },
            Err(failure) => failure,
        };

        let failure = match failure {
            AttemptFailure::Failed(error) if !is_retryable(&error) => {
                tracing::warn!(attempt, error = %error, "Error is not retryable, failing immediately");
                return Err(RetryError::NonRetryable {
                    attempts: attempt,
                    error,
                });
            },
            other => other,
        };

        if attempt >= policy.max_attempts {
            tracing::error!(attempt, error = %failure, "Operation failed after max attempts");
            RetryMetrics::record_exhausted();
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: failure,
            });
        }

        let delay = policy.delay_for_attempt(attempt - 1);
        let elapsed = started.elapsed();
        if let Some(budget) = policy.schedule_to_close {
            if elapsed.saturating_add(delay) >= budget {
                tracing::error!(
                    attempt,
                    elapsed_ms = elapsed.as_millis(),
                    budget_ms = budget.as_millis(),
                    error = %failure,
                    "Retry budget exhausted before next attempt"
                );
                RetryMetrics::record_exhausted();
                return Err(RetryError::BudgetExceeded {
                    attempts: attempt,
                    elapsed,
                    last: failure,
                });
            }
        }

        tracing::warn!(
            attempt,
            delay_ms = delay.as_millis(),
            error = %failure,
            "Operation failed, retrying..."
        );

        tokio::select! {
            biased;
            () = ctx.cancelled() => {
                tracing::info!(attempt, "Retry sequence cancelled during backoff");
                RetryMetrics::record_cancelled();
                return Err(RetryError::Cancelled { attempts: attempt });
            }
            () = sleep(delay) => {}
        }
    }
}

/// Effective timeout for the next attempt: the per-attempt limit, further capped by
/// whatever is left of the schedule-to-close budget.
fn attempt_timeout(policy: &RetryPolicy, elapsed: Duration) -> Option<Duration> {
    let remaining_budget = policy
        .schedule_to_close
        .map(|budget| budget.saturating_sub(elapsed));

    match (policy.attempt_timeout, remaining_budget) {
        (Some(attempt), Some(budget)) => Some(attempt.min(budget)),
        (Some(limit), None) | (None, Some(limit)) => Some(limit),
        (None, None) => None,
    }
}

async fn run_attempt<Fut, T, E>(
    timeout: Option<Duration>,
    attempt: Fut,
) -> Result<T, AttemptFailure<E>>
where
    Fut: Future<Output = Result<T, E>>,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(result) => result.map_err(AttemptFailure::Failed),
            Err(_) => Err(AttemptFailure::TimedOut(limit)),
        },
        None => attempt.await.map_err(AttemptFailure::Failed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(max_attempts)
            .initial_interval(Duration::from_millis(10))
            .build()
    }

    #[test]
    fn test_retry_policy_delay_calculation() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(policy.total_backoff(), Duration::from_secs(15));
    }

    #[test]
    fn test_retry_policy_max_interval_cap() {
        let policy = RetryPolicy::builder()
            .initial_interval(Duration::from_secs(1))
            .backoff_coefficient(10.0)
            .max_interval(Duration::from_secs(60))
            .build();

        // 1s * 10^5 = 100,000s, but capped at one minute
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_builder_clamps_degenerate_values() {
        let policy = RetryPolicy::builder()
            .max_attempts(0)
            .backoff_coefficient(0.5)
            .build();

        assert_eq!(policy.max_attempts, 1);
        assert!((policy.backoff_coefficient - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_on_first_try() {
        let (ctx, _cancel) = WorkflowContext::new("retry-test");
        let counter = Arc::new(AtomicU32::new(0));

        let result = retry_with_backoff(&RetryPolicy::default(), &ctx, |_| {
            let c = Arc::clone(&counter);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(42)
            }
        })
        .await;

        assert_eq!(
            result,
            Ok(RetrySuccess {
                value: 42,
                attempts: 1
            })
        );
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_failures() {
        let (ctx, _cancel) = WorkflowContext::new("retry-test");

        let result = retry_with_backoff(&fast_policy(5), &ctx, |attempt| async move {
            if attempt < 3 {
                Err(format!("Attempt {attempt} failed"))
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(
            result,
            Ok(RetrySuccess {
                value: 3,
                attempts: 3
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_attempts_at_backoff_intervals() {
        let (ctx, _cancel) = WorkflowContext::new("retry-test");
        let started = Instant::now();
        let attempt_times = Arc::new(std::sync::Mutex::new(Vec::new()));

        let result = retry_with_backoff(&RetryPolicy::default(), &ctx, |_| {
            let times = Arc::clone(&attempt_times);
            async move {
                if let Ok(mut times) = times.lock() {
                    times.push(started.elapsed());
                }
                Err::<(), _>("provider unavailable")
            }
        })
        .await;

        assert!(matches!(
            result,
            Err(RetryError::Exhausted {
                attempts: 5,
                last: AttemptFailure::Failed("provider unavailable"),
            })
        ));

        let times = attempt_times.lock().map(|t| t.clone()).unwrap_or_default();
        let secs: Vec<u64> = times.iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![0, 1, 3, 7, 15]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_counts_as_failure() {
        let (ctx, _cancel) = WorkflowContext::new("retry-test");
        let policy = RetryPolicy::builder()
            .max_attempts(2)
            .initial_interval(Duration::from_secs(1))
            .attempt_timeout(Some(Duration::from_secs(10)))
            .build();

        let result = retry_with_backoff(&policy, &ctx, |_| async {
            sleep(Duration::from_secs(3600)).await;
            Ok::<(), String>(())
        })
        .await;

        assert!(matches!(
            result,
            Err(RetryError::Exhausted {
                attempts: 2,
                last: AttemptFailure::TimedOut(limit),
            }) if limit == Duration::from_secs(10)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_to_close_budget_stops_early() {
        let (ctx, _cancel) = WorkflowContext::new("retry-test");
        let policy = RetryPolicy::builder()
            .max_attempts(10)
            .initial_interval(Duration::from_secs(1))
            .schedule_to_close(Some(Duration::from_secs(5)))
            .build();

        let result = retry_with_backoff(&policy, &ctx, |_| async { Err::<(), _>("down") }).await;

        // Attempts at 0s, 1s, 3s; the next sleep (4s) would cross the 5s budget.
        assert!(matches!(
            result,
            Err(RetryError::BudgetExceeded { attempts: 3, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_interval_hits_budget_instead_of_overflowing() {
        let (ctx, _cancel) = WorkflowContext::new("retry-test");
        let policy = RetryPolicy::builder()
            .max_attempts(5)
            .initial_interval(Duration::MAX)
            .max_interval(Duration::MAX)
            .schedule_to_close(Some(Duration::from_secs(300)))
            .build();

        let result = retry_with_backoff(&policy, &ctx, |_| async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            Err::<(), _>("down")
        })
        .await;

        assert!(matches!(
            result,
            Err(RetryError::BudgetExceeded { attempts: 1, .. })
        ));
        assert_eq!(policy.total_backoff(), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_predicate_skips_non_retryable() {
        let (ctx, _cancel) = WorkflowContext::new("retry-test");
        let counter = Arc::new(AtomicU32::new(0));

        let result = retry_with_predicate(
            &RetryPolicy::default(),
            &ctx,
            |_| {
                let c = Arc::clone(&counter);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>("permanent error")
                }
            },
            |err: &&str| err.contains("transient"),
        )
        .await;

        assert!(matches!(
            result,
            Err(RetryError::NonRetryable { attempts: 1, .. })
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_backoff() {
        let (ctx, cancel) = WorkflowContext::new("retry-test");
        let counter = Arc::new(AtomicU32::new(0));

        let task = {
            let counter = Arc::clone(&counter);
            let ctx = ctx.clone();
            tokio::spawn(async move {
                retry_with_backoff(&RetryPolicy::default(), &ctx, |_| {
                    let c = Arc::clone(&counter);
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>("down")
                    }
                })
                .await
            })
        };

        // First attempt at 0s, second at 1s, then a 2s backoff is in flight.
        sleep(Duration::from_millis(1500)).await;
        cancel.cancel();

        let result = task.await;
        assert!(matches!(
            result,
            Ok(Err(RetryError::Cancelled { attempts: 2 }))
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    proptest::proptest! {
        #[test]
        fn prop_backoff_is_monotonic_and_capped(
            initial_ms in 1_u64..5_000,
            coefficient in 1.0_f64..4.0,
            max_secs in 1_u64..120,
            retry in 0_u32..64,
        ) {
            let policy = RetryPolicy::builder()
                .initial_interval(Duration::from_millis(initial_ms))
                .backoff_coefficient(coefficient)
                .max_interval(Duration::from_secs(max_secs))
                .build();

            let current = policy.delay_for_attempt(retry);
            let next = policy.delay_for_attempt(retry + 1);
            // Float rounding may cost a nanosecond when the coefficient is 1.0
            proptest::prop_assert!(next + Duration::from_micros(1) >= current);
            proptest::prop_assert!(next <= policy.max_interval);
        }
    }
}
