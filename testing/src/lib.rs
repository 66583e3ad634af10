//! # Abandoned Cart Testing
//!
//! Testing utilities and helpers for the abandoned-cart workflow.
//!
//! This crate provides:
//! - Deterministic clocks for the reducer environment
//! - Scripted outcomes for fallible collaborators (notification providers)
//! - Given-When-Then reducer tests and effect assertions
//! - proptest strategies shared by property tests
//!
//! ## Example
//!
//! ```ignore
//! use abandoned_cart_testing::{ScriptedOutcomes, test_clock};
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_reminder_retries() {
//!     let outcomes = Arc::new(ScriptedOutcomes::failing_times(2, "provider down"));
//!     let handle = start_cart_with(outcomes.clone()).await;
//!
//!     handle.signal(add_item("SKU-1", 1)).await?;
//!     tokio::time::sleep(Duration::from_secs(660)).await;
//!
//!     assert_eq!(outcomes.calls(), 3);
//! }
//! ```

use chrono::{DateTime, Utc};
use abandoned_cart_core::environment::Clock;


pub use reducer_test::{ReducerTest, assertions};

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::collections::VecDeque;
    use std::sync::{Mutex, PoisonError};
    use tokio::time::Instant;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use abandoned_cart_testing::mocks::FixedClock;
    /// use abandoned_cart_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Scripted results for a fallible collaborator
    ///
    /// Each call to [`ScriptedOutcomes::next`] records the (Tokio) instant of the
    /// call and returns the next scripted result. Once the script runs out, the
    /// fallback result is returned forever.
    ///
    /// Using Tokio's clock means call times are exact under a paused runtime.
    #[derive(Debug)]
    pub struct ScriptedOutcomes {
        script: Mutex<VecDeque<Result<(), String>>>,
        fallback: Result<(), String>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedOutcomes {
        /// Every call succeeds
        #[must_use]
        pub fn succeeding() -> Self {
            Self::scripted(Vec::new(), Ok(()))
        }

        /// Every call fails with `error`
        #[must_use]
        pub fn failing(error: impl Into<String>) -> Self {
            Self::scripted(Vec::new(), Err(error.into()))
        }

        /// The first `times` calls fail with `error`, later calls succeed
        #[must_use]
        pub fn failing_times(times: usize, error: impl Into<String>) -> Self {
            let error = error.into();
            Self::scripted(vec![Err(error); times], Ok(()))
        }

        /// Explicit script followed by `fallback`
        #[must_use]
        pub fn scripted(script: Vec<Result<(), String>>, fallback: Result<(), String>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Record a call and return its scripted result
        ///
        /// # Errors
        ///
        /// Returns the scripted error for this call, if any.
        pub fn next(&self) -> Result<(), String> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Instant::now());

            self.script
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone())
        }

        /// Number of calls so far
        #[must_use]
        pub fn calls(&self) -> usize {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len()
        }

        /// Instants of every call so far, in order
        #[must_use]
        pub fn call_times(&self) -> Vec<Instant> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use tracing_subscriber::EnvFilter;

    /// Install a test-friendly tracing subscriber
    ///
    /// Output goes through the test harness's capture. Honors `RUST_LOG` and
    /// defaults to `warn`. Safe to call from every test; only the first call wins.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use std::time::Duration;

    /// Short upper-case identifiers such as `SKU-42`
    pub fn identifier() -> impl Strategy<Value = String> {
        "[A-Z]{2,4}-[0-9]{1,4}"
    }

    /// Quantities in `1..=max`
    pub fn quantity(max: u32) -> impl Strategy<Value = u32> {
        1..=max.max(1)
    }

    /// Whole-second durations in `0..max_secs`
    pub fn whole_seconds(max_secs: u64) -> impl Strategy<Value = Duration> {
        (0..max_secs.max(1)).prop_map(Duration::from_secs)
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ScriptedOutcomes, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn test_scripted_outcomes_fall_back_after_script() {
        let outcomes = ScriptedOutcomes::failing_times(2, "down");

        assert_eq!(outcomes.next(), Err("down".to_string()));
        assert_eq!(outcomes.next(), Err("down".to_string()));
        assert_eq!(outcomes.next(), Ok(()));
        assert_eq!(outcomes.next(), Ok(()));
        assert_eq!(outcomes.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_outcomes_record_paused_instants() {
        let outcomes = ScriptedOutcomes::failing("down");
        let start = tokio::time::Instant::now();

        let _ = outcomes.next();
        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        let _ = outcomes.next();

        let offsets: Vec<u64> = outcomes
            .call_times()
            .iter()
            .map(|t| t.duration_since(start).as_secs())
            .collect();
        assert_eq!(offsets, vec![0, 3]);
    }
}
