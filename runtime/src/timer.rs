//! Single-slot deadline timer.
//!
//! A workflow instance races its inbound signals against at most one pending
//! deadline. [`DeadlineTimer`] holds that deadline together with the action it
//! delivers when it fires.
//!
//! - `arm` schedules exactly one future firing and replaces any pending one
//! - `cancel` drops a pending firing without side effects
//! - `fired` resolves once per arming, handing back the armed action
//!
//! The timer is built on [`tokio::time::Sleep`], so tests running with a paused
//! clock (`#[tokio::test(start_paused = true)]`) observe exact firing instants.

use std::future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{Instant, Sleep};

use crate::metrics::TimerMetrics;

struct Armed<A> {
    sleep: Pin<Box<Sleep>>,
    action: A,
}

/// A cancellable, re-armable one-shot deadline
///
/// # Example
///
/// ```
/// use abandoned_cart_runtime::timer::DeadlineTimer;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut timer = DeadlineTimer::new();
/// timer.arm(Duration::from_millis(5), "elapsed");
/// assert!(timer.is_armed());
/// assert_eq!(timer.fired().await, "elapsed");
/// assert!(!timer.is_armed());
/// # }
/// ```
pub struct DeadlineTimer<A> {
    armed: Option<Armed<A>>,
}

impl<A> DeadlineTimer<A> {
    /// Create a disarmed timer
    #[must_use]
    pub const fn new() -> Self {
        Self { armed: None }
    }

    /// Schedule `action` to fire after `duration`
    ///
    /// Any pending firing is cancelled first.
    pub fn arm(&mut self, duration: Duration, action: A) {
        if self.armed.is_some() {
            TimerMetrics::record_rearm();
            tracing::trace!("Re-arming deadline, pending firing replaced");
        }

        // `sleep` clamps durations past the far future instead of overflowing
        self.armed = Some(Armed {
            sleep: Box::pin(tokio::time::sleep(duration)),
            action,
        });

        TimerMetrics::record_armed();
        tracing::trace!(duration_ms = duration.as_millis(), "Deadline armed");
    }

    /// Cancel the pending firing
    ///
    /// Returns `true` if a firing was pending.
    pub fn cancel(&mut self) -> bool {
        let was_armed = self.armed.take().is_some();
        if was_armed {
            TimerMetrics::record_cancelled();
            tracing::trace!("Deadline cancelled");
        }
        was_armed
    }

    /// Whether a firing is pending
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Time left until the pending firing, if any
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.armed
            .as_ref()
            .map(|armed| armed.sleep.deadline().saturating_duration_since(Instant::now()))
    }

    /// Wait for the pending firing and take its action
    ///
    /// Never resolves while the timer is disarmed, which makes it safe to use in a
    /// `select!` branch. Guard the branch with [`DeadlineTimer::is_armed`] anyway so
    /// the disarmed case is not polled at all.
    ///
    /// Cancel safe: if the returned future is dropped before completion the
    /// deadline stays armed.
    pub async fn fired(&mut self) -> A {
        let Some(armed) = self.armed.as_mut() else {
            return future::pending().await;
        };

        armed.sleep.as_mut().await;

        match self.armed.take() {
            Some(armed) => {
                TimerMetrics::record_fired();
                tracing::trace!("Deadline fired");
                armed.action
            },
            None => future::pending().await,
        }
    }
}

impl<A> Default for DeadlineTimer<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> std::fmt::Debug for DeadlineTimer<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadlineTimer")
            .field("armed", &self.is_armed())
            .field("remaining", &self.remaining())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_duration() {
        let mut timer = DeadlineTimer::new();
        let start = Instant::now();
        timer.arm(Duration::from_secs(10), 1_u32);

        let action = timer.fired().await;

        assert_eq!(action, 1);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_pending_firing() {
        let mut timer = DeadlineTimer::new();
        let start = Instant::now();
        timer.arm(Duration::from_secs(10), "first");

        tokio::time::advance(Duration::from_secs(5)).await;
        timer.arm(Duration::from_secs(10), "second");

        let action = timer.fired().await;
        assert_eq!(action, "second");
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let mut timer = DeadlineTimer::new();
        timer.arm(Duration::from_secs(1), ());
        assert!(timer.cancel());
        assert!(!timer.cancel());

        let outcome = tokio::time::timeout(Duration::from_secs(5), timer.fired()).await;
        assert!(outcome.is_err(), "disarmed timer must never fire");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_wait_keeps_deadline_armed() {
        let mut timer = DeadlineTimer::new();
        timer.arm(Duration::from_secs(10), 7_u8);

        let early = tokio::time::timeout(Duration::from_secs(3), timer.fired()).await;
        assert!(early.is_err());
        assert!(timer.is_armed());
        assert_eq!(timer.remaining(), Some(Duration::from_secs(7)));

        assert_eq!(timer.fired().await, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_duration_stays_armed() {
        let mut timer = DeadlineTimer::new();
        timer.arm(Duration::MAX, "never");

        let outcome = tokio::time::timeout(Duration::from_secs(3600), timer.fired()).await;
        assert!(outcome.is_err());
        assert!(timer.is_armed());
        assert!(timer.remaining().is_some_and(|left| left > Duration::from_secs(86_400)));

        timer.arm(Duration::from_secs(1), "soon");
        assert_eq!(timer.fired().await, "soon");
    }
}
