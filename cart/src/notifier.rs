//! Reminder dispatch.
//!
//! The notification itself is an external collaborator behind the [`Notifier`]
//! trait. [`ReminderDispatcher`] calls it under a [`RetryPolicy`] and turns the
//! outcome into a [`CartAction`] for the reducer. Dispatch runs as an effect task,
//! outside the racing loop, so a slow provider never delays cart updates.

use abandoned_cart_core::effect::Effect;
use abandoned_cart_runtime::context::WorkflowContext;
use abandoned_cart_runtime::metrics::counter;
use abandoned_cart_runtime::retry::{RetryError, RetryPolicy, retry_with_predicate};
use futures::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;

use crate::types::CartAction;

/// Why a single notification attempt failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The provider could not be reached or timed out
    #[error("Notification provider unavailable: {0}")]
    Unavailable(String),

    /// The provider refused the message
    #[error("Notification rejected: {0}")]
    Rejected(String),

    /// The target can never receive a notification
    #[error("Invalid notification target: {0}")]
    InvalidTarget(String),
}

impl NotifyError {
    /// Whether another attempt could succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidTarget(_))
    }
}

/// What the notifier is told about the attempt it is making
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyContext {
    /// Workflow (cart session) id
    pub workflow_id: String,
    /// Abandonment episode being reported
    pub episode: u64,
    /// 1-based attempt number
    pub attempt: u32,
}

/// Sends the abandonment reminder
///
/// Implementations should treat repeated calls for the same workflow and episode
/// as acceptable duplicates.
pub trait Notifier: Send + Sync {
    /// Send one reminder to `target`
    fn send_reminder<'a>(
        &'a self,
        ctx: &'a NotifyContext,
        target: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>>;
}

/// Notifier that only logs; used by the demo binary
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

impl Notifier for LoggingNotifier {
    fn send_reminder<'a>(
        &'a self,
        ctx: &'a NotifyContext,
        target: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            tracing::info!(
                workflow_id = %ctx.workflow_id,
                episode = ctx.episode,
                attempt = ctx.attempt,
                email = target,
                "Sending abandoned cart reminder"
            );
            Ok(())
        })
    }
}

/// Runs a [`Notifier`] under a retry policy on behalf of one workflow instance
#[derive(Clone)]
pub struct ReminderDispatcher {
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
    ctx: WorkflowContext,
}

impl ReminderDispatcher {
    /// Create a dispatcher
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>, policy: RetryPolicy, ctx: WorkflowContext) -> Self {
        Self {
            notifier,
            policy,
            ctx,
        }
    }

    /// Effect that sends the reminder to `email` and reports the outcome back to the reducer
    #[must_use]
    pub fn dispatch(&self, episode: u64, email: String) -> Effect<CartAction> {
        let dispatcher = self.clone();
        Effect::future(async move { dispatcher.send(episode, &email).await })
    }

    /// Send the reminder to `email`, retrying per policy
    ///
    /// Returns `None` only when the instance was cancelled mid-sequence; there is
    /// nobody left to report to.
    #[tracing::instrument(skip(self), fields(workflow_id = %self.ctx.workflow_id()))]
    pub async fn send(&self, episode: u64, email: &str) -> Option<CartAction> {
        counter!("reminders_dispatched_total").increment(1);

        let result = retry_with_predicate(
            &self.policy,
            &self.ctx,
            |attempt| {
                let notifier = Arc::clone(&self.notifier);
                let notify_ctx = NotifyContext {
                    workflow_id: self.ctx.workflow_id().to_string(),
                    episode,
                    attempt,
                };
                async move { notifier.send_reminder(&notify_ctx, email).await }
            },
            NotifyError::is_retryable,
        )
        .await;

        match result {
            Ok(success) => {
                counter!("reminders_delivered_total").increment(1);
                tracing::info!(attempts = success.attempts, "Reminder delivered");
                Some(CartAction::ReminderDelivered {
                    episode,
                    attempts: success.attempts,
                })
            },
            Err(RetryError::Cancelled { attempts }) => {
                tracing::info!(attempts, "Reminder dispatch cancelled");
                None
            },
            Err(error) => {
                counter!("reminders_failed_total").increment(1);
                tracing::error!(attempts = error.attempts(), %error, "Reminder could not be delivered");
                Some(CartAction::ReminderFailed {
                    episode,
                    attempts: error.attempts(),
                    error: error.to_string(),
                })
            },
        }
    }
}

impl std::fmt::Debug for ReminderDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReminderDispatcher")
            .field("policy", &self.policy)
            .field("workflow_id", &self.ctx.workflow_id())
            .finish_non_exhaustive()
    }
}
