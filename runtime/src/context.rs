//! Explicit per-instance context.
//!
//! Every component of a workflow instance receives a [`WorkflowContext`] instead
//! of reaching for ambient globals. It carries:
//!
//! - the workflow id (used as a structured log field),
//! - the cancellation signal raised by the hosting environment,
//! - the `tracing` span that all of the instance's logs are recorded under.
//!
//! Cancellation follows the `watch::channel(false)` shutdown pattern: the host
//! keeps the [`CancelHandle`] and flips the flag to `true`. Dropping the handle
//! also counts as cancellation, since nobody is left to own the instance.

use std::sync::Arc;
use tokio::sync::watch;

/// Context handed to the racing loop, effects and side-effect invokers
#[derive(Clone, Debug)]
pub struct WorkflowContext {
    workflow_id: Arc<str>,
    cancelled: watch::Receiver<bool>,
    span: tracing::Span,
}

/// Owner side of a [`WorkflowContext`]'s cancellation signal
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl WorkflowContext {
    /// Create a context and the handle that cancels it
    #[must_use]
    pub fn new(workflow_id: impl Into<String>) -> (Self, CancelHandle) {
        let workflow_id: Arc<str> = Arc::from(workflow_id.into());
        let (sender, cancelled) = watch::channel(false);
        let span = tracing::info_span!("workflow", workflow_id = %workflow_id);

        (
            Self {
                workflow_id,
                cancelled,
                span,
            },
            CancelHandle { sender },
        )
    }

    /// The workflow id
    #[must_use]
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// The span all of this instance's work is recorded under
    #[must_use]
    pub const fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Whether cancellation has been requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow() || self.cancelled.has_changed().is_err()
    }

    /// Resolve once cancellation is requested (or the handle is dropped)
    pub async fn cancelled(&self) {
        let mut cancelled = self.cancelled.clone();
        // An Err means the handle is gone, which is treated as cancellation.
        let _ = cancelled.wait_for(|flag| *flag).await;
    }
}

impl CancelHandle {
    /// Request cancellation
    ///
    /// Idempotent. Returns `true` the first time it flips the flag.
    pub fn cancel(&self) -> bool {
        self.sender.send_if_modified(|flag| {
            if *flag {
                false
            } else {
                *flag = true;
                true
            }
        })
    }

    /// Whether cancellation has been requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}
