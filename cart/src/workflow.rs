//! Starting and talking to cart sessions.

use abandoned_cart_core::environment::{Clock, SystemClock};
use abandoned_cart_runtime::context::WorkflowContext;
use abandoned_cart_runtime::error::WorkflowError;
use abandoned_cart_runtime::workflow::{Workflow, WorkflowExit, WorkflowHandle};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::CartConfig;
use crate::notifier::{Notifier, ReminderDispatcher};
use crate::reducer::{CartEnvironment, CartReducer};
use crate::signal::{CartSignal, SignalError, decode_signal};
use crate::types::{CartAction, CartState};

/// Name of the cart snapshot query
pub const GET_CART_QUERY: &str = "getCart";

/// Errors surfaced to callers of a [`CartHandle`]
#[derive(Error, Debug)]
pub enum CartError {
    /// The signal was rejected at the boundary; the session is unaffected
    #[error(transparent)]
    Signal(#[from] SignalError),

    /// The session could not accept or answer the request
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

/// Entry point for cart sessions
#[derive(Debug, Clone, Copy)]
pub struct CartWorkflow;

impl CartWorkflow {
    /// Start a cart session on the system clock
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::QueryRegistration`] if the `getCart` query cannot be
    /// registered; the session is not started in that case.
    pub fn start(
        workflow_id: &str,
        initial_state: CartState,
        config: &CartConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Result<CartHandle, WorkflowError> {
        Self::start_with_clock(
            workflow_id,
            initial_state,
            config,
            notifier,
            Arc::new(SystemClock),
        )
    }

    /// Start a cart session with an explicit clock
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::QueryRegistration`] if the `getCart` query cannot be
    /// registered; the session is not started in that case.
    #[tracing::instrument(skip_all, fields(workflow_id = %workflow_id))]
    pub fn start_with_clock(
        workflow_id: &str,
        initial_state: CartState,
        config: &CartConfig,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<CartHandle, WorkflowError> {
        let (ctx, cancel) = WorkflowContext::new(workflow_id);
        let dispatcher =
            ReminderDispatcher::new(notifier, config.reminder_retry.clone(), ctx.clone());
        let environment = CartEnvironment::new(clock, config.abandonment_timeout, dispatcher);

        let workflow = Workflow::with_config(
            initial_state,
            CartReducer::new(),
            environment,
            config.workflow_config(),
        )
        .register_query(GET_CART_QUERY, CartState::clone)?;

        tracing::info!(
            timeout_secs = config.abandonment_timeout.as_secs(),
            "Starting cart session"
        );

        Ok(CartHandle {
            inner: workflow.start(ctx, cancel),
        })
    }
}

/// Handle to a running cart session
#[derive(Debug)]
pub struct CartHandle {
    inner: WorkflowHandle<CartState, CartAction>,
}

impl CartHandle {
    /// The session's workflow id
    #[must_use]
    pub fn workflow_id(&self) -> &str {
        self.inner.workflow_id()
    }

    /// Validate and deliver a signal
    ///
    /// # Errors
    ///
    /// - [`CartError::Signal`] if the signal fails validation
    /// - [`CartError::Workflow`] if the session no longer accepts signals
    pub async fn signal(&self, signal: CartSignal) -> Result<(), CartError> {
        let action = signal.into_action()?;
        self.inner.signal(action).await?;
        Ok(())
    }

    /// Decode, validate and deliver a JSON signal received on `channel`
    ///
    /// Rejected payloads are logged and never reach the state machine.
    ///
    /// # Errors
    ///
    /// - [`CartError::Signal`] for an unknown channel or a malformed payload
    /// - [`CartError::Workflow`] if the session no longer accepts signals
    pub async fn signal_json(&self, channel: &str, payload: &str) -> Result<(), CartError> {
        let action = decode_signal(channel, payload).inspect_err(|error| {
            tracing::warn!(workflow_id = %self.workflow_id(), %error, "Signal rejected");
        })?;
        self.inner.signal(action).await?;
        Ok(())
    }

    /// Snapshot of the cart
    pub async fn get_cart(&self) -> CartState {
        self.inner.snapshot().await
    }

    /// Answer a registered query as JSON
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::UnknownQuery`] for anything but `getCart`.
    pub async fn query_json(&self, name: &str) -> Result<serde_json::Value, WorkflowError> {
        self.inner.query(name).await
    }

    /// Observe every action the session applies
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CartAction> {
        self.inner.subscribe()
    }

    /// Cancel the session; in-flight reminder retries stop
    pub fn cancel(&self) -> bool {
        self.inner.cancel()
    }

    /// Whether the session has stopped
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Wait for the session to stop
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::TaskJoin`] if the racing loop panicked.
    pub async fn join(self) -> Result<WorkflowExit, WorkflowError> {
        self.inner.join().await
    }
}
