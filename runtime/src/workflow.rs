//! The racing loop.
//!
//! A [`Workflow`] owns one instance's state, reducer and environment. Once started
//! it runs a single logical thread of control that repeatedly waits on every
//! source that can produce the next action and consumes exactly one of them:
//!
//! ```text
//!            ┌──────────────┐
//! signals ──►│              │
//!            │   select!    │──► reducer ──► effects ─┬─► Delay / CancelDelay ──► DeadlineTimer
//! feedback ─►│   (biased)   │        │                └─► Future ──► JoinSet ──► feedback
//!            │              │        ▼
//! deadline ─►│              │   state (RwLock) ◄── queries
//!            └──────────────┘
//! ```
//!
//! Priority when several sources are ready in the same instant: cancellation,
//! then inbound signals, then effect feedback, then the deadline. A signal that
//! arrives at the instant the deadline expires therefore always wins and gets the
//! chance to re-arm or cancel it.
//!
//! Side effects run as tasks outside the loop, so a slow or retrying effect never
//! stops the loop from observing further signals.

use abandoned_cart_core::{effect::Effect, reducer::Reducer};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::Instrument;

use crate::context::{CancelHandle, WorkflowContext};
use crate::error::WorkflowError;
use crate::metrics::WorkflowMetrics;
use crate::query::QueryRegistry;
use crate::timer::DeadlineTimer;

/// Runtime configuration for a workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WorkflowConfig {
    /// Capacity of the inbound signal inbox
    pub signal_buffer: usize,
    /// Capacity of the applied-action broadcast channel
    pub broadcast_capacity: usize,
}

impl WorkflowConfig {
    /// Create a configuration
    #[must_use]
    pub const fn new(signal_buffer: usize, broadcast_capacity: usize) -> Self {
        Self {
            signal_buffer,
            broadcast_capacity,
        }
    }

    /// Set the signal inbox capacity
    #[must_use]
    pub const fn with_signal_buffer(mut self, capacity: usize) -> Self {
        self.signal_buffer = capacity;
        self
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self::new(64, 64)
    }
}

/// Why the racing loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowExit {
    /// The hosting environment cancelled the instance
    Cancelled,
    /// Every signal sender was dropped
    InboxClosed,
}

/// A workflow instance that has not been started yet
///
/// # Type Parameters
///
/// - `S`: State type
/// - `A`: Action type
/// - `E`: Environment type
/// - `R`: Reducer implementation
///
/// # Example
///
/// ```ignore
/// let (ctx, cancel) = WorkflowContext::new("CART-1");
/// let handle = Workflow::new(CartState::default(), CartReducer, env)
///     .register_query("getCart", CartState::clone)?
///     .start(ctx, cancel);
///
/// handle.signal(CartAction::UpdateEmail { email }).await?;
/// let cart = handle.query("getCart").await?;
/// ```
pub struct Workflow<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    state: S,
    reducer: R,
    environment: E,
    queries: QueryRegistry<S>,
    config: WorkflowConfig,
}

impl<S, A, E, R> Workflow<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Send + 'static,
    A: Clone + Send + std::fmt::Debug + 'static,
    S: Send + Sync + 'static,
    E: Send + 'static,
{
    /// Create a workflow with initial state, reducer, and environment
    ///
    /// Uses [`WorkflowConfig::default`].
    #[must_use]
    pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
        Self::with_config(initial_state, reducer, environment, WorkflowConfig::default())
    }

    /// Create a workflow with custom configuration
    #[must_use]
    pub fn with_config(
        initial_state: S,
        reducer: R,
        environment: E,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            state: initial_state,
            reducer,
            environment,
            queries: QueryRegistry::new(),
            config,
        }
    }

    /// Register a named, read-only query
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::QueryRegistration`] if the name is empty or already
    /// registered. The instance cannot be started without its queries, so callers
    /// should surface this error to whoever is starting the workflow.
    pub fn register_query<F, T>(mut self, name: &str, handler: F) -> Result<Self, WorkflowError>
    where
        F: Fn(&S) -> T + Send + Sync + 'static,
        T: serde::Serialize,
    {
        self.queries.register(name, handler)?;
        Ok(self)
    }

    /// Spawn the racing loop and return a handle to the running instance
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(self, ctx: WorkflowContext, cancel: CancelHandle) -> WorkflowHandle<S, A> {
        let (inbox_tx, inbox_rx) = mpsc::channel(self.config.signal_buffer.max(1));
        let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();
        let (actions, _) = broadcast::channel(self.config.broadcast_capacity.max(1));
        let state = Arc::new(RwLock::new(self.state));
        let workflow_id: Arc<str> = Arc::from(ctx.workflow_id());

        let racing_loop = RacingLoop {
            state: Arc::clone(&state),
            reducer: self.reducer,
            environment: self.environment,
            ctx: ctx.clone(),
            timer: DeadlineTimer::new(),
            tasks: JoinSet::new(),
            feedback_tx,
            actions: actions.clone(),
        };

        let span = ctx.span().clone();
        let task = tokio::spawn(racing_loop.run(inbox_rx, feedback_rx).instrument(span));

        WorkflowHandle {
            workflow_id,
            state,
            queries: Arc::new(self.queries),
            inbox: inbox_tx,
            actions,
            cancel,
            task,
        }
    }
}

/// What woke the racing loop
enum Wake<A> {
    Cancelled,
    Signal(A),
    InboxClosed,
    Feedback(A),
    Deadline(A),
    TaskDone(Result<(), JoinError>),
}

struct RacingLoop<S, A, E, R> {
    state: Arc<RwLock<S>>,
    reducer: R,
    environment: E,
    ctx: WorkflowContext,
    timer: DeadlineTimer<A>,
    tasks: JoinSet<()>,
    feedback_tx: mpsc::UnboundedSender<A>,
    actions: broadcast::Sender<A>,
}

impl<S, A, E, R> RacingLoop<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Send + 'static,
    A: Clone + Send + std::fmt::Debug + 'static,
    S: Send + Sync + 'static,
    E: Send + 'static,
{
    async fn run(
        mut self,
        mut inbox: mpsc::Receiver<A>,
        mut feedback: mpsc::UnboundedReceiver<A>,
    ) -> WorkflowExit {
        tracing::info!("Workflow started");

        let exit = loop {
            let wake = tokio::select! {
                biased;
                () = self.ctx.cancelled() => Wake::Cancelled,
                signal = inbox.recv() => signal.map_or(Wake::InboxClosed, Wake::Signal),
                Some(action) = feedback.recv() => Wake::Feedback(action),
                action = self.timer.fired(), if self.timer.is_armed() => Wake::Deadline(action),
                Some(joined) = self.tasks.join_next() => Wake::TaskDone(joined),
            };

            match wake {
                Wake::Cancelled => break WorkflowExit::Cancelled,
                Wake::InboxClosed => break WorkflowExit::InboxClosed,
                Wake::Signal(action) => {
                    WorkflowMetrics::record_signal();
                    tracing::debug!(?action, "Signal received");
                    self.apply(action).await;
                },
                Wake::Feedback(action) => {
                    tracing::debug!(?action, "Effect produced an action");
                    self.apply(action).await;
                },
                Wake::Deadline(action) => {
                    tracing::debug!(?action, "Deadline elapsed");
                    self.apply(action).await;
                },
                Wake::TaskDone(Ok(())) => {},
                Wake::TaskDone(Err(error)) => {
                    if error.is_panic() {
                        tracing::error!(%error, "Effect task panicked");
                    } else {
                        tracing::trace!(%error, "Effect task cancelled");
                    }
                },
            }
        };

        self.shutdown().await;
        tracing::info!(?exit, "Workflow stopped");
        exit
    }

    /// Apply one action: reduce under the write lock, publish it, run its effects
    async fn apply(&mut self, action: A) {
        let effects = {
            let mut state = self.state.write().await;
            tracing::trace!("Acquired write lock on state");

            let start = Instant::now();
            let effects = self
                .reducer
                .reduce(&mut state, action.clone(), &self.environment);
            WorkflowMetrics::record_action(start.elapsed());

            tracing::trace!("Reducer completed, returned {} effects", effects.len());
            effects
        };

        // Only lagging observers can make this fail; the loop never depends on them.
        let _ = self.actions.send(action);

        for effect in effects {
            self.execute(effect);
        }
    }

    fn execute(&mut self, effect: Effect<A>) {
        match effect {
            Effect::None => {
                WorkflowMetrics::record_effect("none");
            },
            Effect::Parallel(effects) => {
                WorkflowMetrics::record_effect("parallel");
                for effect in effects {
                    self.execute(effect);
                }
            },
            Effect::Delay { duration, action } => {
                WorkflowMetrics::record_effect("delay");
                tracing::debug!(duration_ms = duration.as_millis(), "Arming deadline");
                self.timer.arm(duration, *action);
            },
            Effect::CancelDelay => {
                WorkflowMetrics::record_effect("cancel_delay");
                if self.timer.cancel() {
                    tracing::debug!("Deadline disarmed");
                }
            },
            Effect::Future(fut) => {
                WorkflowMetrics::record_effect("future");
                let feedback = self.feedback_tx.clone();
                let span = self.ctx.span().clone();
                self.tasks.spawn(
                    async move {
                        if let Some(action) = fut.await {
                            // The receiver only goes away once the loop has stopped.
                            let _ = feedback.send(action);
                        }
                    }
                    .instrument(span),
                );
            },
        }
    }

    /// Stop in-flight effects and disarm the deadline
    async fn shutdown(&mut self) {
        let in_flight = self.tasks.len();
        if self.timer.cancel() {
            tracing::debug!("Pending deadline dropped on shutdown");
        }
        if in_flight > 0 {
            tracing::info!(in_flight, "Aborting in-flight effects");
        }
        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
    }
}

/// Handle to a running workflow instance
///
/// Signals are queued in order; queries read a consistent snapshot of state at
/// any time, including after the loop has stopped.
pub struct WorkflowHandle<S, A> {
    workflow_id: Arc<str>,
    state: Arc<RwLock<S>>,
    queries: Arc<QueryRegistry<S>>,
    inbox: mpsc::Sender<A>,
    actions: broadcast::Sender<A>,
    cancel: CancelHandle,
    task: JoinHandle<WorkflowExit>,
}

impl<S, A> WorkflowHandle<S, A> {
    /// The workflow id
    #[must_use]
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Deliver a signal to the instance's inbox
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Terminated`] if the instance was cancelled or has stopped.
    pub async fn signal(&self, action: A) -> Result<(), WorkflowError> {
        if self.cancel.is_cancelled() {
            return Err(WorkflowError::Terminated);
        }
        self.inbox
            .send(action)
            .await
            .map_err(|_| WorkflowError::Terminated)
    }

    /// Read current state via a closure
    ///
    /// ```ignore
    /// let item_count = handle.state(|s| s.items.len()).await;
    /// ```
    pub async fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&S) -> T,
    {
        let state = self.state.read().await;
        f(&state)
    }

    /// Owned copy of the current state
    pub async fn snapshot(&self) -> S
    where
        S: Clone,
    {
        self.state(S::clone).await
    }

    /// Answer a registered query
    ///
    /// # Errors
    ///
    /// - [`WorkflowError::UnknownQuery`] if `name` was never registered
    /// - [`WorkflowError::QueryFailed`] if the answer cannot be serialized
    pub async fn query(&self, name: &str) -> Result<serde_json::Value, WorkflowError> {
        let state = self.state.read().await;
        self.queries.answer(name, &state)
    }

    /// Observe every action the instance applies, in order
    ///
    /// Subscribe before sending signals to avoid missing actions.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<A> {
        self.actions.subscribe()
    }

    /// Request cancellation of the instance
    ///
    /// In-flight effects are aborted and the deadline is disarmed. Returns `true`
    /// the first time it is called.
    pub fn cancel(&self) -> bool {
        let first = self.cancel.cancel();
        if first {
            tracing::info!(workflow_id = %self.workflow_id, "Cancellation requested");
        }
        first
    }

    /// Whether the racing loop has stopped
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the racing loop to stop
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::TaskJoin`] if the loop panicked.
    pub async fn join(self) -> Result<WorkflowExit, WorkflowError> {
        Ok(self.task.await?)
    }

    /// Cancel the instance and wait for it to stop
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::TaskJoin`] if the loop panicked.
    pub async fn shutdown(self) -> Result<WorkflowExit, WorkflowError> {
        self.cancel();
        self.join().await
    }
}

impl<S, A> std::fmt::Debug for WorkflowHandle<S, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowHandle")
            .field("workflow_id", &self.workflow_id)
            .field("queries", &self.queries)
            .field("finished", &self.task.is_finished())
            .finish_non_exhaustive()
    }
}
