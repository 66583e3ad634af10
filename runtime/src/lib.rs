//! # Abandoned Cart Runtime
//!
//! Durable-workflow runtime pieces for long-running, signal-driven instances.
//!
//! This crate provides the racing loop that coordinates reducer execution, the
//! single-slot deadline timer, retried side effects, and read-only queries.
//!
//! ## Core Components
//!
//! - **Workflow**: Owns one instance's state and runs its racing loop
//! - **`DeadlineTimer`**: One pending deadline, re-armed or cancelled by effects
//! - **Retry**: Exponential backoff bounded by attempts, attempt timeout and total budget
//! - **Queries**: Named, read-only views of state answered without blocking the loop
//! - **`WorkflowContext`**: Workflow id, cancellation and tracing span, passed explicitly
//!
//! ## Example
//!
//! ```ignore
//! use abandoned_cart_runtime::{Workflow, WorkflowContext};
//!
//! let (ctx, cancel) = WorkflowContext::new("CART-1700000000");
//! let handle = Workflow::new(initial_state, my_reducer, environment)
//!     .register_query("getCart", MyState::clone)?
//!     .start(ctx, cancel);
//!
//! // Send a signal
//! handle.signal(Action::DoSomething).await?;
//!
//! // Read state
//! let value = handle.state(|s| s.some_field).await;
//! ```

/// Explicit per-instance context and cancellation
pub mod context;

/// Prometheus metrics for observability
pub mod metrics;

/// Named read-only queries
pub mod query;

/// Retry logic with exponential backoff
pub mod retry;

/// Single-slot deadline timer
pub mod timer;

/// The racing loop and handles to running instances
pub mod workflow;

/// Error types for the workflow runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur while starting, signalling or querying a workflow
    #[derive(Error, Debug)]
    pub enum WorkflowError {
        /// A query handler could not be registered
        #[error("Failed to register query '{name}': {reason}")]
        QueryRegistration {
            /// Query name
            name: String,
            /// Why registration was refused
            reason: String,
        },

        /// No handler is registered under the requested name
        #[error("Unknown query: {0}")]
        UnknownQuery(String),

        /// The query's answer could not be serialized
        #[error("Query '{name}' failed: {source}")]
        QueryFailed {
            /// Query name
            name: String,
            /// Serialization error
            source: serde_json::Error,
        },

        /// The instance was cancelled or has stopped and accepts no more signals
        #[error("Workflow is no longer accepting signals")]
        Terminated,

        /// The racing loop task panicked
        ///
        /// A reducer panic ends the instance; effects that panic do not.
        #[error("Workflow task failed: {0}")]
        TaskJoin(#[from] tokio::task::JoinError),
    }
}

pub use context::{CancelHandle, WorkflowContext};
pub use error::WorkflowError;
pub use query::QueryRegistry;
pub use retry::{RetryError, RetryPolicy, RetrySuccess, retry_with_backoff};
pub use timer::DeadlineTimer;
pub use workflow::{Workflow, WorkflowConfig, WorkflowExit, WorkflowHandle};
