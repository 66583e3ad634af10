//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the workflow runtime:
//! - Racing loop (actions applied, signals received)
//! - Deadline timer (armed, re-armed, cancelled, fired)
//! - Retried side effects (attempts, successes, exhaustion)
//!
//! Recording is always on; the values only leave the process once a recorder is
//! installed, e.g. with [`MetricsServer::start`].
//!
//! # Example
//!
//! ```rust,no_run
//! use abandoned_cart_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! if let Some(rendered) = server.render() {
//!     println!("{rendered}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other crates
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics recorder installer.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address the scrape endpoint is advertised on
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., by an earlier test), this logs a
    /// warning and succeeds without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.01, 0.1, 1.0, 5.0, 15.0, 60.0, 300.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Racing loop
    describe_counter!(
        "workflow_actions_processed_total",
        "Total number of actions applied by workflow reducers"
    );
    describe_counter!(
        "workflow_signals_received_total",
        "Total number of inbound signals accepted into workflow inboxes"
    );
    describe_histogram!(
        "workflow_reducer_duration_seconds",
        "Time taken to apply one action"
    );
    describe_counter!(
        "workflow_effects_executed_total",
        "Total number of effects executed, labelled by type"
    );

    // Deadline timer
    describe_counter!("deadline_timer_armed_total", "Deadlines armed");
    describe_counter!(
        "deadline_timer_rearmed_total",
        "Deadlines armed while another firing was pending"
    );
    describe_counter!(
        "deadline_timer_cancelled_total",
        "Pending deadlines cancelled"
    );
    describe_counter!("deadline_timer_fired_total", "Deadlines that fired");

    // Retry
    describe_counter!("retry_attempts_total", "Total number of attempts");
    describe_counter!(
        "retry_successes_total",
        "Operations that succeeded after at least one retry"
    );
    describe_counter!(
        "retry_exhausted_total",
        "Retry sequences that ran out of attempts or budget"
    );
    describe_counter!(
        "retry_cancelled_total",
        "Retry sequences stopped by workflow cancellation"
    );
}

/// Racing loop metrics recorder.
pub struct WorkflowMetrics;

impl WorkflowMetrics {
    /// Record an action applied by the reducer.
    pub fn record_action(duration: Duration) {
        counter!("workflow_actions_processed_total").increment(1);
        histogram!("workflow_reducer_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a signal accepted into the inbox.
    pub fn record_signal() {
        counter!("workflow_signals_received_total").increment(1);
    }

    /// Record an effect execution.
    pub fn record_effect(kind: &'static str) {
        counter!("workflow_effects_executed_total", "type" => kind).increment(1);
    }
}

/// Deadline timer metrics recorder.
pub struct TimerMetrics;

impl TimerMetrics {
    /// Record a deadline being armed.
    pub fn record_armed() {
        counter!("deadline_timer_armed_total").increment(1);
    }

    /// Record a pending deadline being replaced.
    pub fn record_rearm() {
        counter!("deadline_timer_rearmed_total").increment(1);
    }

    /// Record a pending deadline being cancelled.
    pub fn record_cancelled() {
        counter!("deadline_timer_cancelled_total").increment(1);
    }

    /// Record a deadline firing.
    pub fn record_fired() {
        counter!("deadline_timer_fired_total").increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record an attempt.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }

    /// Record a cancelled retry sequence.
    pub fn record_cancelled() {
        counter!("retry_cancelled_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_server_creation() {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let server = MetricsServer::new(addr);
        assert!(server.render().is_none());
    }

    #[test]
    fn test_metrics_server_render() {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let mut server = MetricsServer::new(addr);
        assert!(server.start().is_ok());

        TimerMetrics::record_armed();
        TimerMetrics::record_fired();
        RetryMetrics::record_attempt();

        // If this test runs after another test initialized the recorder,
        // handle might be None. That's OK - metrics are still being recorded.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("deadline_timer_armed_total"));
            assert!(rendered.contains("retry_attempts_total"));
        }
    }
}
