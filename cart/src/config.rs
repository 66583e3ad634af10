//! Configuration management for the abandoned-cart workflow.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Unset variables take their default; set but unparsable ones are an error.

use abandoned_cart_runtime::retry::RetryPolicy;
use abandoned_cart_runtime::workflow::WorkflowConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but its value is not acceptable
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        /// Environment variable
        key: &'static str,
        /// Raw value
        value: String,
        /// What is wrong with it
        reason: String,
    },
}

/// Cart workflow configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartConfig {
    /// Quiet period after the last mutation before the cart counts as abandoned
    pub abandonment_timeout: Duration,
    /// Retry policy for the reminder
    pub reminder_retry: RetryPolicy,
    /// Capacity of the signal inbox
    pub signal_buffer: usize,
    /// Metrics exporter settings
    pub metrics: MetricsConfig,
}

/// Metrics exporter configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder
    pub enabled: bool,
    /// Address advertised for scraping
    pub addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
        }
    }
}

impl Default for CartConfig {
    fn default() -> Self {
        Self {
            abandonment_timeout: Duration::from_secs(600),
            reminder_retry: RetryPolicy::default(),
            signal_buffer: 64,
            metrics: MetricsConfig::default(),
        }
    }
}

impl CartConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `ABANDONED_CART_TIMEOUT_SECS` | 600 |
    /// | `REMINDER_INITIAL_INTERVAL_MS` | 1000 |
    /// | `REMINDER_BACKOFF_COEFFICIENT` | 2.0 |
    /// | `REMINDER_MAX_INTERVAL_SECS` | 60 |
    /// | `REMINDER_MAX_ATTEMPTS` | 5 |
    /// | `REMINDER_ATTEMPT_TIMEOUT_SECS` | 60 |
    /// | `REMINDER_SCHEDULE_TO_CLOSE_SECS` | 300 |
    /// | `CART_SIGNAL_BUFFER` | 64 |
    /// | `METRICS_ENABLED` | false |
    /// | `METRICS_ADDR` | 0.0.0.0:9090 |
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a set variable cannot be parsed or is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable cannot be parsed or is out of range.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let timeout_secs: u64 = positive(&lookup, "ABANDONED_CART_TIMEOUT_SECS", 600)?;
        let initial_ms: u64 = parse(&lookup, "REMINDER_INITIAL_INTERVAL_MS", 1000)?;
        let coefficient: f64 = parse(&lookup, "REMINDER_BACKOFF_COEFFICIENT", 2.0)?;
        let max_interval_secs: u64 = parse(&lookup, "REMINDER_MAX_INTERVAL_SECS", 60)?;
        let max_attempts: u32 = positive(&lookup, "REMINDER_MAX_ATTEMPTS", 5)?;
        let attempt_timeout_secs: u64 = parse(&lookup, "REMINDER_ATTEMPT_TIMEOUT_SECS", 60)?;
        let budget_secs: u64 = parse(&lookup, "REMINDER_SCHEDULE_TO_CLOSE_SECS", 300)?;
        let signal_buffer: usize = positive(&lookup, "CART_SIGNAL_BUFFER", 64)?;
        let metrics_enabled: bool = parse(&lookup, "METRICS_ENABLED", false)?;
        let metrics_addr: SocketAddr =
            parse(&lookup, "METRICS_ADDR", MetricsConfig::default().addr)?;

        if !coefficient.is_finite() || coefficient < 1.0 {
            return Err(ConfigError::Invalid {
                key: "REMINDER_BACKOFF_COEFFICIENT",
                value: coefficient.to_string(),
                reason: "must be a finite number >= 1.0".to_string(),
            });
        }

        // Zero disables the corresponding limit
        let limit = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));

        Ok(Self {
            abandonment_timeout: Duration::from_secs(timeout_secs),
            reminder_retry: RetryPolicy::builder()
                .max_attempts(max_attempts)
                .initial_interval(Duration::from_millis(initial_ms))
                .backoff_coefficient(coefficient)
                .max_interval(Duration::from_secs(max_interval_secs))
                .attempt_timeout(limit(attempt_timeout_secs))
                .schedule_to_close(limit(budget_secs))
                .build(),
            signal_buffer,
            metrics: MetricsConfig {
                enabled: metrics_enabled,
                addr: metrics_addr,
            },
        })
    }

    /// Override the abandonment timeout
    ///
    /// Unlike `ABANDONED_CART_TIMEOUT_SECS`, zero is accepted here; the deadline then
    /// fires as soon as the loop has drained queued signals.
    #[must_use]
    pub const fn with_abandonment_timeout(mut self, timeout: Duration) -> Self {
        self.abandonment_timeout = timeout;
        self
    }

    /// Override the reminder retry policy
    #[must_use]
    pub fn with_reminder_retry(mut self, policy: RetryPolicy) -> Self {
        self.reminder_retry = policy;
        self
    }

    /// Runtime configuration for the workflow instance
    #[must_use]
    pub fn workflow_config(&self) -> WorkflowConfig {
        WorkflowConfig::default().with_signal_buffer(self.signal_buffer)
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn positive<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Default + PartialEq + ToString,
    T::Err: std::fmt::Display,
{
    let value = parse(lookup, key, default)?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
