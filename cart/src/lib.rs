//! Abandoned Cart Workflow
//!
//! A long-lived cart session that races cart updates against an abandonment
//! deadline and sends the owner one reminder if the cart goes quiet.
//!
//! # Architecture
//!
//! ```text
//!  cartMessages ──► signal::decode_signal ──┐
//!                   (rejects bad payloads)  │
//!                                           ▼
//!                                   ┌──────────────┐   Delay / CancelDelay   ┌───────────────┐
//!                                   │ CartReducer  │ ──────────────────────► │ DeadlineTimer │
//!                                   │ (racing loop)│ ◄────────────────────── │               │
//!                                   └──────┬───────┘   AbandonmentTimeout    └───────────────┘
//!                                          │ Future
//!                                          ▼
//!                                 ReminderDispatcher ──► Notifier (retried)
//!                                          │
//!                    ReminderDelivered / ReminderFailed ──► back to the reducer
//!
//!  getCart ──► read-only snapshot of CartState
//! ```
//!
//! # Key Concepts Demonstrated
//!
//! - **Event racing**: signals always win over a deadline that is ready in the same instant
//! - **Re-arming**: the deadline measures time since the last mutation
//! - **At most one reminder**: `notification_sent` is set once and never reset
//! - **Non-fatal side effects**: reminder failures are recorded, never escalated
//!
//! # Usage
//!
//! ```no_run
//! use abandoned_cart::{CartConfig, CartState, CartWorkflow, LoggingNotifier, CART_CHANNEL};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handle = CartWorkflow::start(
//!     "CART-1700000000",
//!     CartState::new("user@example.com"),
//!     &CartConfig::default(),
//!     Arc::new(LoggingNotifier),
//! )?;
//!
//! handle
//!     .signal_json(CART_CHANNEL, r#"{"route":"ADD_TO_CART","item":{"productId":1,"quantity":1}}"#)
//!     .await?;
//!
//! let cart = handle.get_cart().await;
//! assert_eq!(cart.items.len(), 1);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod notifier;
pub mod reducer;
pub mod signal;
pub mod types;
pub mod workflow;

pub use config::{CartConfig, ConfigError, MetricsConfig};
pub use notifier::{LoggingNotifier, Notifier, NotifyContext, NotifyError, ReminderDispatcher};
pub use reducer::{CartEnvironment, CartReducer};
pub use signal::{CART_CHANNEL, CartSignal, SignalError, decode_signal};
pub use types::{CartAction, CartItem, CartPhase, CartState, ProductId, ReminderStatus};
pub use workflow::{CartError, CartHandle, CartWorkflow, GET_CART_QUERY};
