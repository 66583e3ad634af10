//! Inbound cart signals.
//!
//! Signals arrive on the `cartMessages` channel as JSON envelopes tagged by
//! `route`:
//!
//! ```json
//! {"route": "ADD_TO_CART", "item": {"productId": 1, "quantity": 1}}
//! {"route": "REMOVE_FROM_CART", "productId": 1, "quantity": 1}
//! {"route": "UPDATE_EMAIL", "email": "a@b.com"}
//! ```
//!
//! Decoding and validation happen here, at the boundary. Anything that fails is
//! rejected with a [`SignalError`] and never reaches the racing loop.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{CartAction, CartItem, ProductId};

/// Name of the signal channel
pub const CART_CHANNEL: &str = "cartMessages";

/// Why an inbound signal was rejected
#[derive(Error, Debug)]
pub enum SignalError {
    /// Signal sent to a channel this workflow does not listen on
    #[error("Unknown signal channel: {0}")]
    UnknownChannel(String),

    /// Payload is not a known, well-formed signal
    #[error("Malformed signal: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Quantities must be at least 1
    #[error("Quantity for product {product_id} must be at least 1")]
    ZeroQuantity {
        /// Offending product
        product_id: ProductId,
    },

    /// The notification target must not be blank
    #[error("Email must not be empty")]
    EmptyEmail,
}

/// A decoded cart signal, before validation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "route",
    rename_all = "SCREAMING_SNAKE_CASE",
    deny_unknown_fields
)]
pub enum CartSignal {
    /// Append an item
    AddToCart {
        /// Item to append
        item: CartItem,
    },
    /// Remove units of a product
    #[serde(rename_all = "camelCase")]
    RemoveFromCart {
        /// Product to remove
        product_id: ProductId,
        /// Units to remove; all of them when absent
        #[serde(default)]
        quantity: Option<u32>,
    },
    /// Change the notification target
    UpdateEmail {
        /// New target
        email: String,
    },
}

impl CartSignal {
    /// Decode a JSON payload
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::Malformed`] for unknown routes, unknown or missing
    /// fields, and invalid JSON.
    pub fn from_json(payload: &str) -> Result<Self, SignalError> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Validate the signal and turn it into a reducer action
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::ZeroQuantity`] or [`SignalError::EmptyEmail`].
    pub fn into_action(self) -> Result<CartAction, SignalError> {
        match self {
            Self::AddToCart { item } => {
                if item.quantity == 0 {
                    return Err(SignalError::ZeroQuantity {
                        product_id: item.product_id,
                    });
                }
                Ok(CartAction::AddToCart { item })
            },
            Self::RemoveFromCart {
                product_id,
                quantity,
            } => {
                if quantity == Some(0) {
                    return Err(SignalError::ZeroQuantity { product_id });
                }
                Ok(CartAction::RemoveFromCart {
                    product_id,
                    quantity,
                })
            },
            Self::UpdateEmail { email } => {
                let email = email.trim();
                if email.is_empty() {
                    return Err(SignalError::EmptyEmail);
                }
                Ok(CartAction::UpdateEmail {
                    email: email.to_string(),
                })
            },
        }
    }
}

impl TryFrom<CartSignal> for CartAction {
    type Error = SignalError;

    fn try_from(signal: CartSignal) -> Result<Self, Self::Error> {
        signal.into_action()
    }
}

/// Decode and validate a payload delivered on `channel`
///
/// # Errors
///
/// Returns a [`SignalError`] if the channel is not [`CART_CHANNEL`] or the payload
/// is not a valid cart signal.
pub fn decode_signal(channel: &str, payload: &str) -> Result<CartAction, SignalError> {
    if channel != CART_CHANNEL {
        return Err(SignalError::UnknownChannel(channel.to_string()));
    }
    CartSignal::from_json(payload)?.into_action()
}
