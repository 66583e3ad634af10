//! Cart state, items and actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque product identifier
///
/// Numeric ids serialize as JSON numbers, anything else as strings.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProductId {
    /// Numeric id
    Number(u64),
    /// Textual id (SKU)
    Text(String),
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(id) => write!(f, "{id}"),
            Self::Text(id) => f.write_str(id),
        }
    }
}

impl From<u64> for ProductId {
    fn from(id: u64) -> Self {
        Self::Number(id)
    }
}

impl From<&str> for ProductId {
    fn from(id: &str) -> Self {
        Self::Text(id.to_string())
    }
}

impl From<String> for ProductId {
    fn from(id: String) -> Self {
        Self::Text(id)
    }
}

/// One line in the cart
///
/// Quantity is at least 1; signals carrying a zero quantity are rejected before
/// they reach the reducer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CartItem {
    /// Product identifier
    pub product_id: ProductId,
    /// Number of units
    pub quantity: u32,
}

impl CartItem {
    /// Create an item
    #[must_use]
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// Outcome of the abandonment reminder
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReminderStatus {
    /// The deadline has not fired
    #[default]
    NotSent,
    /// The deadline fired and the notifier is being called
    Dispatching {
        /// When the deadline fired
        since: DateTime<Utc>,
    },
    /// The notifier accepted the reminder
    Delivered {
        /// Attempts it took
        attempts: u32,
        /// When delivery was confirmed
        at: DateTime<Utc>,
    },
    /// Every attempt failed, or the failure was permanent
    Failed {
        /// Attempts made
        attempts: u32,
        /// Last error
        error: String,
    },
}

/// Where the cart is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CartPhase {
    /// No items; the deadline is disarmed
    Idle,
    /// Items present and no reminder sent; the deadline is armed
    ActiveWaiting,
    /// The reminder was dispatched; the deadline stays disarmed for the session
    Notified,
}

/// State of one cart session
///
/// Owned by the racing loop. Queries receive clones.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartState {
    /// Items in insertion order
    pub items: Vec<CartItem>,
    /// Notification target
    pub email: String,
    /// Set once, when the abandonment deadline fires
    pub notification_sent: bool,
    /// What became of the reminder
    pub reminder: ReminderStatus,
    /// Bumped by every accepted mutation; deadlines carry the episode they were armed in
    pub episode: u64,
    /// When the cart last changed
    pub last_mutation_at: Option<DateTime<Utc>>,
}

impl CartState {
    /// Empty cart for `email`
    #[must_use]
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ..Self::default()
        }
    }

    /// Current lifecycle phase
    #[must_use]
    pub fn phase(&self) -> CartPhase {
        if self.notification_sent {
            CartPhase::Notified
        } else if self.items.is_empty() {
            CartPhase::Idle
        } else {
            CartPhase::ActiveWaiting
        }
    }

    /// Whether the abandonment deadline should be armed
    #[must_use]
    pub fn deadline_armed(&self) -> bool {
        !self.items.is_empty() && !self.notification_sent
    }

    /// Total units of `product` across all entries
    #[must_use]
    pub fn total_quantity(&self, product: &ProductId) -> u64 {
        self.items
            .iter()
            .filter(|item| item.product_id == *product)
            .map(|item| u64::from(item.quantity))
            .sum()
    }

    /// Remove up to `quantity` units of `product` (all of them when `None`),
    /// newest entries first. Returns the number of units removed.
    pub fn remove_units(&mut self, product: &ProductId, quantity: Option<u32>) -> u64 {
        let Some(mut remaining) = quantity else {
            let removed = self.total_quantity(product);
            self.items.retain(|item| item.product_id != *product);
            return removed;
        };
        let mut removed = 0_u64;

        for item in self
            .items
            .iter_mut()
            .rev()
            .filter(|item| item.product_id == *product)
        {
            if remaining == 0 {
                break;
            }
            let take = item.quantity.min(remaining);
            item.quantity -= take;
            remaining -= take;
            removed += u64::from(take);
        }

        self.items.retain(|item| item.quantity > 0);
        removed
    }
}

/// Everything the cart reducer reacts to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CartAction {
    /// Signal: append an item
    AddToCart {
        /// Item to append
        item: CartItem,
    },
    /// Signal: remove units of a product
    RemoveFromCart {
        /// Product to remove
        product_id: ProductId,
        /// Units to remove; all of them when absent
        quantity: Option<u32>,
    },
    /// Signal: change the notification target
    UpdateEmail {
        /// New target
        email: String,
    },
    /// The abandonment deadline armed in `episode` elapsed
    AbandonmentTimeout {
        /// Episode the deadline was armed in
        episode: u64,
    },
    /// The reminder was delivered
    ReminderDelivered {
        /// Episode that closed
        episode: u64,
        /// Attempts it took
        attempts: u32,
    },
    /// The reminder could not be delivered
    ReminderFailed {
        /// Episode that closed
        episode: u64,
        /// Attempts made
        attempts: u32,
        /// Last error
        error: String,
    },
}
