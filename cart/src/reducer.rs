//! The cart state machine.
//!
//! ```text
//!            add                       add / remove / email
//!   ┌──────┐ ───────────► ┌───────────────┐ ◄──────┐
//!   │ Idle │              │ ActiveWaiting │ ───────┘ (deadline re-armed)
//!   └──────┘ ◄─────────── └───────┬───────┘
//!            last item removed    │ deadline fires
//!                                 ▼
//!                           ┌──────────┐
//!                           │ Notified │ ◄── mutations keep updating items
//!                           └──────────┘
//! ```
//!
//! Every accepted mutation starts a new episode and re-arms the deadline with the
//! full abandonment timeout while the cart is non-empty and no reminder was sent;
//! otherwise it disarms the deadline. The deadline carries the episode it was
//! armed in, and a firing from an older episode is ignored. When the deadline
//! fires the reminder is dispatched once and `notification_sent` is set for the
//! rest of the session, whatever the dispatch outcome.

use abandoned_cart_core::effect::Effect;
use abandoned_cart_core::environment::Clock;
use abandoned_cart_core::reducer::Reducer;
use std::sync::Arc;
use std::time::Duration;

use crate::notifier::ReminderDispatcher;
use crate::types::{CartAction, CartState, ReminderStatus};

/// Dependencies of the cart reducer
#[derive(Clone)]
pub struct CartEnvironment {
    /// Timestamps mutations and reminder outcomes
    pub clock: Arc<dyn Clock>,
    /// Quiet period after the last mutation before the cart counts as abandoned
    pub abandonment_timeout: Duration,
    /// Sends the reminder
    pub dispatcher: ReminderDispatcher,
}

impl CartEnvironment {
    /// Create an environment
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        abandonment_timeout: Duration,
        dispatcher: ReminderDispatcher,
    ) -> Self {
        Self {
            clock,
            abandonment_timeout,
            dispatcher,
        }
    }
}

impl std::fmt::Debug for CartEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartEnvironment")
            .field("abandonment_timeout", &self.abandonment_timeout)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

/// Reducer for one cart session
#[derive(Debug, Clone, Copy, Default)]
pub struct CartReducer;

impl CartReducer {
    /// Create a cart reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Start a new episode and re-evaluate the deadline
    fn mutated(state: &mut CartState, env: &CartEnvironment) -> Vec<Effect<CartAction>> {
        state.episode += 1;
        state.last_mutation_at = Some(env.clock.now());

        if state.deadline_armed() {
            tracing::debug!(
                episode = state.episode,
                timeout_secs = env.abandonment_timeout.as_secs(),
                "Abandonment deadline armed"
            );
            vec![Effect::delay(
                env.abandonment_timeout,
                CartAction::AbandonmentTimeout {
                    episode: state.episode,
                },
            )]
        } else {
            vec![Effect::CancelDelay]
        }
    }

    fn abandoned(
        state: &mut CartState,
        episode: u64,
        env: &CartEnvironment,
    ) -> Vec<Effect<CartAction>> {
        if episode != state.episode || !state.deadline_armed() {
            tracing::debug!(
                episode,
                current_episode = state.episode,
                "Ignoring stale abandonment deadline"
            );
            return vec![Effect::None];
        }

        state.notification_sent = true;
        tracing::info!(
            episode,
            items = state.items.len(),
            email = %state.email,
            "Cart abandoned, dispatching reminder"
        );

        if state.email.is_empty() {
            tracing::warn!(episode, "No notification target, reminder skipped");
            state.reminder = ReminderStatus::Failed {
                attempts: 0,
                error: "no notification target".to_string(),
            };
            return vec![Effect::None];
        }

        state.reminder = ReminderStatus::Dispatching {
            since: env.clock.now(),
        };
        vec![env.dispatcher.dispatch(episode, state.email.clone())]
    }
}

impl Reducer for CartReducer {
    type State = CartState;
    type Action = CartAction;
    type Environment = CartEnvironment;

    fn reduce(
        &self,
        state: &mut CartState,
        action: CartAction,
        env: &CartEnvironment,
    ) -> Vec<Effect<CartAction>> {
        match action {
            CartAction::AddToCart { item } => {
                tracing::debug!(product_id = %item.product_id, quantity = item.quantity, "Item added");
                state.items.push(item);
                Self::mutated(state, env)
            },

            CartAction::RemoveFromCart {
                product_id,
                quantity,
            } => {
                let removed = state.remove_units(&product_id, quantity);
                if removed == 0 {
                    tracing::debug!(%product_id, "Product not in cart, nothing removed");
                    return vec![Effect::None];
                }
                tracing::debug!(%product_id, removed, "Item removed");
                Self::mutated(state, env)
            },

            CartAction::UpdateEmail { email } => {
                tracing::debug!(%email, "Notification target updated");
                state.email = email;
                Self::mutated(state, env)
            },

            CartAction::AbandonmentTimeout { episode } => Self::abandoned(state, episode, env),

            CartAction::ReminderDelivered { episode, attempts } => {
                tracing::info!(episode, attempts, "Reminder outcome recorded: delivered");
                state.reminder = ReminderStatus::Delivered {
                    attempts,
                    at: env.clock.now(),
                };
                vec![Effect::None]
            },

            CartAction::ReminderFailed {
                episode,
                attempts,
                error,
            } => {
                tracing::warn!(episode, attempts, %error, "Reminder outcome recorded: failed");
                state.reminder = ReminderStatus::Failed { attempts, error };
                vec![Effect::None]
            },
        }
    }
}
