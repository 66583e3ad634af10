//! Shared fixtures for cart session tests.

use abandoned_cart::{
    CartAction, CartConfig, CartHandle, CartItem, CartState, CartWorkflow, Notifier,
    NotifyContext, NotifyError,
};
use abandoned_cart_runtime::retry::RetryPolicy;
use abandoned_cart_testing::helpers::init_test_tracing;
use abandoned_cart_testing::{ScriptedOutcomes, test_clock};
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Notifier driven by [`ScriptedOutcomes`] that also records who it was asked to notify
pub struct ScriptedNotifier {
    pub outcomes: ScriptedOutcomes,
    targets: Mutex<Vec<(String, NotifyContext)>>,
}

impl ScriptedNotifier {
    pub fn new(outcomes: ScriptedOutcomes) -> Arc<Self> {
        Arc::new(Self {
            outcomes,
            targets: Mutex::new(Vec::new()),
        })
    }

    pub fn succeeding() -> Arc<Self> {
        Self::new(ScriptedOutcomes::succeeding())
    }

    pub fn failing() -> Arc<Self> {
        Self::new(ScriptedOutcomes::failing("provider unavailable"))
    }

    pub fn calls(&self) -> usize {
        self.outcomes.calls()
    }

    pub fn targets(&self) -> Vec<String> {
        self.targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(target, _)| target.clone())
            .collect()
    }

    /// Call offsets from `start`, in whole milliseconds
    pub fn call_offsets_ms(&self, start: tokio::time::Instant) -> Vec<u128> {
        self.outcomes
            .call_times()
            .iter()
            .map(|t| t.duration_since(start).as_millis())
            .collect()
    }
}

impl Notifier for ScriptedNotifier {
    fn send_reminder<'a>(
        &'a self,
        ctx: &'a NotifyContext,
        target: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        self.targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((target.to_string(), ctx.clone()));
        let outcome = self.outcomes.next().map_err(NotifyError::Unavailable);
        Box::pin(async move { outcome })
    }
}

/// Config with a short abandonment timeout and the default reminder retry policy
pub fn config(timeout: Duration) -> CartConfig {
    CartConfig::default()
        .with_abandonment_timeout(timeout)
        .with_reminder_retry(RetryPolicy::default())
}

pub fn start(timeout: Duration, notifier: Arc<ScriptedNotifier>) -> CartHandle {
    init_test_tracing();
    let result = CartWorkflow::start_with_clock(
        "CART-test",
        CartState::new("user@example.com"),
        &config(timeout),
        notifier,
        Arc::new(test_clock()),
    );
    match result {
        Ok(handle) => handle,
        Err(error) => unreachable!("getCart registers on a fresh workflow: {error}"),
    }
}

pub fn add(product: u64, quantity: u32) -> CartAction {
    CartAction::AddToCart {
        item: CartItem::new(product, quantity),
    }
}

pub fn add_json(product: u64, quantity: u32) -> String {
    format!(r#"{{"route":"ADD_TO_CART","item":{{"productId":{product},"quantity":{quantity}}}}}"#)
}

pub fn remove_json(product: u64) -> String {
    format!(r#"{{"route":"REMOVE_FROM_CART","productId":{product}}}"#)
}

pub fn email_json(email: &str) -> String {
    format!(r#"{{"route":"UPDATE_EMAIL","email":"{email}"}}"#)
}
