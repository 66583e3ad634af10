//! Racing loop behaviour: source priority, effect feedback and cancellation.

use abandoned_cart_core::effect::Effect;
use abandoned_cart_core::reducer::Reducer;
use abandoned_cart_runtime::{Workflow, WorkflowContext, WorkflowError, WorkflowExit, WorkflowHandle};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, Default, serde::Serialize)]
struct SessionState {
    touches: u32,
    expirations: u32,
    echoes: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
enum SessionAction {
    /// Arm the deadline
    Touch,
    /// Disarm the deadline
    Stop,
    Expired,
    /// Run a slow effect that reports back with `Echoed`
    Echo(u32),
    Echoed(u32),
}

#[derive(Clone)]
struct SessionEnv {
    timeout: Duration,
    effect_delay: Duration,
    finished_effects: Arc<AtomicU32>,
}

struct SessionReducer;

impl Reducer for SessionReducer {
    type State = SessionState;
    type Action = SessionAction;
    type Environment = SessionEnv;

    fn reduce(
        &self,
        state: &mut SessionState,
        action: SessionAction,
        env: &SessionEnv,
    ) -> Vec<Effect<SessionAction>> {
        match action {
            SessionAction::Touch => {
                state.touches += 1;
                vec![Effect::delay(env.timeout, SessionAction::Expired)]
            },
            SessionAction::Stop => vec![Effect::CancelDelay],
            SessionAction::Expired => {
                state.expirations += 1;
                vec![Effect::None]
            },
            SessionAction::Echo(value) => {
                let delay = env.effect_delay;
                let finished = Arc::clone(&env.finished_effects);
                vec![Effect::future(async move {
                    sleep(delay).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Some(SessionAction::Echoed(value))
                })]
            },
            SessionAction::Echoed(value) => {
                state.echoes.push(value);
                vec![Effect::None]
            },
        }
    }
}

fn start(
    timeout: Duration,
    effect_delay: Duration,
) -> (WorkflowHandle<SessionState, SessionAction>, Arc<AtomicU32>) {
    let finished = Arc::new(AtomicU32::new(0));
    let env = SessionEnv {
        timeout,
        effect_delay,
        finished_effects: Arc::clone(&finished),
    };
    let (ctx, cancel) = WorkflowContext::new("session-1");
    (
        Workflow::new(SessionState::default(), SessionReducer, env).start(ctx, cancel),
        finished,
    )
}

#[tokio::test(start_paused = true)]
async fn test_signal_beats_deadline_ready_in_same_instant() {
    let (handle, _) = start(Duration::ZERO, Duration::ZERO);

    // Queued together: by the time the zero-length deadline is armed, Stop is
    // already waiting in the inbox and must be consumed first.
    assert!(handle.signal(SessionAction::Touch).await.is_ok());
    assert!(handle.signal(SessionAction::Stop).await.is_ok());
    sleep(Duration::from_secs(1)).await;

    assert_eq!(handle.state(|s| (s.touches, s.expirations)).await, (1, 0));
}

#[tokio::test(start_paused = true)]
async fn test_slow_effect_does_not_block_signals() {
    let (handle, finished) = start(Duration::from_secs(3600), Duration::from_secs(30));

    assert!(handle.signal(SessionAction::Echo(7)).await.is_ok());
    sleep(Duration::from_secs(1)).await;

    // The effect is still sleeping, but signals are applied immediately
    assert!(handle.signal(SessionAction::Touch).await.is_ok());
    sleep(Duration::from_millis(1)).await;
    assert_eq!(handle.state(|s| s.touches).await, 1);
    assert_eq!(finished.load(Ordering::SeqCst), 0);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(handle.state(|s| s.echoes.clone()).await, vec![7]);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_aborts_in_flight_effects() {
    let (handle, finished) = start(Duration::from_secs(5), Duration::from_secs(30));

    assert!(handle.signal(SessionAction::Touch).await.is_ok());
    assert!(handle.signal(SessionAction::Echo(1)).await.is_ok());
    sleep(Duration::from_secs(1)).await;

    assert!(handle.cancel());
    assert!(!handle.cancel());
    sleep(Duration::from_secs(3600)).await;

    assert!(handle.is_finished());
    assert_eq!(finished.load(Ordering::SeqCst), 0, "effect was aborted");
    assert_eq!(
        handle.state(|s| (s.touches, s.expirations, s.echoes.len())).await,
        (1, 0, 0),
        "deadline disarmed and no partial updates after cancellation"
    );
    assert!(matches!(
        handle.signal(SessionAction::Touch).await,
        Err(WorkflowError::Terminated)
    ));
    assert!(matches!(handle.join().await, Ok(WorkflowExit::Cancelled)));
}

#[tokio::test(start_paused = true)]
async fn test_subscribers_observe_feedback_actions() {
    let (handle, _) = start(Duration::from_secs(5), Duration::from_secs(1));
    let mut actions = handle.subscribe();

    assert!(handle.signal(SessionAction::Echo(3)).await.is_ok());
    assert!(handle.signal(SessionAction::Touch).await.is_ok());
    sleep(Duration::from_secs(10)).await;

    let mut seen = Vec::new();
    while let Ok(action) = actions.try_recv() {
        seen.push(action);
    }
    assert_eq!(
        seen,
        vec![
            SessionAction::Echo(3),
            SessionAction::Touch,
            SessionAction::Echoed(3),
            SessionAction::Expired,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_query_registration_rejects_duplicates() {
    let env = SessionEnv {
        timeout: Duration::from_secs(1),
        effect_delay: Duration::ZERO,
        finished_effects: Arc::new(AtomicU32::new(0)),
    };
    let workflow = Workflow::new(SessionState::default(), SessionReducer, env)
        .register_query("getSession", SessionState::clone)
        .and_then(|w| w.register_query("getSession", |s: &SessionState| s.touches));

    assert!(matches!(
        workflow,
        Err(WorkflowError::QueryRegistration { ref name, .. }) if name == "getSession"
    ));
}
