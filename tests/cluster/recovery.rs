//! Recovery timer behavior. Time is paused, so sleeps advance the clock
//! deterministically.

use super::*;
use cluster_breaker::{CircuitEvent, CircuitState, TransitionCause};
use cluster_breaker_core::{NotificationBus, Notification, SharedState};

fn timer_transitions(log: &EventLog) -> usize {
    log.count(|e| {
        matches!(
            e,
            CircuitEvent::StateTransition {
                cause: TransitionCause::Timer,
                ..
            }
        )
    })
}

#[tokio::test(start_paused = true)]
async fn open_moves_to_half_open_after_reset_timeout() {
    let backend = backend();
    let log = EventLog::default();
    let orders = node_with(&backend, log.attach(HandlerConfig::builder("orders"))).await;

    orders.force_open();
    tokio::time::sleep(RESET_TIMEOUT - Duration::from_millis(10)).await;
    assert!(orders.is_open());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(orders.state(), CircuitState::HalfOpen);
    assert!(!orders.recovery_pending());
    assert_eq!(timer_transitions(&log), 1);

    // Entering half-open is local only: just the open was written.
    assert_eq!(backend.commits().len(), 1);
    assert_eq!(backend.field(STATE_KEY, "orders").as_deref(), Some("open"));
}

#[tokio::test(start_paused = true)]
async fn repeated_open_keeps_the_first_deadline() {
    let backend = backend();
    let log = EventLog::default();
    let orders = node_with(&backend, log.attach(HandlerConfig::builder("orders"))).await;

    orders.force_open();
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(!orders.force_open());

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(orders.is_half_open());
    assert_eq!(timer_transitions(&log), 1);
    assert_eq!(
        log.count(|e| matches!(e, CircuitEvent::RecoveryScheduled { .. })),
        1
    );

    tokio::time::sleep(RESET_TIMEOUT * 2).await;
    assert_eq!(timer_transitions(&log), 1);
}

#[tokio::test(start_paused = true)]
async fn close_cancels_recovery() {
    let backend = backend();
    let orders = node(&backend, "orders").await;

    orders.force_open();
    tokio::time::sleep(Duration::from_secs(5)).await;
    orders.force_close();
    assert!(!orders.recovery_pending());

    tokio::time::sleep(RESET_TIMEOUT * 2).await;
    assert!(orders.is_closed());
}

#[tokio::test(start_paused = true)]
async fn stale_timer_never_fires_into_a_later_episode() {
    let backend = backend();
    let log = EventLog::default();
    let orders = node_with(&backend, log.attach(HandlerConfig::builder("orders"))).await;

    // First episode opens at t=0 and would expire at t=30.
    orders.force_open();
    tokio::time::sleep(Duration::from_secs(10)).await;
    orders.force_close();

    // Second episode opens at t=20 and expires at t=50.
    tokio::time::sleep(Duration::from_secs(10)).await;
    orders.force_open();

    tokio::time::sleep(Duration::from_secs(15)).await;
    assert!(orders.is_open(), "first episode's timer must not fire");
    assert!(orders.recovery_pending());

    tokio::time::sleep(Duration::from_secs(16)).await;
    assert!(orders.is_half_open());
    assert_eq!(timer_transitions(&log), 1);
}

#[tokio::test(start_paused = true)]
async fn remote_open_arms_recovery_locally() {
    let backend = backend();
    let orders = node(&backend, "orders").await;

    backend
        .publish(
            &channel("orders"),
            Notification::encode(SharedState::Open, Some("gw-2")).unwrap(),
        )
        .await
        .unwrap();
    settle().await;
    assert!(orders.is_open());
    assert!(orders.recovery_pending());

    tokio::time::sleep(RESET_TIMEOUT + Duration::from_secs(1)).await;
    assert!(orders.is_half_open());
    assert!(backend.commits().is_empty());
}

#[tokio::test(start_paused = true)]
async fn half_open_trial_can_reopen() {
    let backend = backend();
    let orders = node(&backend, "orders").await;

    orders.force_open();
    tokio::time::sleep(RESET_TIMEOUT + Duration::from_secs(1)).await;
    assert!(orders.try_claim_half_open_call());

    // The trial failed: open again for another full timeout.
    assert!(orders.force_open());
    assert!(orders.recovery_pending());
    tokio::time::sleep(RESET_TIMEOUT - Duration::from_secs(1)).await;
    assert!(orders.is_open());
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(orders.is_half_open());
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_recovery() {
    let backend = backend();
    let orders = node(&backend, "orders").await;

    orders.force_open();
    orders.shutdown();
    assert!(!orders.recovery_pending());

    tokio::time::sleep(RESET_TIMEOUT * 2).await;
    assert!(orders.is_open());
}
