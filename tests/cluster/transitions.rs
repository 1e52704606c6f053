//! Local transitions and their write-through.

use super::*;
use cluster_breaker::{BreakerError, CircuitEvent, CircuitState};
use cluster_breaker_core::{Fault, Notification, SharedState, WriteOp};

#[tokio::test]
async fn starts_closed_with_empty_store() {
    let backend = backend();
    let orders = node(&backend, "orders").await;

    assert_eq!(orders.state(), CircuitState::Closed);
    assert!(orders.is_closed());
    assert!(!orders.recovery_pending());
    assert!(orders.is_listening());
    assert_eq!(orders.channel(), channel("orders"));
    assert!(backend.commits().is_empty());
}

#[tokio::test]
async fn force_open_writes_through_and_broadcasts() {
    let backend = backend();
    let orders = node(&backend, "orders").await;

    assert!(orders.force_open());
    assert!(orders.is_open());
    assert!(orders.recovery_pending());
    settle().await;

    assert_eq!(backend.field(STATE_KEY, "orders").as_deref(), Some("open"));

    let commits = backend.commits();
    assert_eq!(commits.len(), 1);
    let ops = commits[0].ops();
    assert_eq!(
        ops[0],
        WriteOp::SetField {
            key: STATE_KEY.to_string(),
            field: "orders".to_string(),
            value: "open".to_string(),
        }
    );
    match &ops[1] {
        WriteOp::Publish { channel: ch, payload } => {
            assert_eq!(ch, &channel("orders"));
            let notification = Notification::decode(payload);
            assert_eq!(notification.state(), Some(SharedState::Open));
            assert_eq!(notification.origin(), Some(orders.origin()));
        }
        other => panic!("expected publish, got {other:?}"),
    }
    assert_eq!(ops.len(), 2);
}

#[tokio::test]
async fn force_close_resets_shared_counter() {
    let backend = backend();
    let orders = node(&backend, "orders").await;

    assert_eq!(orders.increment_failures().await.unwrap(), 1);
    assert_eq!(orders.increment_failures().await.unwrap(), 2);
    orders.force_open();
    settle().await;
    backend.clear_journal();

    assert!(orders.force_close());
    assert!(orders.is_closed());
    assert!(!orders.recovery_pending());
    settle().await;

    assert_eq!(backend.field(STATE_KEY, "orders").as_deref(), Some("close"));
    assert_eq!(backend.field(FAILURES_KEY, "orders"), None);

    let commits = backend.commits();
    assert_eq!(commits.len(), 1);
    let ops = commits[0].ops();
    assert_eq!(ops.len(), 3);
    assert!(matches!(&ops[1], WriteOp::DeleteField { key, field } if key == FAILURES_KEY && field == "orders"));
    assert!(matches!(&ops[2], WriteOp::Publish { .. }));

    // The counter starts over after a close.
    assert_eq!(orders.increment_failures().await.unwrap(), 1);
}

#[tokio::test]
async fn redundant_force_calls_write_nothing() {
    let backend = backend();
    let orders = node(&backend, "orders").await;

    assert!(!orders.force_close());
    settle().await;
    assert!(backend.commits().is_empty());
    assert!(backend.published().is_empty());

    assert!(orders.force_open());
    assert!(!orders.force_open());
    settle().await;
    assert_eq!(backend.commits().len(), 1);
    assert_eq!(backend.published().len(), 1);
}

#[tokio::test]
async fn half_open_is_never_shared() {
    let backend = backend();
    let orders = node(&backend, "orders").await;

    assert!(orders.force_half_open());
    assert!(orders.is_half_open());
    assert!(!orders.force_half_open());
    settle().await;

    assert!(backend.commits().is_empty());
    assert_eq!(backend.field(STATE_KEY, "orders"), None);
}

#[tokio::test]
async fn half_open_from_open_cancels_recovery() {
    let backend = backend();
    let orders = node(&backend, "orders").await;

    orders.force_open();
    assert!(orders.recovery_pending());
    assert!(orders.force_half_open());
    assert!(!orders.recovery_pending());
}

#[tokio::test]
async fn trial_call_flag() {
    let backend = backend();
    let orders = node(&backend, "orders").await;

    assert!(!orders.try_claim_half_open_call());

    orders.force_half_open();
    assert!(orders.try_claim_half_open_call());
    assert!(orders.half_open_call_pending());
    assert!(!orders.try_claim_half_open_call());

    orders.set_half_open_call_pending(false);
    assert!(orders.try_claim_half_open_call());

    orders.force_close();
    assert!(!orders.half_open_call_pending());
}

#[tokio::test]
async fn closed_circuit_never_reports_a_pending_trial() {
    let backend = backend();
    let orders = Arc::new(node(&backend, "orders").await);

    orders.set_half_open_call_pending(true);
    assert!(!orders.half_open_call_pending());

    // A caller marking its trial in flight from another thread while the
    // circuit keeps closing must not leave the flag behind.
    let worker = Arc::clone(&orders);
    let marker = std::thread::spawn(move || {
        for _ in 0..2000 {
            worker.set_half_open_call_pending(true);
        }
    });
    for _ in 0..500 {
        orders.force_half_open();
        orders.force_close();
    }
    marker.join().unwrap();

    assert!(orders.is_closed());
    assert!(!orders.half_open_call_pending());
}

#[tokio::test]
async fn counter_failure_is_reported() {
    let backend = backend();
    let orders = node(&backend, "orders").await;
    backend.set_fault(Fault::Counters, true);

    let err = orders.increment_failures().await.unwrap_err();
    assert!(matches!(err, BreakerError::Counter { ref circuit, .. } if circuit == "orders"));
    assert!(err.is_coordination_failure());
}

#[tokio::test]
async fn non_integer_counter_is_an_error() {
    let backend = backend();
    let orders = node(&backend, "orders").await;
    backend.seed_field(FAILURES_KEY, "orders", "many");

    let err = orders.increment_failures().await.unwrap_err();
    assert!(!err.coordination().unwrap().is_transient());
}

#[tokio::test]
async fn failed_write_through_keeps_local_state() {
    let backend = backend();
    let log = EventLog::default();
    let orders = node_with(&backend, log.attach(HandlerConfig::builder("orders"))).await;
    backend.set_fault(Fault::Writes, true);

    assert!(orders.force_open());
    settle().await;

    assert!(orders.is_open());
    assert_eq!(backend.field(STATE_KEY, "orders"), None);
    assert_eq!(
        log.count(|e| matches!(
            e,
            CircuitEvent::PropagationFailed {
                state: SharedState::Open,
                ..
            }
        )),
        1
    );
}

#[tokio::test]
async fn handles_outside_the_runtime_thread() {
    let backend = backend();
    let orders = Arc::new(node(&backend, "orders").await);

    let worker = Arc::clone(&orders);
    std::thread::spawn(move || {
        assert!(worker.force_open());
    })
    .join()
    .unwrap();
    settle().await;

    assert!(orders.is_open());
    assert_eq!(backend.field(STATE_KEY, "orders").as_deref(), Some("open"));
}
