//! Startup read of the shared state.

use super::*;
use cluster_breaker::{CircuitEvent, CircuitState, TransitionCause};
use cluster_breaker_core::{Fault, SharedState};

fn bootstrap_result(log: &EventLog) -> Option<(Option<SharedState>, bool)> {
    log.events().into_iter().find_map(|event| match event {
        CircuitEvent::BootstrapCompleted {
            shared_state,
            applied,
            ..
        } => Some((shared_state, applied)),
        _ => None,
    })
}

#[tokio::test]
async fn adopts_shared_open_without_writing() {
    let backend = backend();
    backend.seed_field(STATE_KEY, "orders", "open");
    let log = EventLog::default();

    let orders = node_with(&backend, log.attach(HandlerConfig::builder("orders"))).await;
    settle().await;

    assert!(orders.is_open());
    assert!(orders.recovery_pending());
    assert!(backend.commits().is_empty());
    assert!(backend.published().is_empty());
    assert_eq!(bootstrap_result(&log), Some((Some(SharedState::Open), true)));
    assert_eq!(
        log.count(|e| matches!(
            e,
            CircuitEvent::StateTransition {
                cause: TransitionCause::Bootstrap,
                to_state: CircuitState::Open,
                ..
            }
        )),
        1
    );
}

#[tokio::test]
async fn shared_close_stays_closed() {
    let backend = backend();
    backend.seed_field(STATE_KEY, "orders", "close");
    let log = EventLog::default();

    let orders = node_with(&backend, log.attach(HandlerConfig::builder("orders"))).await;

    assert!(orders.is_closed());
    assert_eq!(bootstrap_result(&log), Some((Some(SharedState::Close), true)));
}

#[tokio::test]
async fn unknown_value_reads_as_closed() {
    let backend = backend();
    backend.seed_field(STATE_KEY, "orders", "OPEN");
    let log = EventLog::default();

    let orders = node_with(&backend, log.attach(HandlerConfig::builder("orders"))).await;

    assert!(orders.is_closed());
    assert_eq!(bootstrap_result(&log), Some((None, true)));
}

#[tokio::test]
async fn read_failure_reads_as_closed() {
    let backend = backend();
    backend.seed_field(STATE_KEY, "orders", "open");
    backend.set_fault(Fault::Reads, true);
    let log = EventLog::default();

    let orders = node_with(&backend, log.attach(HandlerConfig::builder("orders"))).await;

    assert!(orders.is_closed());
    assert!(orders.is_listening());
    assert_eq!(bootstrap_result(&log), Some((None, true)));
}

#[tokio::test]
async fn other_circuits_do_not_leak_in() {
    let backend = backend();
    backend.seed_field(STATE_KEY, "billing", "open");

    let orders = node(&backend, "orders").await;
    assert!(orders.is_closed());
}

#[tokio::test]
async fn late_read_does_not_override_fresher_transition() {
    let backend = backend();
    backend.seed_field(STATE_KEY, "orders", "close");
    let log = EventLog::default();

    let config = log
        .attach(HandlerConfig::builder("orders"))
        .reset_timeout(RESET_TIMEOUT)
        .build()
        .unwrap();
    let orders = DistributedStateHandler::start(config, Arc::clone(&backend))
        .await
        .unwrap();

    // Nothing has yielded to the bootstrap read yet.
    assert!(orders.force_open());
    orders.bootstrapped().await;

    assert!(orders.is_open());
    assert_eq!(bootstrap_result(&log), Some((Some(SharedState::Close), false)));
}

#[tokio::test]
async fn initial_state_can_be_reread() {
    let backend = backend();
    let orders = node(&backend, "orders").await;
    assert!(orders.is_closed());

    backend.seed_field(STATE_KEY, "orders", "open");
    orders.initial_state();
    orders.bootstrapped().await;
    assert!(orders.is_open());

    backend.seed_field(STATE_KEY, "orders", "close");
    orders.initial_state();
    orders.bootstrapped().await;
    assert!(orders.is_closed());
    assert!(backend.commits().is_empty());
}
