//! Circuit metrics regression tests.
//!
//! Every test uses its own circuit id, so they can share the global recorder.

use super::helpers::*;
use cluster_breaker::{DistributedStateHandler, HandlerConfig};
use cluster_breaker_core::{Fault, MemoryBackend, NotificationBus};
use std::sync::Arc;

async fn node(backend: &Arc<MemoryBackend>, id: &str) -> DistributedStateHandler<MemoryBackend> {
    init_recorder();
    let config = HandlerConfig::builder(id).build().unwrap();
    let node = DistributedStateHandler::start(config, Arc::clone(backend))
        .await
        .unwrap();
    node.bootstrapped().await;
    node
}

async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn transitions_are_counted_by_cause() {
    let backend = Arc::new(MemoryBackend::new());
    let node = node(&backend, "metrics-transitions").await;

    node.force_open();
    node.force_half_open();
    node.force_close();

    let labels = [("circuit", "metrics-transitions"), ("cause", "local")];
    assert_eq!(counter_value("circuitbreaker_transitions_total", &labels), 3);
    assert_eq!(
        counter_value(
            "circuitbreaker_transitions_total",
            &[("circuit", "metrics-transitions"), ("from", "open"), ("to", "half_open")]
        ),
        1
    );
}

#[tokio::test]
async fn state_gauge_tracks_local_state() {
    let backend = Arc::new(MemoryBackend::new());
    let node = node(&backend, "metrics-gauge").await;

    node.force_open();
    assert_eq!(
        gauge_value("circuitbreaker_state", &[("circuit", "metrics-gauge")]),
        Some(1.0)
    );

    node.force_half_open();
    assert_eq!(
        gauge_value("circuitbreaker_state", &[("circuit", "metrics-gauge")]),
        Some(2.0)
    );
}

#[tokio::test]
async fn notifications_are_counted_by_state() {
    let backend = Arc::new(MemoryBackend::new());
    let node = node(&backend, "metrics-notifications").await;

    backend
        .publish(node.channel(), r#"{"state":"open","origin":"peer"}"#.to_string())
        .await
        .unwrap();
    backend
        .publish(node.channel(), "garbage".to_string())
        .await
        .unwrap();
    settle().await;

    assert_eq!(
        counter_value(
            "circuitbreaker_notifications_total",
            &[("circuit", "metrics-notifications"), ("state", "open")]
        ),
        1
    );
    assert_eq!(
        counter_value(
            "circuitbreaker_notifications_total",
            &[("circuit", "metrics-notifications"), ("state", "dropped")]
        ),
        1
    );
    assert_eq!(
        counter_value(
            "circuitbreaker_transitions_total",
            &[("circuit", "metrics-notifications"), ("cause", "remote")]
        ),
        1
    );
}

#[tokio::test]
async fn propagation_failures_are_counted() {
    let backend = Arc::new(MemoryBackend::new());
    let node = node(&backend, "metrics-propagation").await;
    backend.set_fault(Fault::Writes, true);

    node.force_open();
    settle().await;

    assert_eq!(
        counter_value(
            "circuitbreaker_propagation_failures_total",
            &[("circuit", "metrics-propagation")]
        ),
        1
    );
}

#[tokio::test]
async fn lost_subscriptions_are_counted() {
    let backend = Arc::new(MemoryBackend::new());
    let node = node(&backend, "metrics-subscription").await;

    assert!(backend.close_channel(node.channel()));
    settle().await;

    assert_eq!(
        counter_value(
            "circuitbreaker_subscriptions_lost_total",
            &[("circuit", "metrics-subscription")]
        ),
        1
    );
}
