//! Two gateway nodes sharing one circuit.
//! Run with: RUST_LOG=debug cargo run --example two_gateways

use cluster_breaker::{CircuitRegistry, TransitionCause};
use cluster_breaker_core::MemoryBackend;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const FAILURE_THRESHOLD: i64 = 3;

#[tokio::main]
async fn main() -> Result<(), cluster_breaker::BreakerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Both nodes talk to the same store, as they would to a shared server.
    let backend = Arc::new(MemoryBackend::new());

    let gateway = |name: &'static str| {
        CircuitRegistry::new(Arc::clone(&backend))
            .with_reset_timeout(Duration::from_secs(1))
            .on_event(move |event| println!("[{name}] {event:?}"))
    };
    let gw1 = gateway("gw-1");
    let gw2 = gateway("gw-2");

    let orders1 = gw1.get_or_start("orders-api").await?;
    let orders2 = gw2.get_or_start("orders-api").await?;
    orders1.bootstrapped().await;
    orders2.bootstrapped().await;

    // Failures observed on either node count towards the same threshold.
    for node in [&orders1, &orders2, &orders1] {
        let failures = node.increment_failures().await?;
        println!("failures so far: {failures}");
        if failures >= FAILURE_THRESHOLD {
            node.force_open();
        }
    }

    sleep(Duration::from_millis(50)).await;
    println!("gw-1: {}, gw-2: {}", orders1.state(), orders2.state());

    // Both nodes move to half-open on their own once the timeout expires.
    sleep(Duration::from_millis(1100)).await;
    println!("gw-1: {}, gw-2: {}", orders1.state(), orders2.state());

    // gw-2 wins the trial request, and it succeeds.
    if orders2.try_claim_half_open_call() {
        orders2.force_close();
    }
    sleep(Duration::from_millis(50)).await;
    println!("gw-1: {}, gw-2: {}", orders1.state(), orders2.state());

    // A third node joining now starts closed.
    let gw3 = CircuitRegistry::new(Arc::clone(&backend)).with_reset_timeout(Duration::from_secs(1));
    let orders3 = gw3.get_or_start_with("orders-api", |b| {
        b.on_state_transition(|from, to, cause| {
            if cause == TransitionCause::Remote {
                println!("[gw-3] remote {from} -> {to}");
            }
        })
    })
    .await?;
    orders3.bootstrapped().await;
    println!("gw-3 joined as {}", orders3.state());

    gw1.shutdown().await;
    gw2.shutdown().await;
    gw3.shutdown().await;
    Ok(())
}
