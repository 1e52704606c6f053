//! Cluster-coherent circuit breaker for API gateways.
//!
//! Every gateway node keeps a local copy of each circuit's state so routing
//! decisions never wait on the network. When a node opens or closes a
//! circuit it writes the new state to a shared store and broadcasts it; the
//! other nodes apply the broadcast to their local copy. A node that starts
//! later reads the shared state once to catch up.
//!
//! ## States
//! - **Closed**: requests pass through
//! - **Open**: the backend is tripped; requests are rejected by the caller
//! - **Half-Open**: one trial request may go through
//!
//! Only OPEN and CLOSED are shared. HALF_OPEN is reached locally, either via
//! [`DistributedStateHandler::force_half_open`] or when the recovery timer of
//! an open circuit expires.
//!
//! ## Usage
//!
//! ```rust
//! use cluster_breaker::{CircuitState, DistributedStateHandler, HandlerConfig};
//! use cluster_breaker_core::MemoryBackend;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), cluster_breaker::BreakerError> {
//! let backend = Arc::new(MemoryBackend::new());
//!
//! let config = HandlerConfig::builder("orders-api")
//!     .reset_timeout(Duration::from_secs(30))
//!     .on_state_transition(|from, to, cause| {
//!         println!("orders-api: {from} -> {to} ({})", cause.as_str());
//!     })
//!     .build()?;
//!
//! let breaker = DistributedStateHandler::start(config, backend).await?;
//! breaker.bootstrapped().await;
//!
//! // The caller owns the failure policy; the handler only counts.
//! if breaker.increment_failures().await? >= 5 {
//!     breaker.force_open();
//! }
//!
//! if breaker.state() == CircuitState::HalfOpen && breaker.try_claim_half_open_call() {
//!     // send the trial request, then force_close() or force_open()
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Backends
//!
//! The shared store and the notification bus are abstracted by the traits in
//! [`cluster_breaker_core`]. [`MemoryBackend`](cluster_breaker_core::MemoryBackend)
//! implements them in-process, which is enough for tests and for several
//! handlers sharing one process.
//!
//! ## Feature Flags
//! - `tracing` (default): structured logs via the `tracing` crate
//! - `metrics`: counters and gauges via the `metrics` crate
//! - `serde`: `Serialize`/`Deserialize` for [`CircuitState`]

#[cfg(feature = "metrics")]
use metrics::{describe_counter, describe_gauge};
#[cfg(feature = "metrics")]
use std::sync::Once;

pub use circuit::CircuitState;
pub use config::{HandlerConfig, HandlerConfigBuilder, DEFAULT_RESET_TIMEOUT};
pub use error::BreakerError;
pub use events::{CircuitEvent, TransitionCause};
pub use handler::DistributedStateHandler;
pub use registry::CircuitRegistry;

pub use cluster_breaker_core;

mod circuit;
mod config;
mod error;
mod events;
mod handler;
mod registry;
mod timer;

#[cfg(feature = "metrics")]
static METRICS_INIT: Once = Once::new();

/// Registers metric descriptions with the installed recorder, once.
pub(crate) fn describe_metrics() {
    #[cfg(feature = "metrics")]
    {
        METRICS_INIT.call_once(|| {
            describe_counter!(
                "circuitbreaker_transitions_total",
                "Total number of local circuit state transitions"
            );
            describe_gauge!(
                "circuitbreaker_state",
                "Current local state of the circuit (0 closed, 1 open, 2 half-open)"
            );
            describe_counter!(
                "circuitbreaker_notifications_total",
                "Total number of state-change notifications received from the cluster"
            );
            describe_counter!(
                "circuitbreaker_propagation_failures_total",
                "Total number of failed write-through or broadcast attempts"
            );
            describe_counter!(
                "circuitbreaker_subscriptions_lost_total",
                "Total number of notification subscriptions that ended"
            );
        });
    }
}
