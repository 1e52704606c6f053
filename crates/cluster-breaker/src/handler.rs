//! The distributed state handler.
//!
//! Local transitions are synchronous and always succeed. Propagation to the
//! cluster (write-through plus broadcast) is best-effort: a node that cannot
//! reach the shared store still protects itself and reconverges once the
//! store or another node's notification catches up.
//!
//! Each handler owns one propagation task. Write batches are queued while the
//! circuit lock is held and committed strictly in transition order, so the
//! shared state always ends at the node's latest OPEN/CLOSED decision.

use crate::circuit::{Circuit, CircuitState, Transition};
use crate::config::HandlerConfig;
use crate::events::{CircuitEvent, TransitionCause};
use crate::timer::RecoveryTimer;
use crate::BreakerError;
use cluster_breaker_core::{
    CoordinationBackend, CoordinationError, Message, Notification, SharedState, Subscription,
    WriteBatch,
};
use futures::StreamExt;
#[cfg(feature = "metrics")]
use metrics::{counter, gauge};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
#[cfg(feature = "tracing")]
use tracing::{debug, info, warn};

/// A circuit whose OPEN/CLOSED state is shared with every node of a cluster.
///
/// Created with [`DistributedStateHandler::start`]. Dropping the handler
/// unsubscribes from the notification channel and cancels the recovery timer.
///
/// # Example
///
/// ```rust
/// use cluster_breaker::{DistributedStateHandler, HandlerConfig};
/// use cluster_breaker_core::MemoryBackend;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), cluster_breaker::BreakerError> {
/// let backend = Arc::new(MemoryBackend::new());
/// let config = HandlerConfig::builder("orders-api")
///     .reset_timeout(Duration::from_secs(10))
///     .build()?;
///
/// let breaker = DistributedStateHandler::start(config, backend).await?;
///
/// if breaker.increment_failures().await? >= 5 {
///     breaker.force_open();
/// }
/// assert!(breaker.is_open());
/// # Ok(())
/// # }
/// ```
pub struct DistributedStateHandler<B: CoordinationBackend> {
    shared: Arc<Shared<B>>,
}

type Propagation = (SharedState, WriteBatch);

struct Shared<B> {
    config: HandlerConfig,
    channel: String,
    backend: Arc<B>,
    runtime: Handle,
    circuit: Mutex<Circuit>,
    state_atomic: Arc<AtomicU8>,
    half_open_call_pending: Arc<AtomicBool>,
    bootstrap: watch::Sender<bool>,
    listener: Mutex<Option<JoinHandle<()>>>,
    /// Closed when the handler is dropped; the task drains it, then exits.
    propagation: mpsc::UnboundedSender<Propagation>,
}

impl<B: CoordinationBackend> DistributedStateHandler<B> {
    /// Subscribes to the circuit's notification channel, then bootstraps the
    /// local state from the shared store in the background.
    ///
    /// The handler is usable immediately and reports CLOSED until the
    /// bootstrap read resolves. Only a subscription failure fails startup.
    pub async fn start(config: HandlerConfig, backend: Arc<B>) -> Result<Self, BreakerError> {
        let runtime = Handle::try_current().map_err(|_| BreakerError::NoRuntime)?;
        let channel = config.channel();

        let subscription =
            backend
                .subscribe(&channel)
                .await
                .map_err(|source| BreakerError::Subscribe {
                    channel: channel.clone(),
                    source,
                })?;

        #[cfg(feature = "tracing")]
        debug!(circuit = %config.circuit_id, channel = %channel, "listening for state changes");

        let state_atomic = Arc::new(AtomicU8::new(CircuitState::Closed as u8));
        let half_open_call_pending = Arc::new(AtomicBool::new(false));
        let circuit = Circuit::new(Arc::clone(&state_atomic), Arc::clone(&half_open_call_pending));
        let (queue, pending) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            config,
            channel,
            backend,
            runtime,
            circuit: Mutex::new(circuit),
            state_atomic,
            half_open_call_pending,
            bootstrap: watch::channel(false).0,
            listener: Mutex::new(None),
            propagation: queue,
        });

        let task = shared
            .runtime
            .spawn(listen(Arc::downgrade(&shared), subscription));
        *lock(&shared.listener) = Some(task);

        shared.runtime.spawn(commit_in_order(
            Arc::clone(&shared.backend),
            Arc::downgrade(&shared),
            pending,
        ));

        let handler = Self { shared };
        handler.initial_state();
        Ok(handler)
    }

    /// Re-reads the shared canonical state and applies it locally.
    ///
    /// "open" enters OPEN (arming the recovery timer); anything else, a
    /// missing field or a read error enters CLOSED. Nothing is written or
    /// published. The result is discarded if the circuit transitioned after
    /// the read was issued. Called automatically by [`start`](Self::start).
    pub fn initial_state(&self) {
        let epoch = self.shared.lock_circuit().epoch();
        self.shared.bootstrap.send_replace(false);

        let weak = Arc::downgrade(&self.shared);
        let backend = Arc::clone(&self.shared.backend);
        let key = self.shared.config.keyspace.state_key().to_string();
        let field = self.shared.config.circuit_id.clone();

        self.shared.runtime.spawn(async move {
            let result = backend.get_field(&key, &field).await;
            if let Some(shared) = weak.upgrade() {
                shared.finish_bootstrap(epoch, result);
            }
        });
    }

    /// Waits until the latest bootstrap read has resolved.
    pub async fn bootstrapped(&self) {
        let mut done = self.shared.bootstrap.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = done.wait_for(|resolved| *resolved).await;
    }

    /// Id of the circuit.
    pub fn id(&self) -> &str {
        &self.shared.config.circuit_id
    }

    /// Duration an open circuit waits before moving to half-open.
    pub fn reset_timeout(&self) -> Duration {
        self.shared.config.reset_timeout
    }

    /// Tag attached to the notifications this handler publishes.
    pub fn origin(&self) -> &str {
        &self.shared.config.origin
    }

    /// Notification channel of the circuit.
    pub fn channel(&self) -> &str {
        &self.shared.channel
    }

    /// Current local state, without locking.
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.shared.state_atomic.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn is_half_open(&self) -> bool {
        self.state() == CircuitState::HalfOpen
    }

    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    /// Time elapsed since the last local transition.
    pub fn time_in_state(&self) -> Duration {
        self.shared.lock_circuit().time_in_state()
    }

    /// Returns true while a recovery timer is armed.
    pub fn recovery_pending(&self) -> bool {
        self.shared.lock_circuit().recovery_pending()
    }

    /// Opens the circuit locally, then writes "open" to the shared state and
    /// notifies the cluster in the background.
    ///
    /// Returns true iff the local state changed; the outcome of the
    /// write-through does not affect the result.
    pub fn force_open(&self) -> bool {
        self.shared.apply(CircuitState::Open, TransitionCause::Local)
    }

    /// Closes the circuit locally, then writes "close" to the shared state,
    /// deletes the shared failure counter and notifies the cluster in the
    /// background.
    ///
    /// Returns true iff the local state changed.
    pub fn force_close(&self) -> bool {
        self.shared.apply(CircuitState::Closed, TransitionCause::Local)
    }

    /// Moves the circuit to half-open locally. Nothing is shared.
    ///
    /// Returns false if it was already half-open.
    pub fn force_half_open(&self) -> bool {
        self.shared
            .apply(CircuitState::HalfOpen, TransitionCause::Local)
    }

    /// Atomically increments the shared failure counter and returns the new value.
    pub async fn increment_failures(&self) -> Result<i64, BreakerError> {
        let shared = &self.shared;
        shared
            .backend
            .increment_field(
                shared.config.keyspace.failures_key(),
                &shared.config.circuit_id,
                1,
            )
            .await
            .map_err(|source| BreakerError::Counter {
                circuit: shared.config.circuit_id.clone(),
                source,
            })
    }

    /// Whether a half-open trial call is in flight. Owned by the caller.
    pub fn half_open_call_pending(&self) -> bool {
        self.shared.half_open_call_pending.load(Ordering::Acquire)
    }

    /// Setting the flag is ignored while the circuit is CLOSED, where no
    /// trial call can be in flight.
    pub fn set_half_open_call_pending(&self, pending: bool) {
        self.shared
            .lock_circuit()
            .set_half_open_call_pending(pending);
    }

    /// Marks the trial call as in flight if the circuit is half-open and no
    /// trial is pending. Returns whether the caller may send the trial request.
    pub fn try_claim_half_open_call(&self) -> bool {
        self.shared.lock_circuit().claim_half_open_call()
    }

    /// Returns true while the notification listener is running.
    pub fn is_listening(&self) -> bool {
        lock(&self.shared.listener)
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Unsubscribes from the notification channel and cancels the recovery
    /// timer. Local transitions keep working but are no longer kept in sync.
    ///
    /// Write batches already queued are still committed, also when the
    /// handler is dropped.
    pub fn shutdown(&self) {
        if let Some(task) = lock(&self.shared.listener).take() {
            task.abort();
            #[cfg(feature = "tracing")]
            debug!(circuit = %self.shared.config.circuit_id, "stopped listening for state changes");
        }
        self.shared.lock_circuit().cancel_recovery();
    }
}

impl<B: CoordinationBackend> Drop for DistributedStateHandler<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<B: CoordinationBackend> std::fmt::Debug for DistributedStateHandler<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedStateHandler")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("origin", &self.origin())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn listen<B: CoordinationBackend>(shared: Weak<Shared<B>>, mut subscription: Subscription) {
    while let Some(message) = subscription.next().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        shared.on_message(message);
    }

    if let Some(shared) = shared.upgrade() {
        shared.subscription_lost();
    }
}

/// Commits queued write batches one at a time, in queue order.
async fn commit_in_order<B: CoordinationBackend>(
    backend: Arc<B>,
    shared: Weak<Shared<B>>,
    mut pending: mpsc::UnboundedReceiver<Propagation>,
) {
    while let Some((state, batch)) = pending.recv().await {
        if let Err(error) = backend.commit(batch).await {
            if let Some(shared) = shared.upgrade() {
                shared.propagation_failed(state, error);
            }
        }
    }
}

impl<B: CoordinationBackend> Shared<B> {
    fn lock_circuit(&self) -> MutexGuard<'_, Circuit> {
        lock(&self.circuit)
    }

    /// Performs a local transition. Returns true iff the state changed.
    fn apply(self: &Arc<Self>, target: CircuitState, cause: TransitionCause) -> bool {
        self.apply_guarded(target, cause, None).unwrap_or(false)
    }

    /// Performs a local transition, optionally only if the circuit is still
    /// at `expected_epoch`. Returns `None` when that guard rejected it.
    ///
    /// Entering OPEN arms the recovery timer under the same lock. Local
    /// OPEN/CLOSED transitions queue their write batch under it too, which
    /// keeps the queue in transition order. Events are emitted after the
    /// lock is released so listeners may call back into the handler.
    fn apply_guarded(
        self: &Arc<Self>,
        target: CircuitState,
        cause: TransitionCause,
        expected_epoch: Option<u64>,
    ) -> Option<bool> {
        let (transition, unsent) = {
            let mut circuit = self.lock_circuit();
            if expected_epoch.is_some_and(|epoch| epoch != circuit.epoch()) {
                return None;
            }
            let transition = match target {
                CircuitState::Open => circuit.open_state(),
                CircuitState::Closed => circuit.close_state(),
                CircuitState::HalfOpen => circuit.half_open_state(),
            };
            let mut unsent = None;
            if let Some(t) = transition {
                if t.to == CircuitState::Open {
                    circuit.arm_recovery(self.schedule_recovery(t.epoch));
                }
                if cause == TransitionCause::Local {
                    unsent = self.propagate(t.to).err();
                }
            }
            (transition, unsent)
        };

        let changed = match transition {
            Some(transition) => {
                self.record(transition, cause);
                true
            }
            None => false,
        };
        if let Some((state, error)) = unsent {
            self.propagation_failed(state, error);
        }
        Some(changed)
    }

    fn schedule_recovery(self: &Arc<Self>, epoch: u64) -> RecoveryTimer {
        let weak = Arc::downgrade(self);
        RecoveryTimer::schedule(&self.runtime, self.config.reset_timeout, move || {
            if let Some(shared) = weak.upgrade() {
                // The epoch only still matches if nothing moved the circuit
                // out of the OPEN episode this timer was armed for.
                shared.apply_guarded(CircuitState::HalfOpen, TransitionCause::Timer, Some(epoch));
            }
        })
    }

    fn record(&self, transition: Transition, cause: TransitionCause) {
        let id = &self.config.circuit_id;

        #[cfg(feature = "tracing")]
        info!(
            circuit = %id,
            from = transition.from.as_str(),
            to = transition.to.as_str(),
            cause = cause.as_str(),
            "circuit state transition"
        );

        #[cfg(feature = "metrics")]
        {
            counter!(
                "circuitbreaker_transitions_total",
                "circuit" => id.clone(),
                "from" => transition.from.as_str(),
                "to" => transition.to.as_str(),
                "cause" => cause.as_str()
            )
            .increment(1);
            gauge!("circuitbreaker_state", "circuit" => id.clone())
                .set(transition.to as u8 as f64);
        }

        self.config
            .event_listeners
            .emit(&CircuitEvent::StateTransition {
                circuit_id: id.clone(),
                timestamp: Instant::now(),
                from_state: transition.from,
                to_state: transition.to,
                cause,
            });

        if transition.to == CircuitState::Open {
            self.config
                .event_listeners
                .emit(&CircuitEvent::RecoveryScheduled {
                    circuit_id: id.clone(),
                    timestamp: Instant::now(),
                    after: self.config.reset_timeout,
                });
        }
    }

    /// Queues the write-through and broadcast of a local transition into
    /// `to`. HALF_OPEN is never shared.
    fn propagate(&self, to: CircuitState) -> Result<(), (SharedState, CoordinationError)> {
        let state = match to {
            CircuitState::Open => SharedState::Open,
            CircuitState::Closed => SharedState::Close,
            CircuitState::HalfOpen => return Ok(()),
        };
        let id = &self.config.circuit_id;

        #[cfg(feature = "tracing")]
        debug!(circuit = %id, state = state.as_str(), "notifying cluster");

        let payload =
            Notification::encode(state, Some(&self.config.origin)).map_err(|error| (state, error))?;

        let keys = &self.config.keyspace;
        let mut batch = WriteBatch::new().set_field(keys.state_key(), id.as_str(), state.as_str());
        if state == SharedState::Close {
            batch = batch.delete_field(keys.failures_key(), id.as_str());
        }
        let batch = batch.publish(self.channel.as_str(), payload);

        self.propagation.send((state, batch)).map_err(|_| {
            (
                state,
                CoordinationError::Unavailable("propagation task stopped".to_string()),
            )
        })
    }

    fn propagation_failed(&self, state: SharedState, error: CoordinationError) {
        let id = &self.config.circuit_id;

        #[cfg(feature = "tracing")]
        warn!(circuit = %id, state = state.as_str(), error = %error, "failed to propagate circuit state");

        #[cfg(feature = "metrics")]
        counter!("circuitbreaker_propagation_failures_total", "circuit" => id.clone())
            .increment(1);

        self.config
            .event_listeners
            .emit(&CircuitEvent::PropagationFailed {
                circuit_id: id.clone(),
                timestamp: Instant::now(),
                state,
                error,
            });
    }

    fn on_message(self: &Arc<Self>, message: Message) {
        if message.channel != self.channel {
            self.drop_notification(format!("unexpected channel {}", message.channel));
            return;
        }

        let notification = Notification::decode(&message.payload);
        if notification.origin() == Some(self.config.origin.as_str()) {
            return;
        }

        let (state, target) = match notification {
            Notification::Open { .. } => (SharedState::Open, CircuitState::Open),
            Notification::Close { .. } => (SharedState::Close, CircuitState::Closed),
            Notification::Unknown { reason } => {
                self.drop_notification(reason);
                return;
            }
        };

        #[cfg(feature = "tracing")]
        debug!(circuit = %self.config.circuit_id, state = state.as_str(), "notification received");

        #[cfg(feature = "metrics")]
        counter!(
            "circuitbreaker_notifications_total",
            "circuit" => self.config.circuit_id.clone(),
            "state" => state.as_str()
        )
        .increment(1);

        let applied = self.apply(target, TransitionCause::Remote);
        self.config
            .event_listeners
            .emit(&CircuitEvent::NotificationReceived {
                circuit_id: self.config.circuit_id.clone(),
                timestamp: Instant::now(),
                state,
                applied,
            });
    }

    fn subscription_lost(&self) {
        let error = CoordinationError::SubscriptionClosed(self.channel.clone());

        #[cfg(feature = "tracing")]
        warn!(circuit = %self.config.circuit_id, error = %error, "notification subscription ended");

        #[cfg(feature = "metrics")]
        counter!("circuitbreaker_subscriptions_lost_total", "circuit" => self.config.circuit_id.clone())
            .increment(1);

        self.config
            .event_listeners
            .emit(&CircuitEvent::SubscriptionLost {
                circuit_id: self.config.circuit_id.clone(),
                timestamp: Instant::now(),
                error,
            });
    }

    fn drop_notification(&self, reason: String) {
        #[cfg(feature = "tracing")]
        warn!(circuit = %self.config.circuit_id, reason = %reason, "dropping notification");

        #[cfg(feature = "metrics")]
        counter!(
            "circuitbreaker_notifications_total",
            "circuit" => self.config.circuit_id.clone(),
            "state" => "dropped"
        )
        .increment(1);

        self.config
            .event_listeners
            .emit(&CircuitEvent::NotificationDropped {
                circuit_id: self.config.circuit_id.clone(),
                timestamp: Instant::now(),
                reason,
            });
    }

    fn finish_bootstrap(
        self: &Arc<Self>,
        epoch: u64,
        result: Result<Option<String>, CoordinationError>,
    ) {
        let shared_state = match result {
            Ok(value) => value.as_deref().and_then(SharedState::from_field),
            Err(_error) => {
                #[cfg(feature = "tracing")]
                warn!(circuit = %self.config.circuit_id, error = %_error, "could not read shared circuit state, assuming closed");
                None
            }
        };

        let target = match shared_state {
            Some(SharedState::Open) => CircuitState::Open,
            _ => CircuitState::Closed,
        };
        let applied = self
            .apply_guarded(target, TransitionCause::Bootstrap, Some(epoch))
            .is_some();

        #[cfg(feature = "tracing")]
        if !applied {
            debug!(circuit = %self.config.circuit_id, "discarding stale bootstrap read");
        }

        self.config
            .event_listeners
            .emit(&CircuitEvent::BootstrapCompleted {
                circuit_id: self.config.circuit_id.clone(),
                timestamp: Instant::now(),
                shared_state,
                applied,
            });
        self.bootstrap.send_replace(true);
    }
}
