use crate::CircuitState;
use cluster_breaker_core::{ClusterEvent, CoordinationError, SharedState};
use std::time::{Duration, Instant};

/// What caused a local transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionCause {
    /// A `force_*` call on this node.
    Local,
    /// A notification from another node.
    Remote,
    /// Expiry of the recovery timer.
    Timer,
    /// The startup read of the shared state.
    Bootstrap,
}

impl TransitionCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionCause::Local => "local",
            TransitionCause::Remote => "remote",
            TransitionCause::Timer => "timer",
            TransitionCause::Bootstrap => "bootstrap",
        }
    }
}

/// Events emitted by a distributed circuit handler.
#[derive(Debug, Clone)]
pub enum CircuitEvent {
    /// The local state changed.
    StateTransition {
        circuit_id: String,
        timestamp: Instant,
        from_state: CircuitState,
        to_state: CircuitState,
        cause: TransitionCause,
    },
    /// A recovery timer was armed.
    RecoveryScheduled {
        circuit_id: String,
        timestamp: Instant,
        after: Duration,
    },
    /// A state-change notification from another node was processed.
    NotificationReceived {
        circuit_id: String,
        timestamp: Instant,
        state: SharedState,
        /// False when the circuit was already in the announced state.
        applied: bool,
    },
    /// A notification was discarded.
    NotificationDropped {
        circuit_id: String,
        timestamp: Instant,
        reason: String,
    },
    /// Writing through or broadcasting a local transition failed.
    PropagationFailed {
        circuit_id: String,
        timestamp: Instant,
        state: SharedState,
        error: CoordinationError,
    },
    /// The notification subscription ended. The node keeps working locally
    /// but no longer follows the cluster.
    SubscriptionLost {
        circuit_id: String,
        timestamp: Instant,
        error: CoordinationError,
    },
    /// The startup read of the shared state resolved.
    BootstrapCompleted {
        circuit_id: String,
        timestamp: Instant,
        /// Shared state that was read; `None` when absent or on error.
        shared_state: Option<SharedState>,
        /// False when a fresher transition made the read stale.
        applied: bool,
    },
}

impl ClusterEvent for CircuitEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CircuitEvent::StateTransition { .. } => "state_transition",
            CircuitEvent::RecoveryScheduled { .. } => "recovery_scheduled",
            CircuitEvent::NotificationReceived { .. } => "notification_received",
            CircuitEvent::NotificationDropped { .. } => "notification_dropped",
            CircuitEvent::PropagationFailed { .. } => "propagation_failed",
            CircuitEvent::SubscriptionLost { .. } => "subscription_lost",
            CircuitEvent::BootstrapCompleted { .. } => "bootstrap_completed",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            CircuitEvent::StateTransition { timestamp, .. }
            | CircuitEvent::RecoveryScheduled { timestamp, .. }
            | CircuitEvent::NotificationReceived { timestamp, .. }
            | CircuitEvent::NotificationDropped { timestamp, .. }
            | CircuitEvent::PropagationFailed { timestamp, .. }
            | CircuitEvent::SubscriptionLost { timestamp, .. }
            | CircuitEvent::BootstrapCompleted { timestamp, .. } => *timestamp,
        }
    }

    fn circuit_id(&self) -> &str {
        match self {
            CircuitEvent::StateTransition { circuit_id, .. }
            | CircuitEvent::RecoveryScheduled { circuit_id, .. }
            | CircuitEvent::NotificationReceived { circuit_id, .. }
            | CircuitEvent::NotificationDropped { circuit_id, .. }
            | CircuitEvent::PropagationFailed { circuit_id, .. }
            | CircuitEvent::SubscriptionLost { circuit_id, .. }
            | CircuitEvent::BootstrapCompleted { circuit_id, .. } => circuit_id,
        }
    }
}
