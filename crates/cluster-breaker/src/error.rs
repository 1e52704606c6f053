use cluster_breaker_core::CoordinationError;
use thiserror::Error;

/// Errors returned by a distributed circuit handler.
///
/// Coordination failures after a local transition are never returned; they
/// are logged and reported through [`CircuitEvent::PropagationFailed`].
///
/// [`CircuitEvent::PropagationFailed`]: crate::CircuitEvent::PropagationFailed
#[derive(Debug, Error)]
pub enum BreakerError {
    /// Subscribing to the circuit's notification channel failed; the handler was not created.
    #[error("failed to subscribe to {channel}: {source}")]
    Subscribe {
        channel: String,
        #[source]
        source: CoordinationError,
    },

    /// The shared failure counter could not be incremented.
    #[error("failed to increment failure counter of circuit {circuit}: {source}")]
    Counter {
        circuit: String,
        #[source]
        source: CoordinationError,
    },

    /// The handler configuration is invalid.
    #[error("invalid circuit configuration: {0}")]
    InvalidConfig(String),

    /// The handler was started outside of a tokio runtime.
    #[error("circuit handlers must be started inside a tokio runtime")]
    NoRuntime,
}

impl BreakerError {
    /// Returns the underlying coordination error, if any.
    pub fn coordination(&self) -> Option<&CoordinationError> {
        match self {
            BreakerError::Subscribe { source, .. } | BreakerError::Counter { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }

    /// Returns true if the coordination layer was at fault.
    pub fn is_coordination_failure(&self) -> bool {
        self.coordination().is_some()
    }
}
