use crate::events::{CircuitEvent, TransitionCause};
use crate::{BreakerError, CircuitState};
use cluster_breaker_core::{CoordinationError, EventListeners, FnListener, Keyspace, SharedState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;
use uuid::Uuid;

static NEXT_HANDLER: AtomicU64 = AtomicU64::new(1);
static PROCESS_TAG: OnceLock<Uuid> = OnceLock::new();

/// Default time an open circuit waits before attempting recovery.
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(30);

/// Returns a cluster-unique origin tag for the next handler of this process.
///
/// Pids and start order repeat across nodes (every container is pid 1), so
/// a random per-process tag tells the nodes apart.
fn next_origin() -> String {
    let process = PROCESS_TAG.get_or_init(Uuid::new_v4);
    origin_tag(
        std::process::id(),
        process,
        NEXT_HANDLER.fetch_add(1, Ordering::Relaxed),
    )
}

fn origin_tag(pid: u32, process: &Uuid, sequence: u64) -> String {
    format!("{pid}-{}-{sequence}", process.simple())
}

/// Configuration of one distributed circuit.
#[derive(Clone)]
pub struct HandlerConfig {
    pub(crate) circuit_id: String,
    pub(crate) reset_timeout: Duration,
    pub(crate) keyspace: Keyspace,
    pub(crate) origin: String,
    pub(crate) event_listeners: EventListeners<CircuitEvent>,
}

impl HandlerConfig {
    /// Starts configuring the circuit identified by `circuit_id`.
    ///
    /// The id must be identical on every node protecting the same endpoint.
    pub fn builder(circuit_id: impl Into<String>) -> HandlerConfigBuilder {
        crate::describe_metrics();
        HandlerConfigBuilder::new(circuit_id.into())
    }

    pub fn circuit_id(&self) -> &str {
        &self.circuit_id
    }

    pub fn reset_timeout(&self) -> Duration {
        self.reset_timeout
    }

    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    /// Tag this handler attaches to the notifications it publishes.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Notification channel of this circuit.
    pub fn channel(&self) -> String {
        self.keyspace.channel(&self.circuit_id)
    }
}

impl std::fmt::Debug for HandlerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerConfig")
            .field("circuit_id", &self.circuit_id)
            .field("reset_timeout", &self.reset_timeout)
            .field("keyspace", &self.keyspace)
            .field("origin", &self.origin)
            .field("event_listeners", &self.event_listeners.len())
            .finish()
    }
}

/// Builder for [`HandlerConfig`].
pub struct HandlerConfigBuilder {
    circuit_id: String,
    reset_timeout: Duration,
    keyspace: Keyspace,
    origin: Option<String>,
    event_listeners: EventListeners<CircuitEvent>,
}

impl HandlerConfigBuilder {
    fn new(circuit_id: String) -> Self {
        Self {
            circuit_id,
            reset_timeout: DEFAULT_RESET_TIMEOUT,
            keyspace: Keyspace::default(),
            origin: None,
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets how long the circuit stays open before moving to half-open.
    ///
    /// Default: 30 seconds
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Sets the shared key and channel names.
    ///
    /// Default: [`Keyspace::default()`]
    pub fn keyspace(mut self, keyspace: Keyspace) -> Self {
        self.keyspace = keyspace;
        self
    }

    /// Sets the tag attached to published notifications.
    ///
    /// Notifications carrying this handler's own tag are ignored on receipt.
    /// Default: `<pid>-<random process tag>-<sequence>`, unique across the
    /// cluster. Only override it with something that is too.
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Adds every listener of `listeners`, e.g. defaults shared by a registry.
    pub fn listeners(mut self, listeners: &EventListeners<CircuitEvent>) -> Self {
        self.event_listeners.extend(listeners);
        self
    }

    /// Registers a callback for every event.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&CircuitEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(f));
        self
    }

    /// Registers a callback for local state transitions.
    ///
    /// # Example
    /// ```rust
    /// use cluster_breaker::{CircuitState, HandlerConfig, TransitionCause};
    ///
    /// let config = HandlerConfig::builder("orders-api")
    ///     .on_state_transition(|from, to, cause| {
    ///         if to == CircuitState::Open && cause == TransitionCause::Remote {
    ///             println!("another gateway tripped orders-api ({from} -> {to})");
    ///         }
    ///     })
    ///     .build()
    ///     .unwrap();
    /// # let _ = config;
    /// ```
    pub fn on_state_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(CircuitState, CircuitState, TransitionCause) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CircuitEvent| {
                if let CircuitEvent::StateTransition {
                    from_state,
                    to_state,
                    cause,
                    ..
                } = event
                {
                    f(*from_state, *to_state, *cause);
                }
            }));
        self
    }

    /// Registers a callback for discarded notifications; receives the reason.
    pub fn on_notification_dropped<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CircuitEvent| {
                if let CircuitEvent::NotificationDropped { reason, .. } = event {
                    f(reason);
                }
            }));
        self
    }

    /// Registers a callback for failed write-through or broadcast.
    pub fn on_propagation_failed<F>(mut self, f: F) -> Self
    where
        F: Fn(SharedState, &CoordinationError) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CircuitEvent| {
                if let CircuitEvent::PropagationFailed { state, error, .. } = event {
                    f(*state, error);
                }
            }));
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<HandlerConfig, BreakerError> {
        if self.circuit_id.is_empty() {
            return Err(BreakerError::InvalidConfig(
                "circuit id must not be empty".to_string(),
            ));
        }
        if let Some(component) = self.keyspace.first_empty_component() {
            return Err(BreakerError::InvalidConfig(format!(
                "keyspace {component} must not be empty"
            )));
        }
        let origin = match self.origin {
            Some(origin) if origin.is_empty() => {
                return Err(BreakerError::InvalidConfig(
                    "origin must not be empty".to_string(),
                ))
            }
            Some(origin) => origin,
            None => next_origin(),
        };

        Ok(HandlerConfig {
            circuit_id: self.circuit_id,
            reset_timeout: self.reset_timeout,
            keyspace: self.keyspace,
            origin,
            event_listeners: self.event_listeners,
        })
    }
}
