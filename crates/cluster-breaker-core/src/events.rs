//! Event plumbing shared by every circuit in a gateway process.
//!
//! Handlers emit events for local transitions, remote notifications and
//! propagation failures. Listeners are plain callbacks registered at
//! configuration time; they run inline on the emitting thread.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// An event emitted on behalf of one circuit.
pub trait ClusterEvent: Send + Sync + fmt::Debug {
    /// Short, stable name of the event kind (e.g. `"state_transition"`).
    fn event_type(&self) -> &'static str;

    /// When the event was raised.
    fn timestamp(&self) -> Instant;

    /// Id of the circuit the event belongs to.
    fn circuit_id(&self) -> &str;
}

/// Receives events of type `E`.
pub trait EventListener<E: ClusterEvent>: Send + Sync {
    /// Called once per emitted event.
    fn on_event(&self, event: &E);
}

/// Type alias for shared event listeners.
pub type BoxedEventListener<E> = Arc<dyn EventListener<E>>;

/// An ordered set of listeners.
///
/// Cloning is cheap: listeners are reference counted, so a registry can hand
/// the same set to every circuit it creates.
#[derive(Clone)]
pub struct EventListeners<E: ClusterEvent> {
    listeners: Vec<BoxedEventListener<E>>,
}

impl<E: ClusterEvent> EventListeners<E> {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Appends a listener.
    pub fn add<L>(&mut self, listener: L)
    where
        L: EventListener<E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Appends every listener of `other`, keeping their order.
    pub fn extend(&mut self, other: &EventListeners<E>) {
        self.listeners.extend(other.listeners.iter().cloned());
    }

    /// Delivers `event` to every listener.
    ///
    /// A panicking listener is isolated; the rest still see the event.
    pub fn emit(&self, event: &E) {
        for listener in &self.listeners {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));
        }
    }

    /// Returns true if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

impl<E: ClusterEvent> Default for EventListeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: ClusterEvent> fmt::Debug for EventListeners<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListeners")
            .field("len", &self.listeners.len())
            .finish()
    }
}

/// A listener backed by a closure.
pub struct FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    f: F,
    _phantom: std::marker::PhantomData<fn(&E)>,
}

impl<E, F> FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    /// Wraps `f` as a listener.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<E, F> EventListener<E> for FnListener<E, F>
where
    E: ClusterEvent,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.f)(event)
    }
}
