//! Per-process table of distributed circuits.
//!
//! A gateway creates one circuit per protected route the first time the route
//! is configured, and tears circuits down when routes are removed, reloaded or
//! the gateway stops.

use crate::config::{HandlerConfig, HandlerConfigBuilder, DEFAULT_RESET_TIMEOUT};
use crate::events::CircuitEvent;
use crate::{BreakerError, DistributedStateHandler};
use cluster_breaker_core::{CoordinationBackend, EventListeners, FnListener, Keyspace};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Owns the distributed circuits of one gateway process.
///
/// # Example
///
/// ```rust
/// use cluster_breaker::CircuitRegistry;
/// use cluster_breaker_core::MemoryBackend;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), cluster_breaker::BreakerError> {
/// let registry = CircuitRegistry::new(Arc::new(MemoryBackend::new()))
///     .with_reset_timeout(Duration::from_secs(15));
///
/// let orders = registry.get_or_start("orders-api").await?;
/// orders.force_open();
///
/// // On configuration reload every circuit is torn down and rebuilt lazily.
/// registry.reload().await;
/// assert!(registry.is_empty().await);
/// # Ok(())
/// # }
/// ```
pub struct CircuitRegistry<B: CoordinationBackend> {
    backend: Arc<B>,
    reset_timeout: Duration,
    keyspace: Keyspace,
    listeners: EventListeners<CircuitEvent>,
    circuits: Mutex<HashMap<String, Arc<DistributedStateHandler<B>>>>,
}

impl<B: CoordinationBackend> CircuitRegistry<B> {
    /// Creates an empty registry whose circuits share `backend`.
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            reset_timeout: DEFAULT_RESET_TIMEOUT,
            keyspace: Keyspace::default(),
            listeners: EventListeners::new(),
            circuits: Mutex::new(HashMap::new()),
        }
    }

    /// Default reset timeout of new circuits.
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Keyspace of new circuits.
    pub fn with_keyspace(mut self, keyspace: Keyspace) -> Self {
        self.keyspace = keyspace;
        self
    }

    /// Registers a callback for events of every circuit created afterwards.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&CircuitEvent) + Send + Sync + 'static,
    {
        self.listeners.add(FnListener::new(f));
        self
    }

    /// Returns the circuit for `id`, starting it with the registry defaults
    /// if it does not exist yet.
    pub async fn get_or_start(
        &self,
        id: &str,
    ) -> Result<Arc<DistributedStateHandler<B>>, BreakerError> {
        self.get_or_start_with(id, |builder| builder).await
    }

    /// Like [`get_or_start`](Self::get_or_start), letting `configure` adjust
    /// the defaults (e.g. a route-specific reset timeout). `configure` is only
    /// called when a new circuit is started.
    pub async fn get_or_start_with<F>(
        &self,
        id: &str,
        configure: F,
    ) -> Result<Arc<DistributedStateHandler<B>>, BreakerError>
    where
        F: FnOnce(HandlerConfigBuilder) -> HandlerConfigBuilder,
    {
        let mut circuits = self.circuits.lock().await;
        if let Some(existing) = circuits.get(id) {
            return Ok(Arc::clone(existing));
        }

        let builder = HandlerConfig::builder(id)
            .reset_timeout(self.reset_timeout)
            .keyspace(self.keyspace.clone())
            .listeners(&self.listeners);
        let config = configure(builder).build()?;

        let handler =
            Arc::new(DistributedStateHandler::start(config, Arc::clone(&self.backend)).await?);
        circuits.insert(id.to_string(), Arc::clone(&handler));
        Ok(handler)
    }

    /// Returns the circuit for `id`, if started.
    pub async fn get(&self, id: &str) -> Option<Arc<DistributedStateHandler<B>>> {
        self.circuits.lock().await.get(id).cloned()
    }

    /// Ids of every started circuit, sorted.
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.circuits.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.circuits.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.circuits.lock().await.is_empty()
    }

    /// Shuts down and forgets the circuit for `id`. Returns whether it existed.
    ///
    /// Clones of the handler held elsewhere keep working locally but no
    /// longer receive notifications.
    pub async fn remove(&self, id: &str) -> bool {
        match self.circuits.lock().await.remove(id) {
            Some(handler) => {
                handler.shutdown();
                true
            }
            None => false,
        }
    }

    /// Tears every circuit down, e.g. when the route configuration is reloaded.
    pub async fn reload(&self) {
        let drained: Vec<_> = self.circuits.lock().await.drain().collect();

        #[cfg(feature = "tracing")]
        tracing::debug!(circuits = drained.len(), "tearing down circuits");

        for (_, handler) in drained {
            handler.shutdown();
        }
    }

    /// Tears every circuit down when the gateway stops.
    pub async fn shutdown(&self) {
        self.reload().await;
    }
}

impl<B: CoordinationBackend> std::fmt::Debug for CircuitRegistry<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitRegistry")
            .field("reset_timeout", &self.reset_timeout)
            .field("keyspace", &self.keyspace)
            .finish_non_exhaustive()
    }
}
