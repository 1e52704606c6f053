//! Names of the shared keys and notification channels.
//!
//! The state key and the failure key are single hashes shared by every
//! circuit; the circuit id is the field inside them. Notification channels
//! are namespaced per circuit id, and the very same channel name is used for
//! publishing and subscribing.

use serde::{Deserialize, Serialize};

/// Default hash holding each circuit's canonical state.
pub const DEFAULT_STATE_KEY: &str = "{circuitbreaker}:state";
/// Default hash holding each circuit's failure counter.
pub const DEFAULT_FAILURES_KEY: &str = "{circuitbreaker}:failures";
/// Default prefix of the per-circuit notification channels.
pub const DEFAULT_CHANNEL_PREFIX: &str = "{circuitbreaker}:events:changed";

/// Key and channel names used by a group of circuits.
///
/// Every node of a cluster must use the same keyspace, otherwise they will
/// not see each other's writes or notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Keyspace {
    state_key: String,
    failures_key: String,
    channel_prefix: String,
}

impl Keyspace {
    /// Overrides the state hash name.
    pub fn with_state_key(mut self, key: impl Into<String>) -> Self {
        self.state_key = key.into();
        self
    }

    /// Overrides the failure counter hash name.
    pub fn with_failures_key(mut self, key: impl Into<String>) -> Self {
        self.failures_key = key.into();
        self
    }

    /// Overrides the notification channel prefix.
    pub fn with_channel_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.channel_prefix = prefix.into();
        self
    }

    /// Hash holding the canonical states.
    pub fn state_key(&self) -> &str {
        &self.state_key
    }

    /// Hash holding the failure counters.
    pub fn failures_key(&self) -> &str {
        &self.failures_key
    }

    /// Channel prefix shared by every circuit.
    pub fn channel_prefix(&self) -> &str {
        &self.channel_prefix
    }

    /// Notification channel of one circuit.
    pub fn channel(&self, circuit_id: &str) -> String {
        format!("{}:{}", self.channel_prefix, circuit_id)
    }

    /// Returns the name of the first empty component, if any.
    pub fn first_empty_component(&self) -> Option<&'static str> {
        if self.state_key.is_empty() {
            Some("state_key")
        } else if self.failures_key.is_empty() {
            Some("failures_key")
        } else if self.channel_prefix.is_empty() {
            Some("channel_prefix")
        } else {
            None
        }
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self {
            state_key: DEFAULT_STATE_KEY.to_string(),
            failures_key: DEFAULT_FAILURES_KEY.to_string(),
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
        }
    }
}
