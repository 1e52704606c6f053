//! Canonical state values and the notification payload format.
//!
//! A notification is a JSON object `{"state": "open" | "close"}` with an
//! optional `"origin"` naming the publishing handler. Decoding never fails:
//! anything that is not a recognizable state change becomes
//! [`Notification::Unknown`].

use crate::CoordinationError;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// State of a circuit as recorded in the shared state store.
///
/// Only the two stable states are shared; half-open is a local probe state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SharedState {
    /// The backend is tripped cluster-wide.
    Open,
    /// The backend is considered healthy.
    Close,
}

impl SharedState {
    /// Value written to the state store and carried in notifications.
    pub fn as_str(&self) -> &'static str {
        match self {
            SharedState::Open => "open",
            SharedState::Close => "close",
        }
    }

    /// Parses a stored field value. Anything except `"open"`/`"close"` is `None`.
    pub fn from_field(value: &str) -> Option<Self> {
        match value {
            "open" => Some(SharedState::Open),
            "close" => Some(SharedState::Close),
            _ => None,
        }
    }
}

impl fmt::Display for SharedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded state-change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Another node opened the circuit.
    Open {
        /// Publishing handler, when the sender identified itself.
        origin: Option<String>,
    },
    /// Another node closed the circuit.
    Close {
        /// Publishing handler, when the sender identified itself.
        origin: Option<String>,
    },
    /// Anything else; carries a short description of why it was not understood.
    Unknown {
        /// Human readable reason, for logs.
        reason: String,
    },
}

#[derive(Serialize)]
struct Outbound<'a> {
    state: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    origin: Option<&'a str>,
}

impl Notification {
    /// Encodes a state change for publishing.
    pub fn encode(state: SharedState, origin: Option<&str>) -> Result<String, CoordinationError> {
        let message = Outbound {
            state: state.as_str(),
            origin,
        };
        Ok(serde_json::to_string(&message)?)
    }

    /// Decodes a received payload.
    pub fn decode(payload: &str) -> Self {
        let value: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(err) => {
                return Notification::Unknown {
                    reason: format!("invalid json: {err}"),
                }
            }
        };

        let Value::Object(fields) = value else {
            return Notification::Unknown {
                reason: "payload is not an object".to_string(),
            };
        };

        let origin = fields
            .get("origin")
            .and_then(Value::as_str)
            .map(str::to_string);

        match fields.get("state").and_then(Value::as_str) {
            Some(state) => match SharedState::from_field(state) {
                Some(SharedState::Open) => Notification::Open { origin },
                Some(SharedState::Close) => Notification::Close { origin },
                None => Notification::Unknown {
                    reason: format!("unrecognized state {state:?}"),
                },
            },
            None => Notification::Unknown {
                reason: "missing string field `state`".to_string(),
            },
        }
    }

    /// The state this notification announces, if any.
    pub fn state(&self) -> Option<SharedState> {
        match self {
            Notification::Open { .. } => Some(SharedState::Open),
            Notification::Close { .. } => Some(SharedState::Close),
            Notification::Unknown { .. } => None,
        }
    }

    /// The publishing handler, if the sender identified itself.
    pub fn origin(&self) -> Option<&str> {
        match self {
            Notification::Open { origin } | Notification::Close { origin } => origin.as_deref(),
            Notification::Unknown { .. } => None,
        }
    }
}
