use thiserror::Error;

/// Errors raised by a coordination backend (shared stores or notification bus).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinationError {
    /// The backend could not be reached or refused the operation.
    #[error("coordination backend unavailable: {0}")]
    Unavailable(String),

    /// A stored value had an unexpected type (e.g. incrementing a non-integer field).
    #[error("field {field} of {key} does not hold an integer")]
    NotAnInteger {
        /// Key of the hash holding the field.
        key: String,
        /// Offending field.
        field: String,
    },

    /// The subscription was closed by the backend.
    #[error("subscription to {0} closed")]
    SubscriptionClosed(String),

    /// A payload could not be encoded.
    #[error("payload encoding failed: {0}")]
    Codec(String),
}

impl CoordinationError {
    /// Returns true if retrying later might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoordinationError::Unavailable(_) | CoordinationError::SubscriptionClosed(_)
        )
    }
}

impl From<serde_json::Error> for CoordinationError {
    fn from(err: serde_json::Error) -> Self {
        CoordinationError::Codec(err.to_string())
    }
}
