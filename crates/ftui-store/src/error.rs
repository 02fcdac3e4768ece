#![forbid(unsafe_code)]

//! Error type shared by every store operation.
//!
//! All validation happens synchronously at the call site, before anything is
//! queued, so a returned error always means the State Map was left untouched.

use thiserror::Error;

use crate::runtime::StoreId;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The initializer (or a factory re-run during restore) did not produce
    /// a JSON object.
    #[error("{context}: initial state must be an object, found {found}")]
    NotAnObject {
        context: &'static str,
        found: &'static str,
    },

    /// An update payload was neither an object nor a producer, or a producer
    /// returned something other than an object or `null`.
    #[error("{api}: update payload must be an object or null, found {found}")]
    InvalidPayload {
        api: &'static str,
        found: &'static str,
    },

    /// A key holding an action was targeted by a write.
    #[error("field `{key}` holds an action and cannot be reassigned")]
    ActionReassign { key: String },

    /// An action was passed where a data value is required.
    #[error("field `{key}`: actions cannot be written through the update pipeline")]
    ActionValue { key: String },

    /// `invoke` on a field that is not an action.
    #[error("field `{key}` is not an action")]
    NotAnAction { key: String },

    #[error("invalid listener key filter: {reason}")]
    InvalidKeyFilter { reason: &'static str },

    /// A store id that this runtime never produced, or whose store is gone.
    #[error("{api}: {id} does not belong to this runtime")]
    ForeignStore { api: &'static str, id: StoreId },

    #[error("{api}: no store registered under namespace `{namespace}`")]
    UnknownNamespace { api: &'static str, namespace: String },

    #[error("namespace `{namespace}` is already registered")]
    DuplicateNamespace { namespace: String },

    #[error("field `{key}` could not be decoded: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A selector read itself while computing.
    #[error("selector read re-entered its own computation")]
    CyclicRead,

    #[error("configuration error: {message}")]
    Config { message: String },
}

impl StoreError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether the error came from input validation (as opposed to lookup or
    /// configuration problems).
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::NotAnObject { .. }
                | Self::InvalidPayload { .. }
                | Self::ActionReassign { .. }
                | Self::ActionValue { .. }
                | Self::InvalidKeyFilter { .. }
        )
    }
}

/// Human-readable JSON kind, used in error messages.
pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
