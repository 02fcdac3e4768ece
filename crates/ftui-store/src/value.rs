#![forbid(unsafe_code)]

//! Field values and initial-state descriptions.
//!
//! A field holds either plain data ([`serde_json::Value`]) or an [`Action`].
//! Actions are fixed methods: they live in the State Map next to data so
//! readers see one uniform table, but the update pipeline refuses to
//! overwrite them.
//!
//! # Change detection
//!
//! Two values are "the same" when:
//!
//! - both are data and compare equal structurally, or
//! - both are actions sharing the same allocation (`Rc::ptr_eq`).
//!
//! Absence is tracked separately (`Option<&Value>`), so a missing key and a
//! key holding `null` are different states.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{Result, StoreError, json_kind};
use crate::store::Store;

/// Ordered field table: the State Map and every snapshot of it.
pub type Fields = IndexMap<String, Value>;

pub(crate) type JsonObject = serde_json::Map<String, serde_json::Value>;

/// A callable field. Cloning shares the callable; identity is preserved.
#[derive(Clone)]
pub struct Action(Rc<dyn Fn(&Store)>);

impl Action {
    pub fn new(f: impl Fn(&Store) + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Run the action against `store`.
    pub fn call(&self, store: &Store) {
        (self.0)(store);
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Action")
            .field(&Rc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

/// One field's value.
#[derive(Clone, Debug)]
pub enum Value {
    Data(serde_json::Value),
    Action(Action),
}

impl Value {
    /// The data payload, or `None` for actions.
    #[must_use]
    pub fn data(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Data(v) => Some(v),
            Self::Action(_) => None,
        }
    }

    #[must_use]
    pub fn is_action(&self) -> bool {
        matches!(self, Self::Action(_))
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        self.data().and_then(serde_json::Value::as_i64)
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        self.data().and_then(serde_json::Value::as_f64)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.data().and_then(serde_json::Value::as_str)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        self.data().and_then(serde_json::Value::as_bool)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Data(a), Self::Data(b)) => a == b,
            (Self::Action(a), Self::Action(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl PartialEq<serde_json::Value> for Value {
    fn eq(&self, other: &serde_json::Value) -> bool {
        self.data() == Some(other)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Data(v)
    }
}

impl From<Action> for Value {
    fn from(a: Action) -> Self {
        Self::Action(a)
    }
}

macro_rules! data_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Self::Data(serde_json::Value::from(v))
                }
            }
        )*
    };
}

data_from!(bool, i32, i64, u32, u64, f64, &str, String);

/// Same-value check used by every diff in the pipeline.
pub(crate) fn same_value(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Render the data fields of a table as a JSON object. Actions are skipped.
#[must_use]
pub fn fields_to_json(fields: &Fields) -> serde_json::Value {
    let map = fields
        .iter()
        .filter_map(|(k, v)| v.data().map(|d| (k.clone(), d.clone())))
        .collect::<serde_json::Map<_, _>>();
    serde_json::Value::Object(map)
}

/// How a store derives its initial (reducer) state.
#[derive(Clone, Default)]
pub enum Initial {
    /// No fields at all.
    #[default]
    Empty,
    /// A fixed value. Must be a JSON object.
    Value(serde_json::Value),
    /// A factory re-run on every restore. Must return a JSON object.
    Factory(Rc<dyn Fn() -> serde_json::Value>),
}

impl Initial {
    pub fn factory(f: impl Fn() -> serde_json::Value + 'static) -> Self {
        Self::Factory(Rc::new(f))
    }

    #[must_use]
    pub fn is_factory(&self) -> bool {
        matches!(self, Self::Factory(_))
    }

    /// Compute a fresh reducer state.
    pub(crate) fn derive(&self, context: &'static str) -> Result<JsonObject> {
        let value = match self {
            Self::Empty => return Ok(serde_json::Map::new()),
            Self::Value(v) => v.clone(),
            Self::Factory(f) => f(),
        };
        match value {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(StoreError::NotAnObject {
                context,
                found: json_kind(&other),
            }),
        }
    }
}

impl fmt::Debug for Initial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Initial::Empty"),
            Self::Value(v) => f.debug_tuple("Initial::Value").field(v).finish(),
            Self::Factory(_) => f.write_str("Initial::Factory(..)"),
        }
    }
}

impl From<serde_json::Value> for Initial {
    fn from(v: serde_json::Value) -> Self {
        Self::Value(v)
    }
}
