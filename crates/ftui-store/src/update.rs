#![forbid(unsafe_code)]

//! Update payloads and change planning.
//!
//! Every write entry point goes through the same two steps before touching
//! the State Map:
//!
//! 1. **Resolve** the payload into a JSON object (or a no-op).
//! 2. **Plan** the per-key changes against the current state, rejecting the
//!    whole update if any key targets an action.
//!
//! Only a fully validated plan is ever applied.

use std::fmt;

use crate::error::{Result, StoreError, json_kind};
use crate::value::{Fields, JsonObject, Value, same_value};

type Producer = Box<dyn FnOnce(&Fields) -> serde_json::Value>;

/// Input to `set_state` / `sync_update`.
pub enum Update {
    /// A partial object; each key is diffed individually.
    Patch(serde_json::Value),
    /// Computes a partial object (or `null` for "no change") from the
    /// current state.
    Producer(Producer),
}

impl Update {
    pub fn patch(value: serde_json::Value) -> Self {
        Self::Patch(value)
    }

    pub fn producer(f: impl FnOnce(&Fields) -> serde_json::Value + 'static) -> Self {
        Self::Producer(Box::new(f))
    }

    /// Turn the payload into an object. `Ok(None)` means "no change".
    ///
    /// `current` is only materialized for producers.
    pub(crate) fn resolve(
        self,
        api: &'static str,
        current: impl FnOnce() -> Fields,
    ) -> Result<Option<JsonObject>> {
        match self {
            Self::Patch(serde_json::Value::Object(map)) => Ok(Some(map)),
            Self::Patch(other) => Err(StoreError::InvalidPayload {
                api,
                found: json_kind(&other),
            }),
            Self::Producer(f) => match f(&current()) {
                serde_json::Value::Object(map) => Ok(Some(map)),
                serde_json::Value::Null => Ok(None),
                other => Err(StoreError::InvalidPayload {
                    api,
                    found: json_kind(&other),
                }),
            },
        }
    }
}

impl fmt::Debug for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Patch(v) => f.debug_tuple("Update::Patch").field(v).finish(),
            Self::Producer(_) => f.write_str("Update::Producer(..)"),
        }
    }
}

impl From<serde_json::Value> for Update {
    fn from(v: serde_json::Value) -> Self {
        Self::Patch(v)
    }
}

/// One planned field change. `value == None` deletes the key.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Change {
    pub(crate) key: String,
    pub(crate) value: Option<Value>,
}

/// Reject writes that target or carry actions.
pub(crate) fn check_writable(state: &Fields, key: &str, value: Option<&Value>) -> Result<()> {
    if value.is_some_and(Value::is_action) {
        return Err(StoreError::ActionValue {
            key: key.to_owned(),
        });
    }
    if state.get(key).is_some_and(Value::is_action) {
        return Err(StoreError::ActionReassign {
            key: key.to_owned(),
        });
    }
    Ok(())
}

/// Diff a resolved patch against `state`. Unchanged keys are dropped.
///
/// Keys holding actions fail the whole plan when `strict`; otherwise they
/// are skipped with a warning.
///
/// # Errors
///
/// [`StoreError::ActionReassign`] in strict mode, with no partial result.
pub(crate) fn plan_patch(state: &Fields, patch: JsonObject, strict: bool) -> Result<Vec<Change>> {
    let mut changes = Vec::with_capacity(patch.len());
    for (key, json) in patch {
        let value = Value::Data(json);
        match check_writable(state, &key, Some(&value)) {
            Ok(()) => {}
            Err(StoreError::ActionReassign { key }) if !strict => {
                tracing::warn!(key = %key, "ignoring write to action field");
                continue;
            }
            Err(err) => return Err(err),
        }
        if !same_value(state.get(&key), Some(&value)) {
            changes.push(Change {
                key,
                value: Some(value),
            });
        }
    }
    Ok(changes)
}

/// Diff `target` against `state` over the union of both key sets. Keys
/// missing from `target` are deleted.
pub(crate) fn plan_restore(state: &Fields, target: &Fields) -> Vec<Change> {
    let mut changes = Vec::new();
    for (key, value) in target {
        if !same_value(state.get(key), Some(value)) {
            changes.push(Change {
                key: key.clone(),
                value: Some(value.clone()),
            });
        }
    }
    for key in state.keys() {
        if !target.contains_key(key) {
            changes.push(Change {
                key: key.clone(),
                value: None,
            });
        }
    }
    changes
}

/// Write one planned change into the State Map.
pub(crate) fn apply(state: &mut Fields, change: &Change) {
    match &change.value {
        Some(value) => {
            state.insert(change.key.clone(), value.clone());
        }
        None => {
            state.shift_remove(&change.key);
        }
    }
}
