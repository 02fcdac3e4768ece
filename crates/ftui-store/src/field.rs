#![forbid(unsafe_code)]

//! Per-field subscription buckets.
//!
//! A [`FieldStore`] exists for every key that currently has subscribers. It
//! is created on first subscription and dropped by the owning store once its
//! last callback is removed (unless a restore is in progress).
//!
//! # Invariants
//!
//! 1. Callbacks fire in registration order.
//! 2. `notify()` passes no payload; callbacks read the State Map themselves.
//! 3. A notify pass iterates a snapshot of the callbacks: removing a
//!    callback mid-pass never errors, and the removal takes effect for the
//!    next pass.
//! 4. Dropping a [`FieldSubscription`] removes its callback exactly once.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::Result;
use crate::store::{Store, StoreInner};
use crate::value::Value;

type Callback = Rc<dyn Fn()>;

pub(crate) struct FieldStore {
    key: String,
    callbacks: RefCell<Vec<(u64, Callback)>>,
    next_id: Cell<u64>,
}

impl FieldStore {
    pub(crate) fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            callbacks: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
        }
    }

    pub(crate) fn subscribe(&self, callback: Callback) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.callbacks.borrow_mut().push((id, callback));
        id
    }

    /// Returns whether `id` was registered.
    pub(crate) fn unsubscribe(&self, id: u64) -> bool {
        let mut callbacks = self.callbacks.borrow_mut();
        let before = callbacks.len();
        callbacks.retain(|(cid, _)| *cid != id);
        callbacks.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.callbacks.borrow().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.callbacks.borrow().is_empty()
    }

    /// Invoke every callback registered when the pass starts. Returns the
    /// number of callbacks invoked.
    pub(crate) fn notify(&self) -> usize {
        let snapshot: Vec<Callback> = self
            .callbacks
            .borrow()
            .iter()
            .map(|(_, cb)| Rc::clone(cb))
            .collect();
        tracing::trace!(key = %self.key, callbacks = snapshot.len(), "field notify");
        for cb in &snapshot {
            cb();
        }
        snapshot.len()
    }
}

impl fmt::Debug for FieldStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldStore")
            .field("key", &self.key)
            .field("callbacks", &self.len())
            .finish()
    }
}

/// RAII guard for a field-level subscription.
///
/// Holding one counts as an active consumer of the store. Dropping it (or
/// calling [`unsubscribe`](Self::unsubscribe)) releases the callback and may
/// start the store's restore-on-unmount sequence.
#[must_use = "dropping a FieldSubscription unsubscribes immediately"]
pub struct FieldSubscription {
    store: Weak<StoreInner>,
    key: String,
    id: u64,
    active: Cell<bool>,
}

impl FieldSubscription {
    pub(crate) fn new(store: Weak<StoreInner>, key: String, id: u64) -> Self {
        Self {
            store,
            key,
            id,
            active: Cell::new(true),
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Release the subscription now. Idempotent.
    pub fn unsubscribe(&self) {
        if !self.active.replace(false) {
            return;
        }
        if let Some(store) = self.store.upgrade() {
            StoreInner::release_field(&store, &self.key, self.id);
        }
    }
}

impl Drop for FieldSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for FieldSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSubscription")
            .field("key", &self.key)
            .field("active", &self.active.get())
            .finish()
    }
}

/// Keyed accessor: the get/set/subscribe triple for one field.
#[derive(Clone, Debug)]
pub struct FieldHandle {
    store: Store,
    key: String,
}

impl FieldHandle {
    pub(crate) fn new(store: Store, key: String) -> Self {
        Self { store, key }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn get(&self) -> Option<Value> {
        self.store.get(&self.key)
    }

    /// Queue a write of this field.
    ///
    /// # Errors
    ///
    /// Same as [`Store::set`].
    pub fn set(&self, value: impl Into<Value>) -> Result<()> {
        self.store.set(&self.key, value)
    }

    pub fn subscribe(&self, callback: impl Fn() + 'static) -> FieldSubscription {
        self.store.subscribe_field(&self.key, callback)
    }
}
