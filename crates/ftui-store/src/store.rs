#![forbid(unsafe_code)]

//! The store facade and its write pipeline.
//!
//! # Write path
//!
//! ```text
//! set / set_state / restore
//!   └─ validate + diff (update.rs)      errors surface here, nothing applied
//!   └─ record "before" snapshot         once per tick
//!   └─ apply to State Map               reads see the new value immediately
//!   └─ Scheduler::push_task             dedup by key
//!   └─ (first push) queue flush microtask
//!
//! flush
//!   └─ take queue, reset flags
//!   └─ field notifications              inside the host batch function
//!   └─ completion callbacks             with the committed state
//!   └─ listeners                        one shared Commit
//! ```
//!
//! `sync_update` runs the same validation but applies, notifies and
//! dispatches before returning.
//!
//! # Invariants
//!
//! 1. A failing write never mutates the State Map.
//! 2. Field subscribers are notified only for keys whose value changed.
//! 3. Notification order within a flush: fields (first-push key order),
//!    completion callbacks, listeners.
//! 4. No `RefCell` borrow of store internals is held while user code runs.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;
use web_time::Instant;

use crate::config::{StoreOptions, StoreOptionsPatch};
use crate::error::{Result, StoreError};
use crate::field::{FieldHandle, FieldStore, FieldSubscription};
use crate::lifecycle::{Confirm, ExternalRef, Lifecycle, LifecycleState};
use crate::listener::{Commit, ListenerSet, ListenerSubscription, validate_filter};
use crate::runtime::{Runtime, StoreId};
use crate::scheduler::{CompletionCallback, Scheduler, SchedulerSnapshot};
use crate::update::{Change, Update, apply, check_writable, plan_patch, plan_restore};
use crate::value::{Action, Fields, Initial, Value, fields_to_json, same_value};

/// Counters describing the work a store has done.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Deferred flushes that committed at least one change or callback.
    pub flushes: u64,
    /// Commits made by `sync_update`.
    pub sync_commits: u64,
    /// Field callbacks invoked.
    pub notifications: u64,
    /// Listener invocations.
    pub listener_calls: u64,
    /// Wall time of the most recent deferred flush.
    pub last_flush: Option<Duration>,
}

pub(crate) struct StoreInner {
    id: StoreId,
    runtime: Runtime,
    namespace: Option<String>,
    initial: Initial,
    actions: Fields,
    state: RefCell<Fields>,
    before: RefCell<Option<Fields>>,
    fields: RefCell<HashMap<String, Rc<FieldStore>>>,
    scheduler: Scheduler,
    listeners: ListenerSet,
    lifecycle: Lifecycle,
    stats: Cell<FlushStats>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        self.runtime.unregister(self.id, self.namespace.as_deref());
    }
}

/// Restores `draining_callbacks` even if a callback panics.
struct CallbackDrain<'a>(&'a Scheduler);

impl<'a> CallbackDrain<'a> {
    fn begin(scheduler: &'a Scheduler) -> Self {
        scheduler.set_draining_callbacks(true);
        Self(scheduler)
    }
}

impl Drop for CallbackDrain<'_> {
    fn drop(&mut self) {
        self.0.set_draining_callbacks(false);
    }
}

impl StoreInner {
    pub(crate) fn listeners(&self) -> &ListenerSet {
        &self.listeners
    }

    fn strict(&self) -> bool {
        self.runtime.config().strict
    }

    fn update_stats(&self, f: impl FnOnce(&mut FlushStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    /// Fresh reducer state: the initializer's fields followed by actions.
    fn derive_reducer(&self, context: &'static str) -> Result<Fields> {
        let data = self.initial.derive(context)?;
        let mut fields: Fields = data
            .into_iter()
            .map(|(k, v)| (k, Value::Data(v)))
            .collect();
        for (key, action) in &self.actions {
            fields.insert(key.clone(), action.clone());
        }
        Ok(fields)
    }

    fn record_before(&self) {
        let mut before = self.before.borrow_mut();
        if before.is_none() {
            *before = Some(self.state.borrow().clone());
        }
    }

    /// Apply changes eagerly and queue their notifications.
    fn enqueue(self: &Rc<Self>, changes: Vec<Change>) {
        // Re-diff: deferred calls may have been planned against older state.
        let changes: Vec<Change> = {
            let state = self.state.borrow();
            changes
                .into_iter()
                .filter(|c| !same_value(state.get(&c.key), c.value.as_ref()))
                .collect()
        };
        if changes.is_empty() {
            return;
        }
        self.record_before();
        {
            let mut state = self.state.borrow_mut();
            for change in &changes {
                apply(&mut state, change);
            }
        }
        let mut arm = false;
        for change in changes {
            arm |= self.scheduler.push_task(&change.key, change.value);
        }
        if arm {
            self.schedule_flush();
        }
    }

    fn push_callback(self: &Rc<Self>, callback: CompletionCallback) {
        if self.scheduler.push_callback(callback) {
            self.schedule_flush();
        }
    }

    fn schedule_flush(self: &Rc<Self>) {
        let store = Rc::clone(self);
        self.runtime.queue_microtask(move || store.flush());
    }

    fn flush(self: &Rc<Self>) {
        let queue = self.scheduler.begin_flush();
        if queue.is_empty() {
            return;
        }
        let started = Instant::now();
        let _span = tracing::debug_span!(
            "store_flush",
            store = %self.id,
            keys = queue.pending_tasks.len(),
            callbacks = queue.pending_callbacks.len()
        )
        .entered();

        let next = self.state.borrow().clone();
        let prev = self.before.borrow_mut().take().unwrap_or_else(|| next.clone());
        let mut effect = Fields::new();
        let mut removed = Vec::new();
        for (key, value) in queue.pending_values {
            match value {
                Some(value) => {
                    effect.insert(key, value);
                }
                None => removed.push(key),
            }
        }

        let mut notified = 0usize;
        self.runtime.batch(|| {
            for key in &queue.pending_tasks {
                let field = self.fields.borrow().get(key).cloned();
                if let Some(field) = field {
                    notified += field.notify();
                }
            }
        });

        let commit = Rc::new(Commit {
            effect,
            removed,
            prev,
            next,
        });

        if !queue.pending_callbacks.is_empty() {
            let _drain = CallbackDrain::begin(&self.scheduler);
            for callback in queue.pending_callbacks {
                callback(&commit.next);
            }
        }

        let fired = self.listeners.dispatch(&commit);
        let elapsed = started.elapsed();
        self.update_stats(|s| {
            s.flushes += 1;
            s.notifications += notified as u64;
            s.listener_calls += fired as u64;
            s.last_flush = Some(elapsed);
        });
        tracing::trace!(notified, listeners = fired, ?elapsed, "flush committed");
    }

    /// Apply, notify and dispatch within the current call.
    fn commit_sync(self: &Rc<Self>, changes: Vec<Change>) {
        let _span = tracing::debug_span!("store_sync_update", store = %self.id, keys = changes.len())
            .entered();
        let prev = self.state.borrow().clone();
        {
            let mut state = self.state.borrow_mut();
            for change in &changes {
                apply(&mut state, change);
            }
        }
        // Keys still queued by a deferred write must carry the newer value
        // into the next flush's effect.
        for change in &changes {
            self.scheduler.refresh_pending(&change.key, change.value.clone());
        }
        let next = self.state.borrow().clone();

        let mut effect = Fields::new();
        let mut removed = Vec::new();
        for change in &changes {
            match &change.value {
                Some(value) => {
                    effect.insert(change.key.clone(), value.clone());
                }
                None => removed.push(change.key.clone()),
            }
        }

        let mut notified = 0usize;
        self.runtime.batch(|| {
            for change in &changes {
                let field = self.fields.borrow().get(&change.key).cloned();
                if let Some(field) = field {
                    notified += field.notify();
                }
            }
        });

        let commit = Rc::new(Commit {
            effect,
            removed,
            prev,
            next,
        });
        let fired = self.listeners.dispatch(&commit);
        self.update_stats(|s| {
            s.sync_commits += 1;
            s.notifications += notified as u64;
            s.listener_calls += fired as u64;
        });
    }

    fn restore(self: &Rc<Self>, callback: Option<CompletionCallback>) -> Result<()> {
        let _span = tracing::debug_span!("store_restore", store = %self.id).entered();
        let target = self.derive_reducer("restore")?;
        let changes = plan_restore(&self.state.borrow(), &target);
        tracing::debug!(changes = changes.len(), "restoring initial state");
        self.lifecycle.clear_eligible();
        self.enqueue(changes);
        if let Some(callback) = callback {
            self.push_callback(callback);
        }
        Ok(())
    }

    /// Run an armed lazy restore before a fresh read or write.
    fn restore_if_eligible(self: &Rc<Self>) {
        if self.lifecycle.take_eligible() {
            if let Err(err) = self.restore(None) {
                tracing::error!(store = %self.id, error = %err, "lazy restore failed");
            }
        }
    }

    fn schedule_confirm(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        let deferred = self.runtime.defer(move || {
            if let Some(store) = weak.upgrade() {
                store.confirm_idle();
            }
        });
        self.lifecycle.arm(deferred);
    }

    fn confirm_idle(self: &Rc<Self>) {
        match self.lifecycle.confirm(self.initial.is_factory()) {
            Confirm::Skip => {}
            Confirm::MarkEligible => {
                tracing::debug!(store = %self.id, "restore armed for next read");
            }
            Confirm::RestoreNow => {
                if let Err(err) = self.restore(None) {
                    tracing::error!(store = %self.id, error = %err, "unmount restore failed");
                }
            }
        }
    }

    pub(crate) fn release_field(this: &Rc<Self>, key: &str, id: u64) {
        let field = this.fields.borrow().get(key).cloned();
        let Some(field) = field else {
            return;
        };
        if !field.unsubscribe(id) {
            return;
        }
        if field.is_empty() {
            this.fields.borrow_mut().remove(key);
        }
        if this.lifecycle.release() {
            this.schedule_confirm();
        }
    }

    pub(crate) fn release_external(this: &Rc<Self>) {
        if this.lifecycle.release_external() {
            this.schedule_confirm();
        }
    }
}

/// A reactive state container.
///
/// Cloning a `Store` yields another handle to the same container.
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("namespace", &self.inner.namespace)
            .field("state", &fields_to_json(&self.inner.state.borrow()))
            .field("lifecycle", &self.inner.lifecycle)
            .field("scheduler", &self.inner.scheduler)
            .finish()
    }
}

/// Builder for [`Store`].
pub struct StoreBuilder {
    runtime: Runtime,
    initial: Initial,
    options: StoreOptions,
    actions: Fields,
}

impl fmt::Debug for StoreBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreBuilder")
            .field("initial", &self.initial)
            .field("options", &self.options)
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StoreBuilder {
    #[must_use]
    pub fn initial(mut self, initial: impl Into<Initial>) -> Self {
        self.initial = initial.into();
        self
    }

    /// Use a factory initializer, re-run on every restore.
    #[must_use]
    pub fn factory(mut self, f: impl Fn() -> serde_json::Value + 'static) -> Self {
        self.initial = Initial::factory(f);
        self
    }

    #[must_use]
    pub fn options(mut self, options: StoreOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn unmount_restore(mut self, enabled: bool) -> Self {
        self.options.unmount_restore = enabled;
        self
    }

    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.options.namespace = Some(namespace.into());
        self
    }

    /// Register an action field. Actions shadow data keys of the same name.
    #[must_use]
    pub fn action(mut self, key: impl Into<String>, f: impl Fn(&Store) + 'static) -> Self {
        self.actions
            .insert(key.into(), Value::Action(Action::new(f)));
        self
    }

    /// Validate the initializer and register the store.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotAnObject`] when the initializer is not an object.
    /// - [`StoreError::DuplicateNamespace`] when the namespace is taken.
    pub fn build(self) -> Result<Store> {
        let Self {
            runtime,
            initial,
            options,
            actions,
        } = self;

        let data = initial.derive("create")?;
        let mut state: Fields = data
            .into_iter()
            .map(|(k, v)| (k, Value::Data(v)))
            .collect();
        for (key, action) in &actions {
            state.insert(key.clone(), action.clone());
        }

        let StoreOptions {
            unmount_restore,
            namespace,
        } = options;
        let claim = namespace.clone();
        let rt = runtime.clone();
        let inner = rt.register(claim.as_deref(), move |id| {
            Rc::new(StoreInner {
                id,
                runtime,
                namespace,
                initial,
                actions,
                state: RefCell::new(state),
                before: RefCell::new(None),
                fields: RefCell::new(HashMap::new()),
                scheduler: Scheduler::default(),
                listeners: ListenerSet::default(),
                lifecycle: Lifecycle::new(unmount_restore),
                stats: Cell::new(FlushStats::default()),
            })
        })?;
        tracing::debug!(store = %inner.id, namespace = ?inner.namespace, "store created");
        Ok(Store { inner })
    }
}

impl Store {
    /// Create a store from an initializer and options.
    ///
    /// # Errors
    ///
    /// See [`StoreBuilder::build`].
    pub fn new(
        runtime: &Runtime,
        initial: impl Into<Initial>,
        options: StoreOptions,
    ) -> Result<Self> {
        Self::builder(runtime).initial(initial).options(options).build()
    }

    #[must_use]
    pub fn builder(runtime: &Runtime) -> StoreBuilder {
        StoreBuilder {
            runtime: runtime.clone(),
            initial: Initial::Empty,
            options: StoreOptions::default(),
            actions: Fields::new(),
        }
    }

    pub(crate) fn from_inner(inner: Rc<StoreInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<StoreInner> {
        Rc::downgrade(&self.inner)
    }

    #[must_use]
    pub fn id(&self) -> StoreId {
        self.inner.id
    }

    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.inner.namespace.as_deref()
    }

    #[must_use]
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Whether two handles refer to the same store.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // -- reads --------------------------------------------------------------

    /// Current value of `key`. Always synchronous; reflects queued writes.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.restore_if_eligible();
        self.inner.runtime.record_read(self.inner.id, key);
        self.inner.state.borrow().get(key).cloned()
    }

    /// Deserialize the data held by `key`. Missing keys and actions yield
    /// `Ok(None)`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Decode`] when the data does not match `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            Some(Value::Data(json)) => serde_json::from_value(json)
                .map(Some)
                .map_err(|source| StoreError::Decode {
                    key: key.to_owned(),
                    source,
                }),
            _ => Ok(None),
        }
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Snapshot of the whole State Map. Records a read of every key.
    #[must_use]
    pub fn state(&self) -> Fields {
        self.inner.restore_if_eligible();
        let state = self.inner.state.borrow().clone();
        for key in state.keys() {
            self.inner.runtime.record_read(self.inner.id, key);
        }
        state
    }

    /// Data fields as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        fields_to_json(&self.state())
    }

    /// Keyed accessor for one field.
    #[must_use]
    pub fn field(&self, key: impl Into<String>) -> FieldHandle {
        FieldHandle::new(self.clone(), key.into())
    }

    // -- writes -------------------------------------------------------------

    /// Queue a write of a single field.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ActionValue`] when `value` is an action.
    /// - [`StoreError::ActionReassign`] when `key` holds an action and the
    ///   runtime is strict (otherwise the write is logged and ignored).
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.inner.restore_if_eligible();
        let value = value.into();
        if !self.writable(key, Some(&value))? {
            return Ok(());
        }
        self.inner.enqueue(vec![Change {
            key: key.to_owned(),
            value: Some(value),
        }]);
        Ok(())
    }

    /// Queue the deletion of a field. Returns whether the key existed.
    ///
    /// # Errors
    ///
    /// Same as [`Store::set`] for action fields.
    pub fn remove(&self, key: &str) -> Result<bool> {
        self.inner.restore_if_eligible();
        if !self.writable(key, None)? {
            return Ok(false);
        }
        let exists = self.inner.state.borrow().contains_key(key);
        if exists {
            self.inner.enqueue(vec![Change {
                key: key.to_owned(),
                value: None,
            }]);
        }
        Ok(exists)
    }

    /// `Ok(false)` means "ignored in lenient mode".
    fn writable(&self, key: &str, value: Option<&Value>) -> Result<bool> {
        let checked = check_writable(&self.inner.state.borrow(), key, value);
        match checked {
            Ok(()) => Ok(true),
            Err(StoreError::ActionReassign { .. }) if !self.inner.strict() => {
                tracing::warn!(store = %self.inner.id, key, "ignoring write to action field");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Queue a batch update.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidPayload`] or [`StoreError::ActionReassign`];
    /// nothing is applied on error.
    pub fn set_state(&self, update: impl Into<Update>) -> Result<()> {
        self.set_state_inner(update.into(), None)
    }

    /// Queue a batch update and run `callback` with the committed state once
    /// the triggering flush has notified field subscribers.
    ///
    /// Called from inside another completion callback, the update is
    /// validated now but applied on the next microtask.
    ///
    /// # Errors
    ///
    /// Same as [`Store::set_state`].
    pub fn set_state_with(
        &self,
        update: impl Into<Update>,
        callback: impl FnOnce(&Fields) + 'static,
    ) -> Result<()> {
        self.set_state_inner(update.into(), Some(Box::new(callback)))
    }

    fn set_state_inner(&self, update: Update, callback: Option<CompletionCallback>) -> Result<()> {
        let changes = self.plan(update, "set_state")?;
        if callback.is_some() && self.inner.scheduler.draining_callbacks() {
            let inner = Rc::clone(&self.inner);
            self.inner.runtime.queue_microtask(move || {
                inner.enqueue(changes);
                if let Some(callback) = callback {
                    inner.push_callback(callback);
                }
            });
            return Ok(());
        }
        self.inner.enqueue(changes);
        if let Some(callback) = callback {
            self.inner.push_callback(callback);
        }
        Ok(())
    }

    /// Apply an update, notify field subscribers and dispatch listeners
    /// before returning.
    ///
    /// # Errors
    ///
    /// Same as [`Store::set_state`].
    pub fn sync_update(&self, update: impl Into<Update>) -> Result<()> {
        let changes = self.plan(update.into(), "sync_update")?;
        if !changes.is_empty() {
            self.inner.commit_sync(changes);
        }
        Ok(())
    }

    /// An armed lazy restore runs first so producers and diffs see the
    /// restored state.
    fn plan(&self, update: Update, api: &'static str) -> Result<Vec<Change>> {
        self.inner.restore_if_eligible();
        let patch = update.resolve(api, || self.inner.state.borrow().clone())?;
        match patch {
            Some(patch) => plan_patch(&self.inner.state.borrow(), patch, self.inner.strict()),
            None => Ok(Vec::new()),
        }
    }

    /// Reset every field to a freshly derived initial value. Keys added since
    /// construction are removed; deleted keys come back.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotAnObject`] when a factory initializer stops
    /// returning an object.
    pub fn restore(&self) -> Result<()> {
        self.inner.restore(None)
    }

    /// [`Store::restore`] with a completion callback.
    ///
    /// # Errors
    ///
    /// Same as [`Store::restore`].
    pub fn restore_with(&self, callback: impl FnOnce(&Fields) + 'static) -> Result<()> {
        self.inner.restore(Some(Box::new(callback)))
    }

    /// Call the action stored under `key`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotAnAction`] when `key` is missing or holds data.
    pub fn invoke(&self, key: &str) -> Result<()> {
        let value = self.inner.state.borrow().get(key).cloned();
        match value {
            Some(Value::Action(action)) => {
                action.call(self);
                Ok(())
            }
            _ => Err(StoreError::NotAnAction {
                key: key.to_owned(),
            }),
        }
    }

    // -- subscriptions ------------------------------------------------------

    /// Subscribe to changes of a single field. Counts as an active consumer.
    pub fn subscribe_field(&self, key: &str, callback: impl Fn() + 'static) -> FieldSubscription {
        self.inner.restore_if_eligible();
        let field = Rc::clone(
            self.inner
                .fields
                .borrow_mut()
                .entry(key.to_owned())
                .or_insert_with(|| Rc::new(FieldStore::new(key))),
        );
        let id = field.subscribe(Rc::new(callback));
        self.inner.lifecycle.acquire();
        FieldSubscription::new(self.downgrade(), key.to_owned(), id)
    }

    /// Listen to every commit.
    pub fn subscribe(&self, listener: impl Fn(&Commit) + 'static) -> ListenerSubscription {
        let id = self.inner.listeners.add(Rc::new(listener), None);
        ListenerSubscription::new(self.downgrade(), id)
    }

    /// Listen to commits touching any of `keys`.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidKeyFilter`] for an empty filter or blank keys.
    pub fn subscribe_keys(
        &self,
        keys: &[&str],
        listener: impl Fn(&Commit) + 'static,
    ) -> Result<ListenerSubscription> {
        let keys = validate_filter(keys)?;
        let id = self.inner.listeners.add(Rc::new(listener), Some(keys));
        Ok(ListenerSubscription::new(self.downgrade(), id))
    }

    /// Hold the store outside the field-subscription mechanism, vetoing
    /// restore-on-unmount while the guard lives.
    pub fn retain(&self) -> ExternalRef {
        self.inner.lifecycle.retain_external();
        ExternalRef::new(self.downgrade())
    }

    // -- options & introspection --------------------------------------------

    pub fn set_options(&self, patch: StoreOptionsPatch) {
        if let Some(enabled) = patch.unmount_restore {
            self.set_unmount_restore(enabled);
        }
    }

    pub fn set_unmount_restore(&self, enabled: bool) {
        self.inner.lifecycle.set_unmount_restore(enabled);
    }

    #[must_use]
    pub fn options(&self) -> StoreOptions {
        StoreOptions {
            unmount_restore: self.inner.lifecycle.unmount_restore(),
            namespace: self.inner.namespace.clone(),
        }
    }

    #[must_use]
    pub fn lifecycle(&self) -> LifecycleState {
        self.inner.lifecycle.state()
    }

    /// Live field subscriptions across all keys.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.inner.lifecycle.ref_count()
    }

    #[must_use]
    pub fn external_refs(&self) -> usize {
        self.inner.lifecycle.external_refs()
    }

    /// Whether a lazy restore is armed for the next read or write.
    #[must_use]
    pub fn restore_pending(&self) -> bool {
        self.inner.lifecycle.restore_eligible()
    }

    /// Keys that currently have a field store.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.inner.fields.borrow().len()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    #[must_use]
    pub fn is_updating(&self) -> bool {
        self.inner.scheduler.is_updating()
    }

    #[must_use]
    pub fn scheduler_queue(&self) -> SchedulerSnapshot {
        self.inner.scheduler.snapshot()
    }

    #[must_use]
    pub fn stats(&self) -> FlushStats {
        self.inner.stats.get()
    }
}
