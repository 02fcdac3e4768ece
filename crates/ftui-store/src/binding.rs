#![forbid(unsafe_code)]

//! Framework-neutral bindings on top of [`Store`] fields.
//!
//! - [`Binding<T>`]: a read-only view of one or more fields, re-evaluated on
//!   every `get()`.
//! - [`Selector<T>`]: a memoized derivation. It records which fields it read
//!   (through [`Runtime::track`]) and holds a field subscription on each of
//!   them, so it counts as a mounted consumer of those stores.
//! - [`BindingScope`]: owns subscriptions for a logical mount (a widget, a
//!   screen). Dropping the scope unmounts: every held subscription is
//!   released, which is what drives restore-on-unmount.
//!
//! # Usage
//!
//! ```ignore
//! use ftui_store::{Runtime, Store, StoreOptions, Selector, bind_map};
//! use serde_json::json;
//!
//! let rt = Runtime::new();
//! let store = Store::new(&rt, json!({"count": 0}), StoreOptions::default())?;
//!
//! let label = bind_map!(store, "count", |v| format!("Count: {}", v.and_then(|v| v.as_i64()).unwrap_or(0)));
//! assert_eq!(label.get(), "Count: 0");
//!
//! let s = store.clone();
//! let doubled = Selector::new(&rt, move || s.get("count").and_then(|v| v.as_i64()).unwrap_or(0) * 2);
//! assert_eq!(doubled.get()?, 0);
//! ```
//!
//! # Invariants
//!
//! 1. `Binding::get()` always reads the current State Map (no caching).
//! 2. `Selector::get()` recomputes only after one of its recorded fields was
//!    notified; otherwise it returns the cached value.
//! 3. A selector's dependency set is replaced on every recomputation. New
//!    subscriptions are taken before the old ones are released, so a store
//!    read on both passes never sees its reference count drop to zero.
//! 4. `BindingScope` releases its subscriptions in reverse registration
//!    order.
//!
//! # Failure Modes
//!
//! - A selector that reads itself while computing gets
//!   [`StoreError::CyclicRead`] instead of recursing.
//! - Transform panic: propagates to the caller of `get()`; a selector stays
//!   dirty and recomputes on the next read.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{Result, StoreError};
use crate::field::FieldSubscription;
use crate::listener::{Commit, ListenerSubscription};
use crate::runtime::{AccessLog, Runtime};
use crate::store::Store;
use crate::value::Value;

// ---------------------------------------------------------------------------
// Binding<T>
// ---------------------------------------------------------------------------

/// A read-only binding evaluated on each `get()` call.
pub struct Binding<T> {
    eval: Rc<dyn Fn() -> T>,
}

impl<T> Clone for Binding<T> {
    fn clone(&self) -> Self {
        Self {
            eval: Rc::clone(&self.eval),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Binding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("value", &self.get())
            .finish()
    }
}

impl<T: 'static> Binding<T> {
    pub fn new(f: impl Fn() -> T + 'static) -> Self {
        Self { eval: Rc::new(f) }
    }

    #[must_use]
    pub fn get(&self) -> T {
        (self.eval)()
    }

    /// Apply a further transform, returning a new `Binding`.
    pub fn then<U: 'static>(self, f: impl Fn(T) -> U + 'static) -> Binding<U> {
        Binding {
            eval: Rc::new(move || f((self.eval)())),
        }
    }
}

/// Bind directly to one field.
pub fn bind_field(store: &Store, key: impl Into<String>) -> Binding<Option<Value>> {
    let store = store.clone();
    let key = key.into();
    Binding::new(move || store.get(&key))
}

/// Bind to one field through `map`.
pub fn bind_mapped<T: 'static>(
    store: &Store,
    key: impl Into<String>,
    map: impl Fn(Option<&Value>) -> T + 'static,
) -> Binding<T> {
    let store = store.clone();
    let key = key.into();
    Binding::new(move || map(store.get(&key).as_ref()))
}

/// Bind to two fields (possibly of different stores) combined by `map`.
pub fn bind_mapped2<T: 'static>(
    s1: &Store,
    k1: impl Into<String>,
    s2: &Store,
    k2: impl Into<String>,
    map: impl Fn(Option<&Value>, Option<&Value>) -> T + 'static,
) -> Binding<T> {
    let (s1, k1) = (s1.clone(), k1.into());
    let (s2, k2) = (s2.clone(), k2.into());
    Binding::new(move || map(s1.get(&k1).as_ref(), s2.get(&k2).as_ref()))
}

// ---------------------------------------------------------------------------
// Selector<T>
// ---------------------------------------------------------------------------

struct SelectorInner<T> {
    runtime: Runtime,
    compute: Box<dyn Fn() -> T>,
    cache: RefCell<Option<T>>,
    dirty: Cell<bool>,
    computing: Cell<bool>,
    deps: RefCell<AccessLog>,
    subs: RefCell<Vec<FieldSubscription>>,
}

/// Resets the `computing` flag even if the computation unwinds.
struct ComputeGuard<'a>(&'a Cell<bool>);

impl Drop for ComputeGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// A memoized, dependency-tracked derivation over store fields.
///
/// Cloning shares the cache and the subscriptions.
pub struct Selector<T> {
    inner: Rc<SelectorInner<T>>,
}

impl<T> Clone for Selector<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Selector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("cached", &self.inner.cache.borrow())
            .field("dirty", &self.inner.dirty.get())
            .field("dependencies", &self.inner.deps.borrow().len())
            .finish()
    }
}

impl<T: Clone + 'static> Selector<T> {
    /// Create a selector. Nothing is computed until the first `get()`.
    pub fn new(runtime: &Runtime, compute: impl Fn() -> T + 'static) -> Self {
        Self {
            inner: Rc::new(SelectorInner {
                runtime: runtime.clone(),
                compute: Box::new(compute),
                cache: RefCell::new(None),
                dirty: Cell::new(true),
                computing: Cell::new(false),
                deps: RefCell::new(AccessLog::default()),
                subs: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Current value, recomputed if any dependency changed.
    ///
    /// # Errors
    ///
    /// [`StoreError::CyclicRead`] when called from inside its own
    /// computation.
    pub fn get(&self) -> Result<T> {
        let inner = &self.inner;
        if inner.computing.get() {
            return Err(StoreError::CyclicRead);
        }
        if !inner.dirty.get() {
            if let Some(value) = inner.cache.borrow().as_ref() {
                return Ok(value.clone());
            }
        }

        inner.computing.set(true);
        let (value, log) = {
            let _guard = ComputeGuard(&inner.computing);
            inner.runtime.track(|| (inner.compute)())
        };
        tracing::trace!(dependencies = log.len(), "selector recomputed");

        let fresh = self.subscribe_all(&log);
        let stale = std::mem::replace(&mut *inner.subs.borrow_mut(), fresh);
        *inner.deps.borrow_mut() = log;
        *inner.cache.borrow_mut() = Some(value.clone());
        inner.dirty.set(false);
        drop(stale);
        Ok(value)
    }

    fn subscribe_all(&self, log: &AccessLog) -> Vec<FieldSubscription> {
        let mut subs = Vec::with_capacity(log.len());
        for (id, key) in log.iter() {
            let store = match self.inner.runtime.store(id, "selector") {
                Ok(store) => store,
                Err(err) => {
                    tracing::debug!(error = %err, "selector dependency dropped");
                    continue;
                }
            };
            let weak: Weak<SelectorInner<T>> = Rc::downgrade(&self.inner);
            subs.push(store.subscribe_field(key, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.dirty.set(true);
                }
            }));
        }
        subs
    }

    /// Whether the next `get()` will recompute.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.get()
    }

    /// Fields read by the last computation.
    #[must_use]
    pub fn dependencies(&self) -> AccessLog {
        self.inner.deps.borrow().clone()
    }

    /// Drop the cache and every dependency subscription.
    pub fn reset(&self) {
        let stale = std::mem::take(&mut *self.inner.subs.borrow_mut());
        *self.inner.deps.borrow_mut() = AccessLog::default();
        self.inner.cache.borrow_mut().take();
        self.inner.dirty.set(true);
        drop(stale);
    }
}

// ---------------------------------------------------------------------------
// Macros
// ---------------------------------------------------------------------------

/// Create a direct [`Binding`] to a store field.
///
/// ```ignore
/// let b = bind!(store, "count");
/// ```
#[macro_export]
macro_rules! bind {
    ($store:expr, $key:expr) => {
        $crate::binding::bind_field(&$store, $key)
    };
}

/// Create a mapped [`Binding`] to a store field.
///
/// ```ignore
/// let label = bind_map!(store, "count", |v| format!("{v:?}"));
/// ```
#[macro_export]
macro_rules! bind_map {
    ($store:expr, $key:expr, $f:expr) => {
        $crate::binding::bind_mapped(&$store, $key, $f)
    };
}

/// Create a [`Binding`] from two store fields.
///
/// ```ignore
/// let area = bind_map2!(store, "w", store, "h", |w, h| ...);
/// ```
#[macro_export]
macro_rules! bind_map2 {
    ($s1:expr, $k1:expr, $s2:expr, $k2:expr, $f:expr) => {
        $crate::binding::bind_mapped2(&$s1, $k1, &$s2, $k2, $f)
    };
}

// ---------------------------------------------------------------------------
// BindingScope
// ---------------------------------------------------------------------------

enum Held {
    Field(FieldSubscription),
    Listener(ListenerSubscription),
    Selector(Box<dyn SelectorHandle>),
}

/// Type-erased selector so a scope can reset selectors of any `T`.
trait SelectorHandle {
    fn release(&self);
}

impl<T: Clone + 'static> SelectorHandle for Selector<T> {
    fn release(&self) {
        self.reset();
    }
}

/// Collects the subscriptions of one mount.
///
/// Dropping the scope (or calling [`clear`](Self::clear)) releases them, in
/// reverse registration order. Field subscriptions and selectors count
/// towards the stores' reference counts; listeners do not.
#[derive(Default)]
pub struct BindingScope {
    held: Vec<Held>,
}

impl BindingScope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep an existing field subscription alive for the scope's lifetime.
    pub fn hold(&mut self, sub: FieldSubscription) -> &mut Self {
        self.held.push(Held::Field(sub));
        self
    }

    pub fn hold_listener(&mut self, sub: ListenerSubscription) -> &mut Self {
        self.held.push(Held::Listener(sub));
        self
    }

    /// Subscribe to one field within this scope.
    pub fn subscribe(
        &mut self,
        store: &Store,
        key: &str,
        callback: impl Fn() + 'static,
    ) -> &mut Self {
        let sub = store.subscribe_field(key, callback);
        self.hold(sub)
    }

    /// Listen to store commits within this scope.
    pub fn listen(&mut self, store: &Store, listener: impl Fn(&Commit) + 'static) -> &mut Self {
        let sub = store.subscribe(listener);
        self.hold_listener(sub)
    }

    /// Bind to a field and mount it: the field is subscribed for the
    /// scope's lifetime so the store counts it as a consumer.
    pub fn bind(&mut self, store: &Store, key: &str) -> Binding<Option<Value>> {
        self.subscribe(store, key, || {});
        bind_field(store, key)
    }

    /// Mapped variant of [`bind`](Self::bind).
    pub fn bind_map<T: 'static>(
        &mut self,
        store: &Store,
        key: &str,
        map: impl Fn(Option<&Value>) -> T + 'static,
    ) -> Binding<T> {
        self.subscribe(store, key, || {});
        bind_mapped(store, key, map)
    }

    /// Create a selector whose subscriptions end with the scope.
    pub fn select<T: Clone + 'static>(
        &mut self,
        runtime: &Runtime,
        compute: impl Fn() -> T + 'static,
    ) -> Selector<T> {
        let selector = Selector::new(runtime, compute);
        self.held.push(Held::Selector(Box::new(selector.clone())));
        selector
    }

    /// Number of held subscriptions and selectors.
    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.held.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Release everything now. The scope stays usable.
    pub fn clear(&mut self) {
        while let Some(held) = self.held.pop() {
            match held {
                Held::Field(sub) => sub.unsubscribe(),
                Held::Listener(sub) => sub.unsubscribe(),
                Held::Selector(selector) => selector.release(),
            }
        }
    }
}

impl Drop for BindingScope {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for BindingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingScope")
            .field("binding_count", &self.held.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreOptions;
    use crate::lifecycle::LifecycleState;
    use serde_json::json;

    fn setup(initial: serde_json::Value) -> (Runtime, Store) {
        let rt = Runtime::new();
        let store = Store::new(&rt, initial, StoreOptions::default()).unwrap();
        (rt, store)
    }

    fn int(v: Option<&Value>) -> i64 {
        v.and_then(Value::as_i64).unwrap_or(0)
    }

    #[test]
    fn binding_reads_current_value() {
        let (rt, store) = setup(json!({"count": 3}));
        let b = bind_field(&store, "count");
        assert_eq!(b.get(), Some(Value::from(3)));
        store.set("count", 4).unwrap();
        assert_eq!(b.get(), Some(Value::from(4)));
        rt.run_until_idle();
        assert_eq!(b.get(), Some(Value::from(4)));
    }

    #[test]
    fn binding_map_and_then() {
        let (_rt, store) = setup(json!({"count": 5}));
        let label = bind_mapped(&store, "count", |v| format!("items: {}", int(v)));
        assert_eq!(label.get(), "items: 5");
        let doubled = bind_mapped(&store, "count", int).then(|n| n * 2);
        assert_eq!(doubled.get(), 10);
    }

    #[test]
    fn binding_map2_across_stores() {
        let rt = Runtime::new();
        let a = Store::new(&rt, json!({"w": 10}), StoreOptions::default()).unwrap();
        let b = Store::new(&rt, json!({"h": 20}), StoreOptions::default()).unwrap();
        let area = bind_mapped2(&a, "w", &b, "h", |w, h| int(w) * int(h));
        assert_eq!(area.get(), 200);
        a.set("w", 5).unwrap();
        assert_eq!(area.get(), 100);
    }

    #[test]
    fn bind_macros() {
        let (_rt, store) = setup(json!({"a": 3, "b": 4}));
        assert_eq!(crate::bind!(store, "a").get(), Some(Value::from(3)));
        assert_eq!(crate::bind_map!(store, "a", |v| int(v) * 10).get(), 30);
        assert_eq!(
            crate::bind_map2!(store, "a", store, "b", |x, y| int(x) + int(y)).get(),
            7
        );
    }

    #[test]
    fn selector_memoizes_until_dependency_changes() {
        let (rt, store) = setup(json!({"a": 1, "b": 100}));
        let runs = Rc::new(Cell::new(0));
        let (s, r) = (store.clone(), Rc::clone(&runs));
        let sel = Selector::new(&rt, move || {
            r.set(r.get() + 1);
            int(s.get("a").as_ref()) * 2
        });

        assert_eq!(sel.get().unwrap(), 2);
        assert_eq!(sel.get().unwrap(), 2);
        assert_eq!(runs.get(), 1);
        assert!(sel.dependencies().contains(store.id(), "a"));
        assert_eq!(store.ref_count(), 1);

        store.set("b", 0).unwrap();
        rt.run_until_idle();
        assert!(!sel.is_dirty());

        store.set("a", 4).unwrap();
        rt.run_until_idle();
        assert!(sel.is_dirty());
        assert_eq!(sel.get().unwrap(), 8);
        assert_eq!(runs.get(), 2);
        assert_eq!(store.ref_count(), 1);
    }

    #[test]
    fn selector_tracks_dynamic_dependencies() {
        let (rt, store) = setup(json!({"flag": true, "x": 1, "y": 2}));
        let s = store.clone();
        let sel = Selector::new(&rt, move || {
            let key = if s.get("flag").and_then(|v| v.as_bool()) == Some(true) {
                "x"
            } else {
                "y"
            };
            int(s.get(key).as_ref())
        });
        assert_eq!(sel.get().unwrap(), 1);

        store.set("flag", false).unwrap();
        rt.run_until_idle();
        assert_eq!(sel.get().unwrap(), 2);
        let deps = sel.dependencies();
        assert!(deps.contains(store.id(), "y"));
        assert!(!deps.contains(store.id(), "x"));
    }

    #[test]
    fn selector_rejects_reentrant_read() {
        let rt = Runtime::new();
        let slot: Rc<RefCell<Option<Selector<bool>>>> = Rc::new(RefCell::new(None));
        let s = Rc::clone(&slot);
        let sel = Selector::new(&rt, move || {
            let me = s.borrow().clone();
            me.is_some_and(|me| matches!(me.get(), Err(StoreError::CyclicRead)))
        });
        *slot.borrow_mut() = Some(sel.clone());
        assert!(sel.get().unwrap());
        slot.borrow_mut().take();
    }

    #[test]
    fn scope_drop_unmounts_store() {
        let (rt, store) = setup(json!({"a": 0}));
        {
            let mut scope = BindingScope::new();
            let b = scope.bind(&store, "a");
            assert_eq!(b.get(), Some(Value::from(0)));
            store.set("a", 9).unwrap();
            rt.run_until_idle();
            assert_eq!(store.lifecycle(), LifecycleState::Active);
        }
        assert_eq!(store.ref_count(), 0);
        rt.run_until_idle();
        assert_eq!(store.lifecycle(), LifecycleState::Restored);
        assert_eq!(store.get("a"), Some(Value::from(0)));
    }

    #[test]
    fn scope_releases_selectors() {
        let (rt, store) = setup(json!({"a": 1}));
        let mut scope = BindingScope::new();
        let s = store.clone();
        let sel = scope.select(&rt, move || int(s.get("a").as_ref()));
        assert_eq!(sel.get().unwrap(), 1);
        assert_eq!(store.ref_count(), 1);
        assert_eq!(scope.binding_count(), 1);

        scope.clear();
        assert!(scope.is_empty());
        assert_eq!(store.ref_count(), 0);
        assert!(sel.is_dirty());
    }

    #[test]
    fn scope_listener_does_not_count_as_consumer() {
        let (rt, store) = setup(json!({"a": 1}));
        let seen = Rc::new(Cell::new(0));
        let mut scope = BindingScope::new();
        let s = Rc::clone(&seen);
        scope.listen(&store, move |_| s.set(s.get() + 1));
        assert_eq!(store.ref_count(), 0);
        assert_eq!(store.listener_count(), 1);

        store.set("a", 2).unwrap();
        rt.run_until_idle();
        assert_eq!(seen.get(), 1);

        drop(scope);
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn scope_releases_in_reverse_order() {
        let (_rt, store) = setup(json!({"a": 1, "b": 2}));
        let mut scope = BindingScope::new();
        scope.subscribe(&store, "a", || {}).subscribe(&store, "b", || {});
        assert_eq!(store.field_count(), 2);
        scope.clear();
        assert_eq!(store.field_count(), 0);
        assert_eq!(format!("{scope:?}"), "BindingScope { binding_count: 0 }");
    }
}
