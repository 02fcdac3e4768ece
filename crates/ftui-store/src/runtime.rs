#![forbid(unsafe_code)]

//! Root context shared by every store.
//!
//! A [`Runtime`] owns everything that would otherwise be process-wide state:
//!
//! - the microtask queue that deferred flushes and restore confirmations are
//!   posted to (the host drains it with [`Runtime::run_until_idle`]),
//! - the host batch function,
//! - the store registry (id lookup and namespace uniqueness),
//! - the dependency-recording stack used by selectors.
//!
//! # Invariants
//!
//! 1. Microtasks run in FIFO order; tasks queued while draining run in the
//!    same drain.
//! 2. A cancelled [`Deferred`] never runs.
//! 3. No internal borrow is held while a task, the batch function, or a
//!    tracked closure runs.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;

use crate::config::RuntimeConfig;
use crate::error::{Result, StoreError};
use crate::store::{Store, StoreInner};

/// Ids are unique across every runtime in the process, so a handle from
/// one runtime never resolves in another.
static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(u64);

impl StoreId {
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store#{}", self.0)
    }
}

type Task = Box<dyn FnOnce()>;

/// Host batch function: must invoke the closure exactly once, deferring any
/// framework-level re-render it triggers until it returns.
pub type BatchFn = Rc<dyn Fn(&mut dyn FnMut())>;

/// Result of draining the microtask queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The queue is empty.
    Idle { ran: usize },
    /// `max_flush_depth` tasks ran and more are still queued.
    Exhausted { ran: usize, remaining: usize },
}

impl DrainOutcome {
    #[must_use]
    pub fn ran(self) -> usize {
        match self {
            Self::Idle { ran } | Self::Exhausted { ran, .. } => ran,
        }
    }

    #[must_use]
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Idle { .. })
    }
}

/// Keys read while a tracking frame was active.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessLog {
    reads: IndexSet<(StoreId, String)>,
}

impl AccessLog {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.reads.len()
    }

    #[must_use]
    pub fn contains(&self, store: StoreId, key: &str) -> bool {
        self.reads.iter().any(|(id, k)| *id == store && k == key)
    }

    /// Keys read from `store`, in first-read order.
    pub fn keys_for(&self, store: StoreId) -> impl Iterator<Item = &str> + '_ {
        self.reads
            .iter()
            .filter(move |(id, _)| *id == store)
            .map(|(_, k)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (StoreId, &str)> + '_ {
        self.reads.iter().map(|(id, k)| (*id, k.as_str()))
    }
}

/// Handle to a task posted with [`Runtime::defer`].
#[derive(Clone, Debug)]
pub struct Deferred {
    cancelled: Rc<Cell<bool>>,
    done: Rc<Cell<bool>>,
}

impl Deferred {
    /// Prevent the task from running. No-op once it has run.
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    /// Still queued and not cancelled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.cancelled.get() && !self.done.get()
    }
}

struct RuntimeInner {
    config: RuntimeConfig,
    batch: BatchFn,
    queue: RefCell<VecDeque<Task>>,
    draining: Cell<bool>,
    stores: RefCell<HashMap<StoreId, Weak<StoreInner>>>,
    namespaces: RefCell<HashMap<String, StoreId>>,
    tracking: RefCell<Vec<AccessLog>>,
}

/// Shared root context. Cloning yields another handle to the same runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("pending_tasks", &self.pending_tasks())
            .field("stores", &self.inner.stores.borrow().len())
            .finish()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`Runtime`].
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    batch: Option<BatchFn>,
}

impl RuntimeBuilder {
    #[must_use]
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.config.strict = strict;
        self
    }

    /// Install the host batch function.
    #[must_use]
    pub fn batch(mut self, batch: impl Fn(&mut dyn FnMut()) + 'static) -> Self {
        self.batch = Some(Rc::new(batch));
        self
    }

    #[must_use]
    pub fn build(self) -> Runtime {
        let batch = self.batch.unwrap_or_else(|| Rc::new(|f: &mut dyn FnMut()| f()));
        Runtime {
            inner: Rc::new(RuntimeInner {
                config: self.config,
                batch,
                queue: RefCell::new(VecDeque::new()),
                draining: Cell::new(false),
                stores: RefCell::new(HashMap::new()),
                namespaces: RefCell::new(HashMap::new()),
                tracking: RefCell::new(Vec::new()),
            }),
        }
    }
}

impl Runtime {
    /// Runtime with default configuration and a pass-through batch function.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder {
            config: RuntimeConfig::default(),
            batch: None,
        }
    }

    #[must_use]
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::builder().config(config).build()
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Whether two handles refer to the same runtime.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // -- microtasks ---------------------------------------------------------

    /// Post a task to run on the next drain.
    pub fn queue_microtask(&self, task: impl FnOnce() + 'static) {
        self.inner.queue.borrow_mut().push_back(Box::new(task));
    }

    /// Post a cancellable task.
    pub fn defer(&self, task: impl FnOnce() + 'static) -> Deferred {
        let handle = Deferred {
            cancelled: Rc::new(Cell::new(false)),
            done: Rc::new(Cell::new(false)),
        };
        let cancelled = Rc::clone(&handle.cancelled);
        let done = Rc::clone(&handle.done);
        self.queue_microtask(move || {
            if cancelled.get() {
                return;
            }
            done.set(true);
            task();
        });
        handle
    }

    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    /// Run queued microtasks until the queue is empty or `max_flush_depth`
    /// tasks have run. Calling this from inside a task is a no-op.
    ///
    /// Panics raised by tasks (listeners, callbacks) propagate to the caller;
    /// the remaining tasks stay queued.
    pub fn run_until_idle(&self) -> DrainOutcome {
        if self.inner.draining.replace(true) {
            return DrainOutcome::Idle { ran: 0 };
        }
        let _guard = DrainGuard(&self.inner.draining);
        let limit = self.inner.config.max_flush_depth;
        let mut ran = 0;
        loop {
            if ran >= limit {
                let remaining = self.pending_tasks();
                if remaining > 0 {
                    tracing::warn!(ran, remaining, "microtask drain exhausted");
                    return DrainOutcome::Exhausted { ran, remaining };
                }
                return DrainOutcome::Idle { ran };
            }
            let next = self.inner.queue.borrow_mut().pop_front();
            let Some(task) = next else {
                return DrainOutcome::Idle { ran };
            };
            task();
            ran += 1;
        }
    }

    /// Run `f` inside the host batch function.
    pub fn batch(&self, f: impl FnOnce()) {
        let mut f = Some(f);
        (self.inner.batch)(&mut || {
            if let Some(f) = f.take() {
                f();
            }
        });
    }

    // -- registry -----------------------------------------------------------

    pub(crate) fn register(
        &self,
        namespace: Option<&str>,
        store: impl FnOnce(StoreId) -> Rc<StoreInner>,
    ) -> Result<Rc<StoreInner>> {
        if let Some(ns) = namespace {
            if self.inner.namespaces.borrow().contains_key(ns) {
                return Err(StoreError::DuplicateNamespace {
                    namespace: ns.to_owned(),
                });
            }
        }
        let id = StoreId(NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed));
        let inner = store(id);
        self.inner
            .stores
            .borrow_mut()
            .insert(id, Rc::downgrade(&inner));
        if let Some(ns) = namespace {
            self.inner.namespaces.borrow_mut().insert(ns.to_owned(), id);
        }
        Ok(inner)
    }

    pub(crate) fn unregister(&self, id: StoreId, namespace: Option<&str>) {
        self.inner.stores.borrow_mut().remove(&id);
        if let Some(ns) = namespace {
            let mut namespaces = self.inner.namespaces.borrow_mut();
            if namespaces.get(ns) == Some(&id) {
                namespaces.remove(ns);
            }
        }
    }

    /// Look up a live store by id. `api` names the caller for the error.
    ///
    /// # Errors
    ///
    /// [`StoreError::ForeignStore`] when the id belongs to another runtime
    /// or the store has been dropped.
    pub fn store(&self, id: StoreId, api: &'static str) -> Result<Store> {
        let found = self
            .inner
            .stores
            .borrow()
            .get(&id)
            .and_then(Weak::upgrade);
        found
            .map(Store::from_inner)
            .ok_or(StoreError::ForeignStore { api, id })
    }

    /// Look up a live store by namespace.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownNamespace`] when no live store uses `namespace`.
    pub fn store_by_namespace(&self, namespace: &str, api: &'static str) -> Result<Store> {
        let id = self.inner.namespaces.borrow().get(namespace).copied();
        id.and_then(|id| self.store(id, api).ok())
            .ok_or_else(|| StoreError::UnknownNamespace {
                api,
                namespace: namespace.to_owned(),
            })
    }

    /// Number of live stores.
    #[must_use]
    pub fn store_count(&self) -> usize {
        self.inner.stores.borrow().len()
    }

    // -- dependency tracking ------------------------------------------------

    /// Run `f` with a fresh tracking frame and return the keys it read.
    ///
    /// Frames nest: reads are recorded in the innermost frame only.
    pub fn track<R>(&self, f: impl FnOnce() -> R) -> (R, AccessLog) {
        self.inner.tracking.borrow_mut().push(AccessLog::default());
        let guard = TrackGuard(&self.inner.tracking);
        let result = f();
        (result, guard.finish())
    }

    /// Run `f` without recording reads into any active frame.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let saved = std::mem::take(&mut *self.inner.tracking.borrow_mut());
        let result = f();
        *self.inner.tracking.borrow_mut() = saved;
        result
    }

    #[must_use]
    pub fn is_tracking(&self) -> bool {
        !self.inner.tracking.borrow().is_empty()
    }

    pub(crate) fn record_read(&self, store: StoreId, key: &str) {
        if let Some(frame) = self.inner.tracking.borrow_mut().last_mut() {
            frame.reads.insert((store, key.to_owned()));
        }
    }
}

struct DrainGuard<'a>(&'a Cell<bool>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Pops the tracking frame if the tracked closure unwinds.
struct TrackGuard<'a>(&'a RefCell<Vec<AccessLog>>);

impl TrackGuard<'_> {
    fn finish(self) -> AccessLog {
        let log = self.0.borrow_mut().pop().unwrap_or_default();
        std::mem::forget(self);
        log
    }
}

impl Drop for TrackGuard<'_> {
    fn drop(&mut self) {
        self.0.borrow_mut().pop();
    }
}
