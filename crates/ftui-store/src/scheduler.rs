#![forbid(unsafe_code)]

//! Per-store write queue.
//!
//! Writes are applied to the State Map eagerly; the scheduler only records
//! *that* a key changed (and its latest value) so the notification can be
//! coalesced into one flush per tick.
//!
//! # Invariants
//!
//! 1. At most one flush is scheduled at a time: `push_task` asks the caller
//!    to schedule one only on the transition out of the idle state.
//! 2. Repeated pushes for one key keep the key's first position and the last
//!    value.
//! 3. `begin_flush` resets both flags *before* handing the queue over, so a
//!    write made while the flush runs schedules a fresh flush.

use std::cell::{Cell, RefCell};
use std::fmt;

use indexmap::{IndexMap, IndexSet};

use crate::value::{Fields, Value};

/// Completion callback queued by `set_state_with` / `restore_with`.
pub(crate) type CompletionCallback = Box<dyn FnOnce(&Fields)>;

/// The queue contents taken by one flush.
#[derive(Default)]
pub(crate) struct SchedulerQueue {
    /// Latest value per key; `None` marks a deletion.
    pub(crate) pending_values: IndexMap<String, Option<Value>>,
    /// Keys whose field stores must be notified, in first-push order.
    pub(crate) pending_tasks: IndexSet<String>,
    pub(crate) pending_callbacks: Vec<CompletionCallback>,
}

impl SchedulerQueue {
    pub(crate) fn is_empty(&self) -> bool {
        self.pending_tasks.is_empty() && self.pending_callbacks.is_empty()
    }
}

/// Read-only view of a store's scheduler, for inspection and tests.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SchedulerSnapshot {
    pub pending_values: IndexMap<String, Option<Value>>,
    pub pending_keys: Vec<String>,
    pub pending_callbacks: usize,
    /// A flush is scheduled.
    pub is_updating: bool,
    /// A write was queued since the last flush began.
    pub will_updating: bool,
}

#[derive(Default)]
pub(crate) struct Scheduler {
    queue: RefCell<SchedulerQueue>,
    is_updating: Cell<bool>,
    will_updating: Cell<bool>,
    draining_callbacks: Cell<bool>,
}

impl Scheduler {
    /// Record a changed key. Returns `true` when the caller must schedule a
    /// flush.
    pub(crate) fn push_task(&self, key: &str, value: Option<Value>) -> bool {
        {
            let mut queue = self.queue.borrow_mut();
            queue.pending_values.insert(key.to_owned(), value);
            queue.pending_tasks.insert(key.to_owned());
        }
        tracing::trace!(key, "push task");
        self.will_updating.set(true);
        self.arm()
    }

    /// Overwrite the queued value of `key` if it is still pending. Returns
    /// whether the key was queued.
    pub(crate) fn refresh_pending(&self, key: &str, value: Option<Value>) -> bool {
        match self.queue.borrow_mut().pending_values.get_mut(key) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Queue a completion callback. Returns `true` when the caller must
    /// schedule a flush.
    pub(crate) fn push_callback(&self, callback: CompletionCallback) -> bool {
        self.queue.borrow_mut().pending_callbacks.push(callback);
        self.arm()
    }

    fn arm(&self) -> bool {
        !self.is_updating.replace(true)
    }

    /// Reset flags and take everything queued so far.
    pub(crate) fn begin_flush(&self) -> SchedulerQueue {
        self.is_updating.set(false);
        self.will_updating.set(false);
        std::mem::take(&mut *self.queue.borrow_mut())
    }

    pub(crate) fn is_updating(&self) -> bool {
        self.is_updating.get()
    }

    pub(crate) fn draining_callbacks(&self) -> bool {
        self.draining_callbacks.get()
    }

    pub(crate) fn set_draining_callbacks(&self, draining: bool) {
        self.draining_callbacks.set(draining);
    }

    pub(crate) fn snapshot(&self) -> SchedulerSnapshot {
        let queue = self.queue.borrow();
        SchedulerSnapshot {
            pending_values: queue.pending_values.clone(),
            pending_keys: queue.pending_tasks.iter().cloned().collect(),
            pending_callbacks: queue.pending_callbacks.len(),
            is_updating: self.is_updating.get(),
            will_updating: self.will_updating.get(),
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.queue.borrow();
        f.debug_struct("Scheduler")
            .field("pending_keys", &queue.pending_tasks)
            .field("pending_callbacks", &queue.pending_callbacks.len())
            .field("is_updating", &self.is_updating.get())
            .field("will_updating", &self.will_updating.get())
            .finish()
    }
}
