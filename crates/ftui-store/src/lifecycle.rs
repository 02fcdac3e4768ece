#![forbid(unsafe_code)]

//! Reference counting and restore-on-unmount.
//!
//! ```text
//!            subscribe                  last unsubscribe
//!   Idle ─────────────────▶ Active ─────────────────────▶ Idle
//!    ▲ │                                                   │
//!    │ └──────────── confirm (one microtask later) ────────┘
//!    │                        │
//!    └── subscribe ──── Restored
//! ```
//!
//! Teardown is two-phase. Releasing the last field subscription only posts
//! a cancellable confirm task; a subscription that arrives before the task
//! runs cancels it, so a quick unmount/remount pair never restores.
//!
//! When the confirm task runs it restores immediately for a fixed initial
//! value, or arms the one-shot `restore_eligible` flag for a factory
//! initializer so the factory only re-runs when someone reads again.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Weak;

use crate::runtime::Deferred;
use crate::store::StoreInner;

/// Observable lifecycle phase of a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// At least one field subscription is live.
    Active,
    /// No field subscription; no restore applied since the last one.
    Idle,
    /// Idle and restored (or armed for a lazy restore).
    Restored,
}

/// What the confirm step decided.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Confirm {
    Skip,
    RestoreNow,
    MarkEligible,
}

pub(crate) struct Lifecycle {
    ref_count: Cell<usize>,
    external_refs: Cell<usize>,
    unmount_restore: Cell<bool>,
    restore_eligible: Cell<bool>,
    state: Cell<LifecycleState>,
    pending: RefCell<Option<Deferred>>,
}

impl Lifecycle {
    pub(crate) fn new(unmount_restore: bool) -> Self {
        Self {
            ref_count: Cell::new(0),
            external_refs: Cell::new(0),
            unmount_restore: Cell::new(unmount_restore),
            restore_eligible: Cell::new(false),
            state: Cell::new(LifecycleState::Idle),
            pending: RefCell::new(None),
        }
    }

    pub(crate) fn state(&self) -> LifecycleState {
        self.state.get()
    }

    pub(crate) fn ref_count(&self) -> usize {
        self.ref_count.get()
    }

    pub(crate) fn external_refs(&self) -> usize {
        self.external_refs.get()
    }

    pub(crate) fn unmount_restore(&self) -> bool {
        self.unmount_restore.get()
    }

    pub(crate) fn set_unmount_restore(&self, enabled: bool) {
        self.unmount_restore.set(enabled);
    }

    pub(crate) fn restore_eligible(&self) -> bool {
        self.restore_eligible.get()
    }

    fn cancel_pending(&self) {
        if let Some(deferred) = self.pending.borrow_mut().take() {
            deferred.cancel();
        }
    }

    /// A field subscription was created.
    pub(crate) fn acquire(&self) {
        self.cancel_pending();
        self.ref_count.set(self.ref_count.get() + 1);
        self.state.set(LifecycleState::Active);
    }

    /// A field subscription was released. Returns `true` when the store just
    /// became unreferenced and a confirm task should be posted.
    pub(crate) fn release(&self) -> bool {
        let count = self.ref_count.get().saturating_sub(1);
        self.ref_count.set(count);
        if count > 0 {
            return false;
        }
        self.state.set(LifecycleState::Idle);
        self.external_refs.get() == 0
    }

    pub(crate) fn retain_external(&self) {
        self.cancel_pending();
        self.external_refs.set(self.external_refs.get() + 1);
    }

    /// Returns `true` when the last external reference went away while no
    /// field subscription exists.
    pub(crate) fn release_external(&self) -> bool {
        let count = self.external_refs.get().saturating_sub(1);
        self.external_refs.set(count);
        count == 0 && self.ref_count.get() == 0 && self.state.get() == LifecycleState::Idle
    }

    /// Remember the posted confirm task so a new subscription can cancel it.
    pub(crate) fn arm(&self, deferred: Deferred) {
        if let Some(previous) = self.pending.borrow_mut().replace(deferred) {
            previous.cancel();
        }
    }

    pub(crate) fn confirm(&self, factory: bool) -> Confirm {
        self.pending.borrow_mut().take();
        if self.ref_count.get() > 0
            || self.external_refs.get() > 0
            || !self.unmount_restore.get()
            || self.state.get() != LifecycleState::Idle
        {
            return Confirm::Skip;
        }
        self.state.set(LifecycleState::Restored);
        if factory {
            self.restore_eligible.set(true);
            Confirm::MarkEligible
        } else {
            Confirm::RestoreNow
        }
    }

    /// Consume the lazy-restore flag if a fresh read or write should restore now.
    pub(crate) fn take_eligible(&self) -> bool {
        if self.ref_count.get() == 0 && self.restore_eligible.get() {
            self.restore_eligible.set(false);
            return true;
        }
        false
    }

    /// An explicit restore makes any armed lazy restore redundant.
    pub(crate) fn clear_eligible(&self) {
        self.restore_eligible.set(false);
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("state", &self.state.get())
            .field("ref_count", &self.ref_count.get())
            .field("external_refs", &self.external_refs.get())
            .field("unmount_restore", &self.unmount_restore.get())
            .field("restore_eligible", &self.restore_eligible.get())
            .finish()
    }
}

/// A reference to a store held outside the field-subscription mechanism.
///
/// While any `ExternalRef` is alive the store is never restored on unmount.
/// Dropping the last one while the store is idle starts the usual deferred
/// restore check.
#[must_use = "dropping an ExternalRef releases it immediately"]
pub struct ExternalRef {
    store: Weak<StoreInner>,
}

impl ExternalRef {
    pub(crate) fn new(store: Weak<StoreInner>) -> Self {
        Self { store }
    }
}

impl Drop for ExternalRef {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            StoreInner::release_external(&store);
        }
    }
}

impl fmt::Debug for ExternalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalRef")
            .field("alive", &(self.store.strong_count() > 0))
            .finish()
    }
}
