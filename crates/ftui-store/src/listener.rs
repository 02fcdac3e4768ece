#![forbid(unsafe_code)]

//! Store-level observers.
//!
//! Listeners see whole commits rather than single fields. Every listener of
//! one flush receives the same [`Commit`] (shared through an `Rc`), so no
//! listener can observe a partially applied flush.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{Result, StoreError};
use crate::store::StoreInner;
use crate::value::Fields;

/// One committed flush.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Commit {
    /// Changed fields that still exist, with their committed values.
    pub effect: Fields,
    /// Keys deleted by this commit.
    pub removed: Vec<String>,
    /// State before the first write of the tick.
    pub prev: Fields,
    /// State at commit time.
    pub next: Fields,
}

impl Commit {
    /// Every key this commit touched: updates first, then removals.
    pub fn changed_keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.effect
            .keys()
            .map(String::as_str)
            .chain(self.removed.iter().map(String::as_str))
    }

    #[must_use]
    pub fn touches(&self, key: &str) -> bool {
        self.effect.contains_key(key) || self.removed.iter().any(|k| k == key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.effect.is_empty() && self.removed.is_empty()
    }
}

type ListenerFn = Rc<dyn Fn(&Commit)>;

struct ListenerEntry {
    id: u64,
    keys: Option<Rc<[String]>>,
    listener: ListenerFn,
}

#[derive(Default)]
pub(crate) struct ListenerSet {
    entries: RefCell<Vec<ListenerEntry>>,
    next_id: Cell<u64>,
}

impl ListenerSet {
    pub(crate) fn add(&self, listener: ListenerFn, keys: Option<Vec<String>>) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.entries.borrow_mut().push(ListenerEntry {
            id,
            keys: keys.map(Rc::from),
            listener,
        });
        id
    }

    pub(crate) fn remove(&self, id: u64) {
        self.entries.borrow_mut().retain(|e| e.id != id);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Deliver `commit` to every qualifying listener registered when the
    /// dispatch starts. Returns the number of listeners invoked.
    pub(crate) fn dispatch(&self, commit: &Rc<Commit>) -> usize {
        if commit.is_empty() {
            return 0;
        }
        let snapshot: Vec<(Option<Rc<[String]>>, ListenerFn)> = self
            .entries
            .borrow()
            .iter()
            .map(|e| (e.keys.clone(), Rc::clone(&e.listener)))
            .collect();
        let mut fired = 0;
        for (keys, listener) in snapshot {
            let wanted = keys
                .as_deref()
                .is_none_or(|keys| keys.iter().any(|k| commit.touches(k)));
            if wanted {
                listener(commit.as_ref());
                fired += 1;
            }
        }
        fired
    }
}

/// Check a listener key filter.
pub(crate) fn validate_filter(keys: &[&str]) -> Result<Vec<String>> {
    if keys.is_empty() {
        return Err(StoreError::InvalidKeyFilter {
            reason: "filter is empty",
        });
    }
    if keys.iter().any(|k| k.trim().is_empty()) {
        return Err(StoreError::InvalidKeyFilter {
            reason: "filter contains a blank key",
        });
    }
    Ok(keys.iter().map(|k| (*k).to_owned()).collect())
}

/// RAII guard for a store listener.
#[must_use = "dropping a ListenerSubscription removes the listener"]
pub struct ListenerSubscription {
    store: Weak<StoreInner>,
    id: u64,
    active: Cell<bool>,
}

impl ListenerSubscription {
    pub(crate) fn new(store: Weak<StoreInner>, id: u64) -> Self {
        Self {
            store,
            id,
            active: Cell::new(true),
        }
    }

    /// Remove the listener now. Idempotent.
    pub fn unsubscribe(&self) {
        if !self.active.replace(false) {
            return;
        }
        if let Some(store) = self.store.upgrade() {
            store.listeners().remove(self.id);
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.get()
    }
}

impl Drop for ListenerSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for ListenerSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSubscription")
            .field("id", &self.id)
            .field("active", &self.active.get())
            .finish()
    }
}
