#![forbid(unsafe_code)]

//! Fine-grained reactive state containers for FrankenTUI.
//!
//! A [`Store`] holds a flat table of named fields. Writes are applied to the
//! table immediately, but subscriber notification is deferred to a microtask
//! and coalesced per key, so a burst of writes in one tick produces a single
//! notification for each changed field.
//!
//! This crate provides:
//! - [`Runtime`]: the root context (microtask queue, host batch function,
//!   store registry, dependency tracking)
//! - [`Store`]: the container facade (reads, writes, restore, subscriptions)
//! - [`FieldSubscription`] / [`ListenerSubscription`]: RAII guards
//! - [`Binding`], [`Selector`], [`BindingScope`]: framework-neutral bindings
//!
//! # Example
//!
//! ```ignore
//! use ftui_store::{Runtime, Store, StoreOptions};
//! use serde_json::json;
//!
//! let rt = Runtime::new();
//! let store = Store::new(&rt, json!({"count": 0}), StoreOptions::default())?;
//! let _sub = store.subscribe_field("count", || println!("count changed"));
//!
//! store.set("count", 1)?;
//! store.set("count", 2)?;
//! rt.run_until_idle(); // prints once
//! ```

pub mod binding;
pub mod config;
pub mod error;
pub mod field;
pub mod lifecycle;
pub mod listener;
pub mod runtime;
pub mod scheduler;
pub mod store;
pub mod update;
pub mod value;

pub use binding::{Binding, BindingScope, Selector, bind_field, bind_mapped, bind_mapped2};
pub use config::{DEFAULT_MAX_FLUSH_DEPTH, RuntimeConfig, StoreOptions, StoreOptionsPatch};
pub use error::{Result, StoreError};
pub use field::{FieldHandle, FieldSubscription};
pub use lifecycle::{ExternalRef, LifecycleState};
pub use listener::{Commit, ListenerSubscription};
pub use runtime::{AccessLog, BatchFn, Deferred, DrainOutcome, Runtime, RuntimeBuilder, StoreId};
pub use scheduler::SchedulerSnapshot;
pub use store::{FlushStats, Store, StoreBuilder};
pub use update::Update;
pub use value::{Action, Fields, Initial, Value, fields_to_json};
