//! End-to-end store scenarios: write, flush, dispatch, unmount, restore.
//!
//! Run with `RUST_LOG=ftui_store=trace` to see the flush spans.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ftui_store::{
    BindingScope, Commit, Fields, LifecycleState, Runtime, Store, StoreError, StoreOptions, Update,
    Value, fields_to_json,
};
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn counting_runtime() -> (Runtime, Rc<Cell<u32>>) {
    let batches = Rc::new(Cell::new(0));
    let b = Rc::clone(&batches);
    let rt = Runtime::builder()
        .batch(move |f| {
            b.set(b.get() + 1);
            f();
        })
        .build();
    (rt, batches)
}

fn int(store: &Store, key: &str) -> Option<i64> {
    store.get(key).and_then(|v| v.as_i64())
}

#[test]
fn listener_receives_effect_prev_next() {
    init_tracing();
    let rt = Runtime::new();
    let store = Store::new(&rt, json!({"count": 0, "text": "a"}), StoreOptions::default()).unwrap();

    let commits: Rc<RefCell<Vec<Commit>>> = Rc::new(RefCell::new(Vec::new()));
    let c = Rc::clone(&commits);
    let _listener = store.subscribe(move |commit| c.borrow_mut().push(commit.clone()));

    store.set_state(json!({"count": 1})).unwrap();
    assert!(commits.borrow().is_empty(), "dispatch waits for the flush");
    rt.run_until_idle();

    let commits = commits.borrow();
    assert_eq!(commits.len(), 1);
    assert_eq!(fields_to_json(&commits[0].effect), json!({"count": 1}));
    assert_eq!(fields_to_json(&commits[0].prev), json!({"count": 0, "text": "a"}));
    assert_eq!(fields_to_json(&commits[0].next), json!({"count": 1, "text": "a"}));
}

#[test]
fn three_producers_one_flush() {
    init_tracing();
    let (rt, batches) = counting_runtime();
    let store = Store::new(&rt, json!({"count": 10}), StoreOptions::default()).unwrap();
    let hits = Rc::new(Cell::new(0));
    let h = Rc::clone(&hits);
    let _sub = store.subscribe_field("count", move || h.set(h.get() + 1));

    for _ in 0..3 {
        store
            .set_state(Update::producer(|prev| {
                json!({"count": prev["count"].as_i64().unwrap_or(0) + 1})
            }))
            .unwrap();
    }
    assert_eq!(int(&store, "count"), Some(13));
    rt.run_until_idle();

    assert_eq!(int(&store, "count"), Some(13));
    assert_eq!(hits.get(), 1);
    assert_eq!(batches.get(), 1);
    assert_eq!(store.stats().flushes, 1);
}

#[test]
fn subscribers_see_last_write_value() {
    let rt = Runtime::new();
    let store = Store::new(&rt, json!({"a": 0}), StoreOptions::default()).unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let (s, st) = (Rc::clone(&seen), store.clone());
    let _sub = store.subscribe_field("a", move || s.borrow_mut().push(int(&st, "a")));

    store.set("a", 1).unwrap();
    store.set("a", 2).unwrap();
    store.set("a", 3).unwrap();
    rt.run_until_idle();
    assert_eq!(*seen.borrow(), vec![Some(3)]);
}

#[test]
fn completion_callback_observes_committed_state() {
    let rt = Runtime::new();
    let store = Store::new(&rt, json!({"x": 0}), StoreOptions::default()).unwrap();
    let observed = Rc::new(Cell::new(None));
    let o = Rc::clone(&observed);
    store
        .set_state_with(json!({"x": 1}), move |next| {
            o.set(next.get("x").and_then(Value::as_i64));
        })
        .unwrap();
    rt.run_until_idle();
    assert_eq!(observed.get(), Some(1));
}

#[test]
fn key_isolation_and_filtered_listeners() {
    let rt = Runtime::new();
    let store = Store::new(&rt, json!({"a": 0, "b": 0}), StoreOptions::default()).unwrap();

    let a_field = Rc::new(Cell::new(0));
    let a_listener = Rc::new(Cell::new(0));
    let any_listener = Rc::new(Cell::new(0));

    let f = Rc::clone(&a_field);
    let _fa = store.subscribe_field("a", move || f.set(f.get() + 1));
    let l = Rc::clone(&a_listener);
    let _la = store
        .subscribe_keys(&["a"], move |_| l.set(l.get() + 1))
        .unwrap();
    let l = Rc::clone(&any_listener);
    let _lany = store.subscribe(move |_| l.set(l.get() + 1));

    store.set("b", 1).unwrap();
    rt.run_until_idle();
    assert_eq!((a_field.get(), a_listener.get(), any_listener.get()), (0, 0, 1));

    store.set_state(json!({"a": 1, "b": 2})).unwrap();
    rt.run_until_idle();
    assert_eq!((a_field.get(), a_listener.get(), any_listener.get()), (1, 1, 2));
}

#[test]
fn same_value_writes_never_notify() {
    let rt = Runtime::new();
    let store = Store::new(&rt, json!({"a": [1, 2], "b": null}), StoreOptions::default()).unwrap();
    let hits = Rc::new(Cell::new(0));
    let h = Rc::clone(&hits);
    let _sub = store.subscribe(move |_| h.set(h.get() + 1));

    store.set("a", json!([1, 2])).unwrap();
    store.set_state(json!({"b": null})).unwrap();
    store.sync_update(json!({"a": [1, 2]})).unwrap();
    rt.run_until_idle();
    assert_eq!(hits.get(), 0);

    // null and absent are different states.
    store.set_state(json!({"c": null})).unwrap();
    rt.run_until_idle();
    assert_eq!(hits.get(), 1);
}

#[test]
fn restore_readds_deleted_and_clears_late_keys() {
    let rt = Runtime::new();
    let store = Store::new(&rt, json!({"a": 1, "b": 2}), StoreOptions::default()).unwrap();
    store.remove("a").unwrap();
    store.set("late", "x").unwrap();
    store.set("b", 20).unwrap();
    rt.run_until_idle();
    assert_eq!(store.to_json(), json!({"b": 20, "late": "x"}));

    store.restore().unwrap();
    rt.run_until_idle();
    assert!(store.contains_key("a"));
    assert!(!store.contains_key("late"));
    assert_eq!(int(&store, "a"), Some(1));
    assert_eq!(int(&store, "b"), Some(2));
}

#[test]
fn unmount_restores_plain_initial() {
    init_tracing();
    let rt = Runtime::new();
    let store = Store::new(&rt, json!({"n": 0}), StoreOptions::default()).unwrap();

    let sub = store.subscribe_field("n", || {});
    store.set("n", 5).unwrap();
    rt.run_until_idle();
    assert_eq!(store.lifecycle(), LifecycleState::Active);

    drop(sub);
    assert_eq!(store.lifecycle(), LifecycleState::Idle);
    assert_eq!(int(&store, "n"), Some(5), "restore is deferred");

    rt.run_until_idle();
    assert_eq!(store.lifecycle(), LifecycleState::Restored);
    assert_eq!(int(&store, "n"), Some(0));
}

#[test]
fn unmount_restore_disabled_keeps_state() {
    let rt = Runtime::new();
    let store = Store::new(
        &rt,
        json!({"session": "anon"}),
        StoreOptions::new().unmount_restore(false),
    )
    .unwrap();

    let sub = store.subscribe_field("session", || {});
    store.set("session", "alice").unwrap();
    rt.run_until_idle();
    drop(sub);
    rt.run_until_idle();

    assert_eq!(store.lifecycle(), LifecycleState::Idle);
    assert_eq!(store.get("session"), Some(Value::from("alice")));
}

#[test]
fn set_options_takes_effect_at_confirm_time() {
    let rt = Runtime::new();
    let store = Store::new(&rt, json!({"n": 0}), StoreOptions::default()).unwrap();
    let sub = store.subscribe_field("n", || {});
    store.set("n", 1).unwrap();
    rt.run_until_idle();

    drop(sub);
    store.set_unmount_restore(false);
    rt.run_until_idle();
    assert_eq!(int(&store, "n"), Some(1));
}

#[test]
fn quick_remount_cancels_restore() {
    let rt = Runtime::new();
    let store = Store::new(&rt, json!({"n": 0}), StoreOptions::default()).unwrap();
    let sub = store.subscribe_field("n", || {});
    store.set("n", 7).unwrap();
    rt.run_until_idle();

    drop(sub);
    let _again = store.subscribe_field("n", || {});
    rt.run_until_idle();

    assert_eq!(store.lifecycle(), LifecycleState::Active);
    assert_eq!(int(&store, "n"), Some(7));
}

#[test]
fn external_ref_vetoes_restore() {
    let rt = Runtime::new();
    let store = Store::new(&rt, json!({"n": 0}), StoreOptions::default()).unwrap();
    let keep = store.retain();
    let sub = store.subscribe_field("n", || {});
    store.set("n", 3).unwrap();
    rt.run_until_idle();

    drop(sub);
    rt.run_until_idle();
    assert_eq!(int(&store, "n"), Some(3));

    drop(keep);
    rt.run_until_idle();
    assert_eq!(int(&store, "n"), Some(0));
}

#[test]
fn factory_restore_is_lazy() {
    let rt = Runtime::new();
    let calls = Rc::new(Cell::new(0));
    let c = Rc::clone(&calls);
    let store = Store::builder(&rt)
        .factory(move || {
            c.set(c.get() + 1);
            json!({"items": []})
        })
        .build()
        .unwrap();
    assert_eq!(calls.get(), 1);

    let sub = store.subscribe_field("items", || {});
    store.set("items", json!([1, 2, 3])).unwrap();
    rt.run_until_idle();
    drop(sub);
    rt.run_until_idle();

    assert_eq!(store.lifecycle(), LifecycleState::Restored);
    assert!(store.restore_pending());
    assert_eq!(calls.get(), 1, "factory not re-run at unmount");

    assert_eq!(store.get("items"), Some(Value::from(json!([]))));
    assert_eq!(calls.get(), 2);
    assert!(!store.restore_pending());

    let _ = store.get("items");
    assert_eq!(calls.get(), 2, "lazy restore runs once");
}

#[test]
fn factory_remount_skips_recompute() {
    let rt = Runtime::new();
    let calls = Rc::new(Cell::new(0));
    let c = Rc::clone(&calls);
    let store = Store::builder(&rt)
        .factory(move || {
            c.set(c.get() + 1);
            json!({"n": 0})
        })
        .build()
        .unwrap();

    let sub = store.subscribe_field("n", || {});
    drop(sub);
    let _remount = store.subscribe_field("n", || {});
    rt.run_until_idle();
    let _ = store.get("n");
    assert_eq!(calls.get(), 1);
}

fn unmounted_counter(rt: &Runtime) -> Store {
    let store = Store::builder(rt)
        .factory(|| json!({"n": 0, "tag": "fresh"}))
        .build()
        .unwrap();
    let sub = store.subscribe_field("n", || {});
    store.set("n", 5).unwrap();
    rt.run_until_idle();
    drop(sub);
    rt.run_until_idle();
    assert!(store.restore_pending());
    store
}

#[test]
fn writes_after_factory_unmount_survive_lazy_restore() {
    let rt = Runtime::new();

    let store = unmounted_counter(&rt);
    store.set("n", 42).unwrap();
    assert!(!store.restore_pending());
    assert_eq!(int(&store, "n"), Some(42));
    rt.run_until_idle();
    assert_eq!(int(&store, "n"), Some(42));

    // Producers see the restored state, not the pre-unmount one.
    let store = unmounted_counter(&rt);
    store
        .set_state(Update::producer(|prev: &Fields| {
            json!({"n": prev["n"].as_i64().unwrap_or(-1) + 1})
        }))
        .unwrap();
    assert_eq!(int(&store, "n"), Some(1));

    let store = unmounted_counter(&rt);
    assert!(store.remove("tag").unwrap());
    assert_eq!(store.get("tag"), None);
    assert_eq!(int(&store, "n"), Some(0));

    let store = unmounted_counter(&rt);
    store.sync_update(json!({"n": 7})).unwrap();
    assert_eq!(int(&store, "n"), Some(7));
    rt.run_until_idle();
    assert_eq!(int(&store, "n"), Some(7));
}

#[test]
fn sync_update_over_queued_write_keeps_effect_consistent() {
    let rt = Runtime::new();
    let store = Store::new(&rt, json!({"a": 0, "b": 0}), StoreOptions::default()).unwrap();
    let commits: Rc<RefCell<Vec<Commit>>> = Rc::new(RefCell::new(Vec::new()));
    let c = Rc::clone(&commits);
    let _l = store.subscribe(move |commit| c.borrow_mut().push(commit.clone()));

    store.set("a", 1).unwrap();
    store.set("b", 1).unwrap();
    store.sync_update(json!({"a": 2})).unwrap();
    rt.run_until_idle();

    let commits = commits.borrow();
    assert_eq!(commits.len(), 2);
    let deferred = &commits[1];
    assert_eq!(deferred.effect.get("a"), Some(&Value::from(2)));
    assert_eq!(deferred.effect.get("a"), deferred.next.get("a"));
    assert_eq!(deferred.effect.get("b"), Some(&Value::from(1)));
    assert_eq!(fields_to_json(&deferred.prev), json!({"a": 0, "b": 0}));
}

#[test]
fn scope_drop_drives_teardown() {
    let rt = Runtime::new();
    let store = Store::new(&rt, json!({"a": 1, "b": 2}), StoreOptions::default()).unwrap();
    {
        let mut scope = BindingScope::new();
        scope.subscribe(&store, "a", || {});
        scope.subscribe(&store, "b", || {});
        assert_eq!(store.ref_count(), 2);
        store.set_state(json!({"a": 10, "b": 20})).unwrap();
        rt.run_until_idle();
    }
    rt.run_until_idle();
    assert_eq!(store.to_json(), json!({"a": 1, "b": 2}));
}

#[test]
fn validation_errors_leave_state_untouched() {
    let rt = Runtime::new();
    let store = Store::builder(&rt)
        .initial(json!({"n": 1}))
        .action("bump", |s| {
            let n = s.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
            let _ = s.set("n", n + 1);
        })
        .build()
        .unwrap();
    let hits = Rc::new(Cell::new(0));
    let h = Rc::clone(&hits);
    let _l = store.subscribe(move |_| h.set(h.get() + 1));

    assert!(matches!(
        store.set_state(json!("nope")),
        Err(StoreError::InvalidPayload { .. })
    ));
    assert!(matches!(
        store.set_state(json!({"n": 2, "bump": 0})),
        Err(StoreError::ActionReassign { .. })
    ));
    assert!(matches!(
        store.subscribe_keys(&[], |_| {}),
        Err(StoreError::InvalidKeyFilter { .. })
    ));
    rt.run_until_idle();
    assert_eq!(int(&store, "n"), Some(1));
    assert_eq!(hits.get(), 0);

    store.invoke("bump").unwrap();
    rt.run_until_idle();
    assert_eq!(int(&store, "n"), Some(2));
    assert_eq!(hits.get(), 1);
}

#[test]
fn construction_rejects_non_object() {
    let rt = Runtime::new();
    let err = Store::builder(&rt).factory(|| json!(42)).build().unwrap_err();
    assert!(err.is_validation());
    assert!(err.to_string().contains("number"));
}

#[test]
fn foreign_handles_name_the_api() {
    let rt = Runtime::new();
    let other = Runtime::new();
    let theirs = Store::new(&other, json!({}), StoreOptions::default()).unwrap();
    let mine = Store::new(&rt, json!({}), StoreOptions::default()).unwrap();

    assert!(rt.store(mine.id(), "restore").unwrap().ptr_eq(&mine));
    let err = rt.store(theirs.id(), "set_options").unwrap_err();
    assert!(matches!(err, StoreError::ForeignStore { api: "set_options", .. }));
    assert!(err.to_string().contains("set_options"));
}

#[test]
fn sync_update_uses_one_batch() {
    let (rt, batches) = counting_runtime();
    let store = Store::new(&rt, json!({"a": 0, "b": 0, "c": 0}), StoreOptions::default()).unwrap();
    let hits = Rc::new(Cell::new(0));
    let mut subs = Vec::new();
    for key in ["a", "b", "c"] {
        let h = Rc::clone(&hits);
        subs.push(store.subscribe_field(key, move || h.set(h.get() + 1)));
    }

    store.sync_update(json!({"a": 1, "b": 1, "c": 1})).unwrap();
    assert_eq!(hits.get(), 3);
    assert_eq!(batches.get(), 1);
    assert_eq!(rt.pending_tasks(), 0);
}

#[test]
fn listener_write_schedules_fresh_flush() {
    let rt = Runtime::new();
    let store = Store::new(&rt, json!({"src": 0, "mirror": 0}), StoreOptions::default()).unwrap();
    let s = store.clone();
    let _l = store
        .subscribe_keys(&["src"], move |commit| {
            if let Some(v) = commit.effect.get("src").and_then(Value::as_i64) {
                s.set("mirror", v * 10).unwrap();
            }
        })
        .unwrap();

    store.set("src", 4).unwrap();
    let outcome = rt.run_until_idle();
    assert!(outcome.is_idle());
    assert_eq!(int(&store, "mirror"), Some(40));
    assert_eq!(store.stats().flushes, 2);
}
