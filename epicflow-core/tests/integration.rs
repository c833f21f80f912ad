//! Integration Tests for the Store
//!
//! These tests mount real stores and check how reducers, buses and epics
//! work together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;

use epicflow_core::action::Payload;
use epicflow_core::store::EpicStatus;
use epicflow_core::{
    Action, ActionStreamExt, EpicError, EpicList, EpicOutput, HandlerError, HandlerMap, Store,
    StoreConfig, StoreError,
};

fn counter() -> HandlerMap<i64> {
    HandlerMap::builder()
        .on("increment", |count: &mut i64, (): ()| Ok(Some(*count + 1)))
        .on("add", |count: &mut i64, (n,): (i64,)| Ok(Some(*count + n)))
        .effect::<()>("ping")
        .effect::<()>("delayed_increment")
        .build()
        .unwrap()
}

/// Let spawned commits and epic tasks run.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Poll `check` in real time until it holds or two seconds pass.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

type Log<T> = Arc<Mutex<Vec<T>>>;

fn log<T>() -> Log<T> {
    Arc::new(Mutex::new(Vec::new()))
}

/// An epic that records the kind of every action it receives.
fn recorder(seen: &Log<String>) -> EpicList<i64> {
    let seen = seen.clone();
    EpicList::<i64>::new().with_named("recorder", move |actions, _, _| {
        let seen = seen.clone();
        Ok(EpicOutput::new(actions.map(move |action| {
            seen.lock().push(action.kind().to_string());
        })))
    })
}

/// An epic can delay a follow-up dispatch; the state moves only once it fires.
#[tokio::test(start_paused = true)]
async fn delayed_increment_lands_after_the_delay() {
    let epics = EpicList::<i64>::new().with_named("delay", |actions, _, callbacks| {
        Ok(EpicOutput::fallible(actions.of_type(["delayed_increment"]).then(
            move |_| {
                let callbacks = callbacks.clone();
                async move {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    callbacks.call("increment", ())
                }
            },
        )))
    });
    let store = Store::mount(counter(), 0, epics, StoreConfig::default()).unwrap();

    store.callbacks().call("delayed_increment", ()).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(store.state(), 0);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(store.state(), 1);
    assert_eq!(store.state_observable().value(), 1);
}

/// Each action an epic receives comes with the state that action produced,
/// even when several commits land in one batch.
#[tokio::test(start_paused = true)]
async fn epics_see_the_state_each_action_produced() {
    let seen: Log<(String, i64)> = log();
    let seen_clone = seen.clone();
    let epics = EpicList::<i64>::new().with(move |actions, state, _| {
        let seen = seen_clone.clone();
        Ok(EpicOutput::new(actions.map(move |action| {
            seen.lock().push((action.kind().to_string(), state.value()));
        })))
    });
    let store = Store::mount(counter(), 0, epics, StoreConfig::default()).unwrap();

    let callbacks = store.callbacks();
    callbacks.call("add", (2_i64,)).unwrap();
    callbacks.call("ping", ()).unwrap();
    callbacks.call("add", (3_i64,)).unwrap();
    settle().await;

    assert_eq!(
        *seen.lock(),
        vec![
            ("add".to_string(), 2),
            ("ping".to_string(), 2),
            ("add".to_string(), 5),
        ]
    );
}

/// Effect-only actions flow to epics and leave the state alone.
#[tokio::test(start_paused = true)]
async fn effect_only_actions_reach_epics_without_changing_state() {
    let seen = log();
    let store = Store::mount(counter(), 10, recorder(&seen), StoreConfig::default()).unwrap();

    store.callbacks().call("ping", ()).unwrap();
    settle().await;

    assert_eq!(store.state(), 10);
    assert_eq!(*seen.lock(), vec!["ping".to_string()]);
}

/// `of_type` forwards only the listed action names, in dispatch order.
#[tokio::test(start_paused = true)]
async fn of_type_keeps_only_matching_actions() {
    let seen = log::<String>();
    let seen_clone = seen.clone();
    let epics = EpicList::<i64>::new().with(move |actions, _, _| {
        let seen = seen_clone.clone();
        Ok(EpicOutput::new(actions.of_type(["increment", "ping"]).map(
            move |action| seen.lock().push(action.kind().to_string()),
        )))
    });
    let store = Store::mount(counter(), 0, epics, StoreConfig::default()).unwrap();

    let callbacks = store.callbacks();
    callbacks.call("increment", ()).unwrap();
    callbacks.call("add", (5_i64,)).unwrap();
    callbacks.call("ping", ()).unwrap();
    settle().await;

    assert_eq!(*seen.lock(), vec!["increment".to_string(), "ping".to_string()]);
}

/// Subscribers get the current value first and then only real changes.
#[test]
fn state_observable_replays_and_deduplicates() {
    let store = Store::mount(counter(), 0, EpicList::new(), StoreConfig::manual()).unwrap();
    let values = log();
    let values_clone = values.clone();
    let _subscription = store
        .state_observable()
        .subscribe(move |value: &i64| values_clone.lock().push(*value));
    assert_eq!(*values.lock(), vec![0]);

    let callbacks = store.callbacks();
    callbacks.call("ping", ()).unwrap();
    callbacks.call("add", (0_i64,)).unwrap();
    store.commit();
    assert_eq!(*values.lock(), vec![0]);

    callbacks.call("increment", ()).unwrap();
    store.commit();
    assert_eq!(*values.lock(), vec![0, 1]);
}

/// Replacing the epic list cancels the old epics and starts the new ones
/// under the next epoch.
#[tokio::test(start_paused = true)]
async fn replacing_epics_cancels_the_previous_epoch() {
    let old = log();
    let new = log();
    let store = Store::mount(counter(), 0, recorder(&old), StoreConfig::default()).unwrap();
    assert_eq!(store.epoch(), 1);

    store.callbacks().call("ping", ()).unwrap();
    settle().await;

    store.replace_epics(recorder(&new)).unwrap();
    store.callbacks().call("increment", ()).unwrap();
    settle().await;

    assert_eq!(*old.lock(), vec!["ping".to_string()]);
    assert_eq!(*new.lock(), vec!["increment".to_string()]);
    assert_eq!(store.epoch(), 2);
    assert_eq!(store.state(), 1);

    let reports = store.epic_statuses();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].epoch, 2);
    assert!(reports[0].status.is_running());
}

/// After dispose no action reaches an epic and every dispatch is refused.
#[tokio::test(start_paused = true)]
async fn dispose_stops_epics_and_rejects_dispatch() {
    let seen = log();
    let store = Store::mount(counter(), 0, recorder(&seen), StoreConfig::default()).unwrap();
    let callbacks = store.callbacks();

    callbacks.call("ping", ()).unwrap();
    settle().await;
    store.dispose();
    settle().await;

    assert!(matches!(callbacks.call("ping", ()), Err(StoreError::Disposed)));
    assert!(matches!(
        store.replace_epics(EpicList::new()),
        Err(StoreError::Disposed)
    ));
    assert_eq!(*seen.lock(), vec!["ping".to_string()]);
    assert_eq!(store.epic_statuses()[0].status, EpicStatus::Cancelled);
}

/// An epic ending in an error is reported as failed while the rest keep
/// receiving actions.
#[tokio::test(start_paused = true)]
async fn failing_epic_does_not_stop_its_siblings() {
    let seen = log();
    let epics = recorder(&seen).with_named("fuse", |actions, _, _| {
        Ok(EpicOutput::fallible(
            actions
                .of_type(["add"])
                .map(|_| Err::<(), _>("fuse blown")),
        ))
    });
    let store = Store::mount(counter(), 0, epics, StoreConfig::default()).unwrap();

    let callbacks = store.callbacks();
    callbacks.call("add", (1_i64,)).unwrap();
    settle().await;
    callbacks.call("ping", ()).unwrap();
    settle().await;

    let reports = store.epic_statuses();
    assert!(reports[0].status.is_running());
    assert_eq!(reports[1].name, "fuse");
    assert_eq!(reports[1].status, EpicStatus::Failed("fuse blown".into()));
    assert_eq!(*seen.lock(), vec!["add".to_string(), "ping".to_string()]);
    assert_eq!(store.state(), 1);
}

/// An epic whose stream ends is reported as completed.
#[tokio::test(start_paused = true)]
async fn finished_epic_reports_completion() {
    let epics = EpicList::<i64>::new().with_named("one-shot", |_, _, _| Ok(EpicOutput::empty()));
    let store = Store::mount(counter(), 0, epics, StoreConfig::default()).unwrap();
    settle().await;

    assert_eq!(store.epic_statuses()[0].status, EpicStatus::Completed);
}

/// An epic that cannot start is reported as failed; its siblings still run.
#[tokio::test(start_paused = true)]
async fn misconfigured_epic_is_isolated_by_default() {
    let seen = log();
    let epics =
        recorder(&seen).with_named("broken", |_, _, _| Err(EpicError::new("missing endpoint")));
    let store = Store::mount(counter(), 0, epics, StoreConfig::default()).unwrap();

    store.callbacks().call("ping", ()).unwrap();
    settle().await;

    let reports = store.epic_statuses();
    assert!(reports[0].status.is_running());
    assert_eq!(reports[1].status, EpicStatus::Failed("missing endpoint".into()));
    assert_eq!(*seen.lock(), vec!["ping".to_string()]);
}

/// With strict activation a failing epic makes the mount itself fail.
#[tokio::test(start_paused = true)]
async fn strict_activation_rejects_misconfigured_epics() {
    let config = StoreConfig {
        strict_activation: true,
        ..StoreConfig::default()
    };
    let epics = EpicList::<i64>::new()
        .with_named("idle", |_, _, _| Ok(EpicOutput::new(futures_util::stream::pending::<()>())))
        .with_named("broken", |_, _, _| Err(EpicError::new("missing endpoint")));

    let err = Store::mount(counter(), 0, epics, config).unwrap_err();
    match err {
        StoreError::MisconfiguredEpic { name, source } => {
            assert_eq!(name, "broken");
            assert_eq!(source.message(), "missing endpoint");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Todos {
    items: Vec<String>,
}

fn todos() -> HandlerMap<Todos> {
    HandlerMap::builder()
        .on("add_todo", |todos: &mut Todos, (text,): (String,)| {
            todos.items.push(text);
            Ok(None)
        })
        .on("clear", |_: &mut Todos, (): ()| Ok(Some(Todos::default())))
        .build()
        .unwrap()
}

/// Handlers returning `None` keep their in-place edits under structural update.
#[test]
fn draft_mutations_are_kept_with_structural_update() {
    let store = Store::mount(todos(), Todos::default(), EpicList::new(), StoreConfig::manual())
        .unwrap();

    store.callbacks().call("add_todo", ("write docs".to_string(),)).unwrap();
    store.commit();

    assert_eq!(store.state().items, vec!["write docs".to_string()]);
    assert_eq!(store.state_observable().value().items.len(), 1);
}

/// Without structural update only returned states count; draft edits are dropped.
#[test]
fn draft_mutations_are_discarded_without_structural_update() {
    let config = StoreConfig {
        structural_update: false,
        ..StoreConfig::manual()
    };
    let initial = Todos {
        items: vec!["keep".to_string()],
    };
    let store = Store::mount(todos(), initial.clone(), EpicList::new(), config).unwrap();

    store.callbacks().call("add_todo", ("lost".to_string(),)).unwrap();
    assert_eq!(store.state(), initial);

    store.callbacks().call("clear", ()).unwrap();
    assert!(store.state().items.is_empty());
}

/// A handler dispatching into its own store gets an error, and the outer
/// reduction still applies.
#[test]
fn dispatch_from_inside_a_reduction_is_rejected() {
    let surface = Arc::new(Mutex::new(None::<epicflow_core::CallbackSurface>));
    let nested = Arc::new(Mutex::new(None::<StoreError>));

    let surface_clone = surface.clone();
    let nested_clone = nested.clone();
    let handlers = HandlerMap::builder()
        .on("increment", |count: &mut i64, (): ()| Ok(Some(*count + 1)))
        .on("chain", move |count: &mut i64, (): ()| {
            let callbacks = surface_clone.lock().clone();
            if let Some(callbacks) = callbacks {
                if let Err(err) = callbacks.call("increment", ()) {
                    *nested_clone.lock() = Some(err);
                }
            }
            Ok(Some(*count + 10))
        })
        .build()
        .unwrap();

    let store = Store::mount(handlers, 0, EpicList::new(), StoreConfig::manual()).unwrap();
    *surface.lock() = Some(store.callbacks());

    store.callbacks().call("chain", ()).unwrap();

    assert_eq!(store.state(), 10);
    assert!(matches!(
        nested.lock().as_ref(),
        Some(StoreError::ReentrantDispatch(kind)) if kind.as_str() == "increment"
    ));
}

/// Unknown names and mistyped arguments are refused before reduction.
#[test]
fn callbacks_check_names_and_argument_types() {
    let store = Store::mount(counter(), 0, EpicList::new(), StoreConfig::manual()).unwrap();
    let callbacks = store.callbacks();

    assert!(matches!(
        callbacks.call("reset", ()),
        Err(StoreError::UnknownAction(_))
    ));
    assert!(matches!(
        callbacks.call("add", ("five".to_string(),)),
        Err(StoreError::CallbackType { .. })
    ));
    assert!(matches!(
        callbacks.dispatch(Action::new("add", Payload::new())),
        Err(StoreError::Payload { .. })
    ));

    let add = callbacks.typed::<(i64,)>("add").unwrap();
    add.call((7,)).unwrap();
    assert_eq!(store.state(), 7);
    assert_eq!(store.pending_commits(), 1);
}

/// A failing handler surfaces its error to the caller and leaves the state alone.
#[test]
fn handler_failures_reach_the_caller() {
    let handlers = HandlerMap::builder()
        .on("divide", |value: &mut i64, (by,): (i64,)| {
            if by == 0 {
                return Err(HandlerError::new("division by zero"));
            }
            Ok(Some(*value / by))
        })
        .build()
        .unwrap();
    let store = Store::mount(handlers, 12, EpicList::new(), StoreConfig::manual()).unwrap();

    let err = store.callbacks().call("divide", (0_i64,)).unwrap_err();
    assert_eq!(err.to_string(), "handler for `divide` failed: division by zero");
    assert_eq!(store.state(), 12);

    store.callbacks().call("divide", (4_i64,)).unwrap();
    assert_eq!(store.state(), 3);
}

/// The store-wide action stream yields committed actions in order.
#[tokio::test(start_paused = true)]
async fn store_action_stream_sees_committed_actions() {
    let store = Store::mount(counter(), 0, EpicList::new(), StoreConfig::default()).unwrap();
    let mut actions = store.actions();

    store.callbacks().call("increment", ()).unwrap();
    store.callbacks().call("ping", ()).unwrap();

    let first = actions.next().await.unwrap();
    let second = actions.next().await.unwrap();
    assert!(first.is("increment"));
    assert!(second.is("ping"));
    assert_eq!(store.state_observable().value(), 1);
}

/// A dispatch from a plain OS thread is committed on the runtime the store
/// was mounted on, alongside dispatches from the runtime itself.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispatch_from_a_foreign_thread_is_committed() {
    let seen = log();
    let store = Store::mount(counter(), 0, recorder(&seen), StoreConfig::default()).unwrap();
    let callbacks = store.callbacks();

    let foreign = callbacks.clone();
    std::thread::spawn(move || foreign.call("increment", ()))
        .join()
        .unwrap()
        .unwrap();
    callbacks.call("increment", ()).unwrap();
    callbacks.call("increment", ()).unwrap();

    assert!(eventually(|| seen.lock().len() == 3).await);
    assert_eq!(store.state(), 3);
    assert_eq!(store.state_observable().value(), 3);
    assert_eq!(store.pending_commits(), 0);
    assert_eq!(*seen.lock(), vec!["increment".to_string(); 3]);
}

fn journal() -> HandlerMap<Vec<u64>> {
    HandlerMap::builder()
        .on("record", |entries: &mut Vec<u64>, (n,): (u64,)| {
            entries.push(n);
            Ok(None)
        })
        .effect::<()>("start")
        .build()
        .unwrap()
}

/// Several epics dispatching at once publish in the order their actions
/// were reduced, and an observing epic reads the state each one produced.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_epic_dispatches_commit_in_reduction_order() {
    const WRITERS: u64 = 4;
    const PER_WRITER: u64 = 50;
    let total = (WRITERS * PER_WRITER) as usize;

    let audited: Log<(u64, Option<u64>)> = log();
    let audited_clone = audited.clone();
    let mut epics = EpicList::<Vec<u64>>::new().with_named("auditor", move |actions, state, _| {
        let audited = audited_clone.clone();
        Ok(EpicOutput::new(actions.of_type(["record"]).map(move |action| {
            if let Ok((n,)) = action.args::<(u64,)>() {
                let last = state.with_value(|entries| entries.last().copied());
                audited.lock().push((n, last));
            }
        })))
    });
    for writer in 0..WRITERS {
        epics = epics.with(move |actions, _, callbacks| {
            Ok(EpicOutput::fallible(actions.of_type(["start"]).then(move |_| {
                let callbacks = callbacks.clone();
                async move {
                    for i in 0..PER_WRITER {
                        callbacks.call("record", (writer * 1000 + i,))?;
                        tokio::task::yield_now().await;
                    }
                    Ok::<_, StoreError>(())
                }
            })))
        });
    }
    let store = Store::mount(journal(), Vec::new(), epics, StoreConfig::default()).unwrap();

    let committed: Log<u64> = log();
    let committed_clone = committed.clone();
    let _subscription = store.subscribe_actions(move |action| {
        if let Ok((n,)) = action.args::<(u64,)>() {
            committed_clone.lock().push(n);
        }
    });

    store.callbacks().call("start", ()).unwrap();
    assert!(eventually(|| committed.lock().len() == total).await);
    assert!(eventually(|| audited.lock().len() == total).await);

    let reduced = store.state();
    assert_eq!(*committed.lock(), reduced);
    for writer in 0..WRITERS {
        let own: Vec<u64> = reduced.iter().copied().filter(|n| n / 1000 == writer).collect();
        let expected: Vec<u64> = (0..PER_WRITER).map(|i| writer * 1000 + i).collect();
        assert_eq!(own, expected);
    }
    for (n, last) in audited.lock().iter() {
        assert_eq!(*last, Some(*n));
    }
}

/// Disposing while an epic is awaiting inside `then` cancels it there, and
/// nothing dispatched afterwards reaches any epic.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispose_cancels_an_epic_mid_effect() {
    let entered = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let seen = log();

    let (entered_clone, finished_clone) = (entered.clone(), finished.clone());
    let epics = recorder(&seen).with_named("slow", move |actions, _, _| {
        let (entered, finished) = (entered_clone.clone(), finished_clone.clone());
        Ok(EpicOutput::new(actions.of_type(["delayed_increment"]).then(
            move |_| {
                let (entered, finished) = (entered.clone(), finished.clone());
                async move {
                    entered.store(true, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    finished.store(true, Ordering::SeqCst);
                }
            },
        )))
    });
    let store = Store::mount(counter(), 0, epics, StoreConfig::default()).unwrap();
    let callbacks = store.callbacks();

    callbacks.call("delayed_increment", ()).unwrap();
    assert!(eventually(|| entered.load(Ordering::SeqCst)).await);
    assert!(eventually(|| seen.lock().len() == 1).await);

    store.dispose();
    assert!(matches!(callbacks.call("ping", ()), Err(StoreError::Disposed)));
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(!finished.load(Ordering::SeqCst));
    assert_eq!(*seen.lock(), vec!["delayed_increment".to_string()]);
    let reports = store.epic_statuses();
    assert_eq!(reports[1].name, "slow");
    assert_eq!(reports[1].status, EpicStatus::Cancelled);
}
