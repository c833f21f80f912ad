//! Store Runtime
//!
//! The store is the orchestration loop binding the reducer, the action and
//! state buses, the commit queue and the epics.
//!
//! # How It Works
//!
//! 1. Mounting computes the initial state (optionally from a seed), builds
//!    the buses and the state observable, generates the callback surface
//!    and activates the epics.
//!
//! 2. A dispatch reduces synchronously under the state lock:
//!    a. the handler runs against a draft through the structural-update
//!       strategy;
//!    b. a returned next state replaces the current one;
//!    c. no next state leaves it untouched (effect-only);
//!    d. either way the `(state, action)` pair is queued and a commit is
//!       requested from the host scheduler.
//!
//! 3. A commit publishes each pair: state first, then action. Epics receive
//!    the pair itself and advance their own state view as they consume each
//!    action, so an epic sees the state that action produced even when one
//!    commit publishes several pairs.
//!
//! 4. Replacing the epic list advances the activation epoch and cancels
//!    every subscription of the previous epoch. Disposal cancels them and
//!    completes both buses.
//!
//! # Thread Safety
//!
//! Epics run on tokio tasks and may dispatch from any thread. Reductions
//! are serialized by the state lock; nothing is delivered while a store lock
//! is held.

mod context;
mod epic;
mod scheduler;
mod update;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::action::{Action, CallbackSurface, Dispatch, HandlerMap};
use crate::config::{CommitMode, StoreConfig};
use crate::error::{Result, StoreError};
use crate::observable::{StateObservable, Subject, SubjectStream, Subscription};
use crate::State;

use context::ReductionContext;
use scheduler::{CommitQueue, PendingCommit};

pub use context::StoreId;
pub use epic::{ActionStream, Epic, EpicId, EpicList, EpicOutput, EpicReport, EpicStatus};
pub use scheduler::{CommitRequest, HostScheduler, ManualScheduler, TokioScheduler};
pub use update::{strategy_for, DraftUpdate, ReplaceUpdate, StructuralUpdate};

use epic::EpicHandle;

/// Epic subscriptions of the current epoch.
struct Activation {
    epoch: u64,
    handles: Vec<EpicHandle>,
}

struct Inner<S> {
    id: StoreId,
    config: StoreConfig,
    handlers: HandlerMap<S>,
    update: Arc<dyn StructuralUpdate<S>>,
    scheduler: Arc<dyn HostScheduler>,
    /// Runtime current at mount; epics are spawned onto it.
    runtime: Option<Handle>,
    state: Mutex<S>,
    state_bus: Subject<S>,
    state_observable: StateObservable<S>,
    action_bus: Subject<Action>,
    commit_bus: Subject<PendingCommit<S>>,
    queue: CommitQueue<S>,
    callbacks: CallbackSurface,
    activation: Mutex<Activation>,
    disposed: AtomicBool,
}

impl<S: State> Inner<S> {
    fn dispatch(self: &Arc<Self>, action: Action) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(StoreError::Disposed);
        }

        let kind = action.kind().clone();
        let entry = self
            .handlers
            .get(&kind)
            .ok_or_else(|| StoreError::UnknownAction(kind.clone()))?;

        let changed = {
            let _reducing = ReductionContext::enter(self.id, &kind)?;
            let mut state = self.state.lock();
            let next = self
                .update
                .reduce(&state, &mut |draft| entry.apply(draft, action.payload()))?;
            let changed = next.is_some();
            if let Some(next) = next {
                *state = next;
            }
            // Queued under the state lock so queue order is reduction order.
            self.queue.push(PendingCommit {
                state: state.clone(),
                action,
            });
            changed
        };

        debug!(store = ?self.id, action = %kind, changed, "action reduced");

        if self.queue.mark_requested() {
            self.scheduler.request_commit(self.commit_request());
        }
        Ok(())
    }

    fn commit_request(self: &Arc<Self>) -> CommitRequest {
        let run = Arc::downgrade(self);
        let abandon = Arc::downgrade(self);
        CommitRequest::new(
            move || run.upgrade().map(|inner| inner.commit()).unwrap_or(0),
            move || {
                if let Some(inner) = abandon.upgrade() {
                    warn!(store = ?inner.id, "commit request dropped, next dispatch asks again");
                    inner.queue.release_request();
                }
            },
        )
    }

    fn commit(&self) -> usize {
        if self.disposed.load(Ordering::Acquire) {
            return 0;
        }

        let published = self.queue.drain(&mut |pending| {
            self.state_bus.next(&pending.state);
            self.commit_bus.next(&pending);
            self.action_bus.next(&pending.action);
        });
        if published > 0 {
            debug!(store = ?self.id, published, "commit drained");
        }
        published
    }

    /// Cancel the current epoch and start `epics` under a new one.
    fn activate(&self, epics: EpicList<S>) -> Result<()> {
        let mut activation = self.activation.lock();

        for handle in activation.handles.iter_mut() {
            handle.cancel();
        }
        activation.handles.clear();
        activation.epoch += 1;

        let epoch = activation.epoch;
        if epics.is_empty() {
            return Ok(());
        }
        let runtime = self
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
            .ok_or(StoreError::NoRuntime)?;

        let mut handles = Vec::with_capacity(epics.len());
        for epic in epics.iter() {
            let name = epic.name().into_owned();
            // Subscribe before reading the value so no commit falls between.
            let commits = self.commit_bus.stream();
            let view = StateObservable::detached(self.state_observable.value());
            let actions = ActionStream::new(commits, view.clone(), self.state_observable.clone());
            match epic.run(actions, view, self.callbacks.clone()) {
                Ok(output) => handles.push(EpicHandle::spawn(&runtime, name, epoch, output)),
                Err(err) => {
                    warn!(store = ?self.id, epic = %name, epoch, error = %err, "epic failed to start");
                    if self.config.strict_activation {
                        // Dropping the handles cancels the epics already started.
                        drop(handles);
                        return Err(StoreError::MisconfiguredEpic { name, source: err });
                    }
                    handles.push(EpicHandle::failed(name, epoch, &err));
                }
            }
        }
        activation.handles = handles;

        info!(store = ?self.id, epoch, epics = epics.len(), "epics activated");
        Ok(())
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        {
            let mut activation = self.activation.lock();
            for handle in activation.handles.iter_mut() {
                handle.cancel();
            }
        }
        self.queue.clear();
        self.state_observable.close();
        self.commit_bus.complete();
        self.action_bus.complete();
        self.state_bus.complete();

        info!(store = ?self.id, "store disposed");
    }
}

/// Dispatch sink handed to the callback surface.
///
/// Holds the store weakly so epics never keep it alive.
struct StoreDispatcher<S> {
    inner: Weak<Inner<S>>,
}

impl<S: State> Dispatch for StoreDispatcher<S> {
    fn dispatch(&self, action: Action) -> Result<()> {
        self.inner
            .upgrade()
            .ok_or(StoreError::Disposed)?
            .dispatch(action)
    }
}

/// A mounted state container.
///
/// Cloning yields another handle to the same store. The store unmounts when
/// [`dispose`](Store::dispose) is called or the last handle is dropped.
pub struct Store<S> {
    inner: Arc<Inner<S>>,
}

impl<S: State> Store<S> {
    /// Start configuring a store around `handlers`.
    pub fn builder(handlers: HandlerMap<S>) -> StoreBuilder<S> {
        StoreBuilder {
            handlers,
            epics: EpicList::new(),
            config: StoreConfig::default(),
            scheduler: None,
            update: None,
        }
    }

    /// Mount a store with the default scheduler for `config`.
    pub fn mount(
        handlers: HandlerMap<S>,
        initial: S,
        epics: EpicList<S>,
        config: StoreConfig,
    ) -> Result<Self> {
        Self::builder(handlers).epics(epics).config(config).mount(initial)
    }

    /// Process-unique identifier of this store.
    pub fn id(&self) -> StoreId {
        self.inner.id
    }

    /// The options the store was mounted with.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Snapshot of the current state.
    ///
    /// Reflects every completed reduction, committed or not.
    pub fn state(&self) -> S {
        self.inner.state.lock().clone()
    }

    /// Borrow the current state under the state lock.
    ///
    /// Dispatching from `f` deadlocks.
    pub fn with_state<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.inner.state.lock())
    }

    /// One callback per registered handler.
    pub fn callbacks(&self) -> CallbackSurface {
        self.inner.callbacks.clone()
    }

    /// The store-wide state observable, updated on every commit.
    pub fn state_observable(&self) -> StateObservable<S> {
        self.inner.state_observable.clone()
    }

    /// Stream of committed actions, from now on.
    pub fn actions(&self) -> SubjectStream<Action> {
        self.inner.action_bus.stream()
    }

    /// Observe committed actions synchronously.
    pub fn subscribe_actions<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&Action) + Send + Sync + 'static,
    {
        self.inner.action_bus.subscribe(observer)
    }

    /// Reduce `action` now and queue it for publication.
    ///
    /// Handler errors are returned here; the state is left untouched and
    /// nothing is queued.
    pub fn dispatch(&self, action: Action) -> Result<()> {
        self.inner.dispatch(action)
    }

    /// Publish every pending `(state, action)` pair.
    ///
    /// Hosts using [`ManualScheduler`] call this once their update has
    /// settled. Returns the number of pairs published.
    pub fn commit(&self) -> usize {
        self.inner.commit()
    }

    /// Pairs reduced but not yet published.
    pub fn pending_commits(&self) -> usize {
        self.inner.queue.len()
    }

    /// Tear down the current epics and activate `epics`. State is kept.
    pub fn replace_epics(&self, epics: EpicList<S>) -> Result<()> {
        if self.is_disposed() {
            return Err(StoreError::Disposed);
        }
        self.inner.activate(epics)
    }

    /// Number of activations so far.
    pub fn epoch(&self) -> u64 {
        self.inner.activation.lock().epoch
    }

    /// Status of every epic in the current epoch.
    pub fn epic_statuses(&self) -> Vec<EpicReport> {
        self.inner
            .activation
            .lock()
            .handles
            .iter()
            .map(EpicHandle::report)
            .collect()
    }

    /// Unmount: cancel every epic and complete both buses. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Whether [`dispose`](Store::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// True while this thread is inside one of this store's handlers.
    pub fn is_reducing(&self) -> bool {
        ReductionContext::is_reducing(self.inner.id)
    }
}

impl<S> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> std::fmt::Debug for Store<S>
where
    S: State + std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("epoch", &self.epoch())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Options collected before mounting.
pub struct StoreBuilder<S> {
    handlers: HandlerMap<S>,
    epics: EpicList<S>,
    config: StoreConfig,
    scheduler: Option<Arc<dyn HostScheduler>>,
    update: Option<Arc<dyn StructuralUpdate<S>>>,
}

impl<S: State> StoreBuilder<S> {
    /// Epics to activate on mount.
    pub fn epics(mut self, epics: EpicList<S>) -> Self {
        self.epics = epics;
        self
    }

    /// Options to mount with. Defaults to [`StoreConfig::default`].
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a host scheduler instead of the one `config.commit` selects.
    pub fn scheduler(mut self, scheduler: Arc<dyn HostScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Use a custom strategy instead of the one `config.structural_update`
    /// selects.
    pub fn structural_update(mut self, update: Arc<dyn StructuralUpdate<S>>) -> Self {
        self.update = Some(update);
        self
    }

    /// Mount with `initial` as the first state.
    pub fn mount(self, initial: S) -> Result<Store<S>> {
        self.mount_with(initial, |state| state)
    }

    /// Mount with the initial state derived from `seed` by `init`.
    ///
    /// With [`CommitMode::Tokio`] and no explicit scheduler, the store binds
    /// to the calling runtime and fails with [`StoreError::NoRuntime`]
    /// outside one.
    pub fn mount_with<I>(self, seed: I, init: impl FnOnce(I) -> S) -> Result<Store<S>> {
        let StoreBuilder {
            handlers,
            epics,
            config,
            scheduler,
            update,
        } = self;

        let initial = init(seed);
        let scheduler: Arc<dyn HostScheduler> = match scheduler {
            Some(scheduler) => scheduler,
            None => match config.commit {
                CommitMode::Manual => Arc::new(ManualScheduler::new()),
                CommitMode::Tokio => Arc::new(TokioScheduler::try_current()?),
            },
        };
        let update = update.unwrap_or_else(|| strategy_for(config.structural_update));

        let state_bus = Subject::new();
        let state_observable = StateObservable::new(&state_bus, initial.clone());
        let handler_count = handlers.len();

        let inner = Arc::new_cyclic(|weak: &Weak<Inner<S>>| {
            let dispatcher: Arc<dyn Dispatch> = Arc::new(StoreDispatcher {
                inner: weak.clone(),
            });
            let callbacks = CallbackSurface::new(&handlers, dispatcher);
            Inner {
                id: StoreId::new(),
                config,
                handlers,
                update,
                scheduler,
                runtime: Handle::try_current().ok(),
                state: Mutex::new(initial),
                state_bus,
                state_observable,
                action_bus: Subject::new(),
                commit_bus: Subject::new(),
                queue: CommitQueue::new(),
                callbacks,
                activation: Mutex::new(Activation {
                    epoch: 0,
                    handles: Vec::new(),
                }),
                disposed: AtomicBool::new(false),
            }
        });

        info!(store = ?inner.id, handlers = handler_count, "store mounted");
        inner.activate(epics)?;

        Ok(Store { inner })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
