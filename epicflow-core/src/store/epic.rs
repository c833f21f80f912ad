//! Epic Implementation
//!
//! An epic is a long-lived side-effect process. It receives the action
//! stream, the state observable and the callback surface, and returns a
//! stream the store drives for effect only.
//!
//! # Lifecycle
//!
//! 1. On activation the store calls [`Epic::run`] once and spawns a task
//!    that polls the returned [`EpicOutput`] to completion.
//!
//!    Each epic gets its own [`StateObservable`]. The [`ActionStream`]
//!    advances it to the state an action produced just before yielding
//!    that action, so an epic reading state on receipt never sees a later
//!    state from the same commit. Once the epic drops its action stream the
//!    view follows the store's observable instead.
//!
//! 2. Emitted values are discarded. An `Err` item ends the epic with status
//!    [`EpicStatus::Failed`]; the end of the stream leaves it
//!    [`EpicStatus::Completed`]. Neither affects sibling epics.
//!
//! 3. Disposal or an epic-list change cancels the task. A cancelled task is
//!    never polled again, so it observes no further actions.
//!
//! Failed epics are not restarted.

use std::borrow::Cow;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};
use parking_lot::RwLock;
use tokio::task::JoinHandle;

use crate::action::{Action, CallbackSurface};
use crate::error::EpicError;
use crate::observable::{StateObservable, SubjectStream};
use crate::State;

use super::scheduler::PendingCommit;

/// The committed actions, as seen by one epic.
pub struct ActionStream<S> {
    commits: SubjectStream<PendingCommit<S>>,
    view: StateObservable<S>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl<S: State> ActionStream<S> {
    /// `view` is advanced by this stream and follows `shared` once the
    /// stream is dropped.
    pub(crate) fn new(
        commits: SubjectStream<PendingCommit<S>>,
        view: StateObservable<S>,
        shared: StateObservable<S>,
    ) -> Self {
        let follower = view.clone();
        Self {
            commits,
            view,
            release: Some(Box::new(move || follower.follow(&shared))),
        }
    }
}

impl<S: State> Stream for ActionStream<S> {
    type Item = Action;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Action>> {
        let this = self.get_mut();
        match ready!(Pin::new(&mut this.commits).poll_next(cx)) {
            Some(commit) => {
                this.view.accept(&commit.state);
                Poll::Ready(Some(commit.action))
            }
            None => Poll::Ready(None),
        }
    }
}

impl<S> Unpin for ActionStream<S> {}

impl<S> Drop for ActionStream<S> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl<S> fmt::Debug for ActionStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionStream").finish_non_exhaustive()
    }
}

/// Output of an epic: a stream driven for its side effects.
pub struct EpicOutput {
    stream: BoxStream<'static, Result<(), EpicError>>,
}

impl EpicOutput {
    /// Wrap a stream whose values are ignored.
    pub fn new<St>(stream: St) -> Self
    where
        St: Stream + Send + 'static,
    {
        Self {
            stream: stream.map(|_| Ok(())).boxed(),
        }
    }

    /// Wrap a stream of results. The first `Err` ends the epic.
    pub fn fallible<St, T, E>(stream: St) -> Self
    where
        St: Stream<Item = Result<T, E>> + Send + 'static,
        E: fmt::Display,
    {
        Self {
            stream: stream
                .map(|item| item.map(|_| ()).map_err(|err| EpicError::new(err.to_string())))
                .boxed(),
        }
    }

    /// An epic that does nothing and completes immediately.
    pub fn empty() -> Self {
        Self {
            stream: stream::empty().boxed(),
        }
    }

    pub(crate) fn into_stream(self) -> BoxStream<'static, Result<(), EpicError>> {
        self.stream
    }
}

impl fmt::Debug for EpicOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EpicOutput").finish_non_exhaustive()
    }
}

/// A side-effect process wired to a store.
pub trait Epic<S>: Send + Sync + 'static {
    /// Name used in logs and status reports.
    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed(std::any::type_name::<Self>())
    }

    /// Build the epic's pipeline.
    ///
    /// An error here means the epic is misconfigured; it never starts.
    fn run(
        &self,
        actions: ActionStream<S>,
        state: StateObservable<S>,
        callbacks: CallbackSurface,
    ) -> Result<EpicOutput, EpicError>;
}

impl<S, F> Epic<S> for F
where
    F: Fn(ActionStream<S>, StateObservable<S>, CallbackSurface) -> Result<EpicOutput, EpicError>
        + Send
        + Sync
        + 'static,
{
    fn run(
        &self,
        actions: ActionStream<S>,
        state: StateObservable<S>,
        callbacks: CallbackSurface,
    ) -> Result<EpicOutput, EpicError> {
        self(actions, state, callbacks)
    }
}

/// An epic with an explicit name.
struct Named<E> {
    name: Cow<'static, str>,
    epic: E,
}

impl<S, E> Epic<S> for Named<E>
where
    E: Epic<S>,
{
    fn name(&self) -> Cow<'static, str> {
        self.name.clone()
    }

    fn run(
        &self,
        actions: ActionStream<S>,
        state: StateObservable<S>,
        callbacks: CallbackSurface,
    ) -> Result<EpicOutput, EpicError> {
        self.epic.run(actions, state, callbacks)
    }
}

/// Ordered list of epics a store runs.
pub struct EpicList<S> {
    epics: Vec<Arc<dyn Epic<S>>>,
}

impl<S> EpicList<S>
where
    S: 'static,
{
    pub fn new() -> Self {
        Self { epics: Vec::new() }
    }

    /// Add an epic written as a closure.
    pub fn with<F>(self, epic: F) -> Self
    where
        F: Fn(ActionStream<S>, StateObservable<S>, CallbackSurface) -> Result<EpicOutput, EpicError>
            + Send
            + Sync
            + 'static,
    {
        self.with_epic(epic)
    }

    /// Add a closure epic under a readable name.
    pub fn with_named<F>(self, name: impl Into<Cow<'static, str>>, epic: F) -> Self
    where
        F: Fn(ActionStream<S>, StateObservable<S>, CallbackSurface) -> Result<EpicOutput, EpicError>
            + Send
            + Sync
            + 'static,
    {
        self.with_epic(Named {
            name: name.into(),
            epic,
        })
    }

    /// Add an epic implemented as a type.
    pub fn with_epic<E: Epic<S>>(mut self, epic: E) -> Self {
        self.epics.push(Arc::new(epic));
        self
    }

    /// Number of epics in the list.
    pub fn len(&self) -> usize {
        self.epics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epics.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<dyn Epic<S>>> + '_ {
        self.epics.iter()
    }
}

impl<S: 'static> Default for EpicList<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Clone for EpicList<S> {
    fn clone(&self) -> Self {
        Self {
            epics: self.epics.clone(),
        }
    }
}

impl<S: 'static> fmt::Debug for EpicList<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.epics.iter().map(|e| e.name()))
            .finish()
    }
}

/// Where an epic's subscription stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpicStatus {
    Running,
    Completed,
    Failed(String),
    Cancelled,
}

impl EpicStatus {
    /// Whether the epic is still subscribed.
    pub fn is_running(&self) -> bool {
        matches!(self, EpicStatus::Running)
    }
}

/// Unique identifier for a running epic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EpicId(u64);

impl EpicId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Point-in-time view of one epic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpicReport {
    pub id: EpicId,
    pub name: String,
    pub epoch: u64,
    pub status: EpicStatus,
}

/// The store's handle on one epic's subscription.
pub(crate) struct EpicHandle {
    id: EpicId,
    name: String,
    epoch: u64,
    status: Arc<RwLock<EpicStatus>>,
    task: Option<JoinHandle<()>>,
}

impl EpicHandle {
    /// Spawn the task that drives `output`.
    pub(crate) fn spawn(
        runtime: &tokio::runtime::Handle,
        name: String,
        epoch: u64,
        output: EpicOutput,
    ) -> Self {
        let id = EpicId::new();
        let status = Arc::new(RwLock::new(EpicStatus::Running));
        let task_status = Arc::clone(&status);
        let task_name = name.clone();

        let task = runtime.spawn(async move {
            let mut stream = output.into_stream();
            while let Some(item) = stream.next().await {
                if let Err(err) = item {
                    tracing::warn!(epic = %task_name, epoch, error = %err, "epic failed");
                    *task_status.write() = EpicStatus::Failed(err.message().to_string());
                    return;
                }
            }
            tracing::debug!(epic = %task_name, epoch, "epic completed");
            *task_status.write() = EpicStatus::Completed;
        });

        Self {
            id,
            name,
            epoch,
            status,
            task: Some(task),
        }
    }

    /// A handle for an epic that never started.
    pub(crate) fn failed(name: String, epoch: u64, err: &EpicError) -> Self {
        Self {
            id: EpicId::new(),
            name,
            epoch,
            status: Arc::new(RwLock::new(EpicStatus::Failed(err.message().to_string()))),
            task: None,
        }
    }

    /// Abort the task. Terminal statuses are kept.
    pub(crate) fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let mut status = self.status.write();
        if status.is_running() {
            *status = EpicStatus::Cancelled;
        }
    }

    pub(crate) fn report(&self) -> EpicReport {
        EpicReport {
            id: self.id,
            name: self.name.clone(),
            epoch: self.epoch,
            status: self.status.read().clone(),
        }
    }
}

impl Drop for EpicHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for EpicHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EpicHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("epoch", &self.epoch)
            .field("status", &*self.status.read())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
