//! Commit Scheduler
//!
//! Reduction is synchronous, publication is not. Every dispatch leaves a
//! `(state, action)` pair in a FIFO commit queue and asks the host to drain
//! it once the current update has settled.
//!
//! # Algorithm
//!
//! 1. `dispatch` pushes the pair while still holding the state lock, so queue
//!    order is reduction order.
//! 2. The first push after a drain requests a commit from the
//!    [`HostScheduler`]; later pushes piggyback on that request.
//! 3. A drain pops pairs one at a time and publishes each outside every lock.
//! 4. Only one drain runs at a time. A drain requested while another is
//!    running returns immediately; the running drain re-checks the queue
//!    after releasing its flag, so no pair is stranded.
//! 5. A request dropped without running releases the outstanding flag, so
//!    the next push asks the host again.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::runtime::Handle;

use crate::action::Action;
use crate::error::{Result, StoreError};

/// A reduced action waiting to be published with the state it produced.
#[derive(Debug, Clone)]
pub(crate) struct PendingCommit<S> {
    pub(crate) state: S,
    pub(crate) action: Action,
}

/// FIFO of pending commits plus the request/drain flags.
pub(crate) struct CommitQueue<S> {
    pending: Mutex<VecDeque<PendingCommit<S>>>,
    requested: AtomicBool,
    draining: AtomicBool,
}

impl<S> CommitQueue<S> {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            requested: AtomicBool::new(false),
            draining: AtomicBool::new(false),
        }
    }

    pub(crate) fn push(&self, commit: PendingCommit<S>) {
        self.pending.lock().push_back(commit);
    }

    /// Returns true when no commit request is outstanding yet.
    pub(crate) fn mark_requested(&self) -> bool {
        !self.requested.swap(true, Ordering::AcqRel)
    }

    /// Forget the outstanding request without draining.
    pub(crate) fn release_request(&self) {
        self.requested.store(false, Ordering::Release);
    }

    /// Publish every pending commit in FIFO order.
    ///
    /// Returns the number of commits this call published.
    pub(crate) fn drain(&self, publish: &mut dyn FnMut(PendingCommit<S>)) -> usize {
        let mut published = 0;
        loop {
            if self.draining.swap(true, Ordering::AcqRel) {
                return published;
            }
            self.requested.store(false, Ordering::Release);

            loop {
                // Pop in its own statement so the lock is released before
                // publishing.
                let next = self.pending.lock().pop_front();
                let Some(commit) = next else { break };
                publish(commit);
                published += 1;
            }

            self.draining.store(false, Ordering::Release);
            if self.pending.lock().is_empty() {
                return published;
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub(crate) fn clear(&self) {
        self.pending.lock().clear();
    }
}

/// A deferred drain of one store's commit queue.
///
/// Dropping a request without calling [`run`](Self::run) or
/// [`detach`](Self::detach) withdraws it: the store asks again on its next
/// dispatch.
pub struct CommitRequest {
    run: Option<Box<dyn FnOnce() -> usize + Send>>,
    abandon: Option<Box<dyn FnOnce() + Send>>,
}

impl CommitRequest {
    pub(crate) fn new<R, A>(run: R, abandon: A) -> Self
    where
        R: FnOnce() -> usize + Send + 'static,
        A: FnOnce() + Send + 'static,
    {
        Self {
            run: Some(Box::new(run)),
            abandon: Some(Box::new(abandon)),
        }
    }

    /// Drain the queue now. Returns the number of commits published.
    pub fn run(mut self) -> usize {
        self.abandon = None;
        self.run.take().map_or(0, |run| run())
    }

    /// Keep the request outstanding; the host drains with `Store::commit`.
    pub fn detach(mut self) {
        self.abandon = None;
    }
}

impl Drop for CommitRequest {
    fn drop(&mut self) {
        if let Some(abandon) = self.abandon.take() {
            abandon();
        }
    }
}

impl std::fmt::Debug for CommitRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitRequest").finish_non_exhaustive()
    }
}

/// The host's update loop, as seen by the store.
///
/// The store calls `request_commit` after a dispatch, possibly from a thread
/// the host does not own. The host runs the request once it considers the
/// current update settled.
pub trait HostScheduler: Send + Sync {
    fn request_commit(&self, request: CommitRequest);
}

/// Leaves draining to the host, which calls `Store::commit` itself.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    requests: AtomicUsize,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commit requests received so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }
}

impl HostScheduler for ManualScheduler {
    fn request_commit(&self, request: CommitRequest) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        request.detach();
    }
}

/// Drains on a task of a fixed tokio runtime after the dispatching task
/// yields.
///
/// The runtime is captured up front, so dispatches from threads outside it
/// still get their commit.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    /// Bind to an explicit runtime handle.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Bind to the runtime the caller is running on.
    pub fn try_current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| StoreError::NoRuntime)
    }
}

impl HostScheduler for TokioScheduler {
    fn request_commit(&self, request: CommitRequest) {
        // A runtime that has shut down drops the task, and with it the
        // request.
        self.handle.spawn(async move {
            tokio::task::yield_now().await;
            request.run();
        });
    }
}
