//! State Observable
//!
//! A read-only view over the store's state bus that remembers the latest
//! value.
//!
//! # Semantics
//!
//! 1. `value()` always returns the most recently accepted state.
//!
//! 2. A new subscriber synchronously receives the current value before any
//!    later change (replay-one).
//!
//! 3. A value equal to the current one is dropped: no notification and no
//!    mutation of the stored value.
//!
//! # Ordering
//!
//! Each subscriber holds a reentrant delivery lock while its replay runs, so
//! a change accepted on another thread during the replay is delivered after
//! it rather than before.

use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures_util::Stream;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tokio::sync::mpsc;
use tracing::trace;

use super::subject::{Subject, SubjectStream};
use super::subscriber::Subscription;

struct StateInner<S> {
    value: RwLock<S>,
    changes: Subject<S>,
    source: Mutex<Option<Subscription>>,
}

impl<S> StateInner<S>
where
    S: Clone + PartialEq + Send + Sync + 'static,
{
    /// Accept a value from the source bus, dropping it when unchanged.
    fn accept(&self, next: &S) {
        {
            let mut current = self.value.write();
            if *current == *next {
                trace!("state unchanged, notification dropped");
                return;
            }
            *current = next.clone();
        }
        self.changes.next(next);
    }
}

/// Latest-value view over a state bus with replay-one and dedup semantics.
///
/// Cloning yields another handle to the same observable.
pub struct StateObservable<S> {
    inner: Arc<StateInner<S>>,
}

impl<S> StateObservable<S>
where
    S: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create an observable seeded with `initial` that follows `source`.
    pub fn new(source: &Subject<S>, initial: S) -> Self {
        let observable = Self::detached(initial);
        let forward = observable.forwarder();
        *observable.inner.source.lock() = Some(source.subscribe(forward));
        observable
    }

    /// An observable fed only through [`accept`](Self::accept).
    pub(crate) fn detached(initial: S) -> Self {
        Self {
            inner: Arc::new(StateInner {
                value: RwLock::new(initial),
                changes: Subject::new(),
                source: Mutex::new(None),
            }),
        }
    }

    /// Offer a value. Dropped when equal to the current one.
    pub(crate) fn accept(&self, next: &S) {
        self.inner.accept(next);
    }

    /// Track `upstream` from now on, starting with its current value.
    pub(crate) fn follow(&self, upstream: &StateObservable<S>) {
        let subscription = upstream.subscribe(self.forwarder());
        *self.inner.source.lock() = Some(subscription);
    }

    fn forwarder(&self) -> impl Fn(&S) + Send + Sync + 'static {
        let weak: Weak<StateInner<S>> = Arc::downgrade(&self.inner);
        move |next: &S| {
            if let Some(inner) = weak.upgrade() {
                inner.accept(next);
            }
        }
    }

    /// Get the current value.
    pub fn value(&self) -> S {
        self.inner.value.read().clone()
    }

    /// Borrow the current value without cloning it.
    pub fn with_value<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.inner.value.read())
    }

    /// Deliver the current value now, then every later distinct value.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        let delivery = Arc::new(ReentrantMutex::new(()));
        let observer = Arc::new(observer);

        let _replaying = delivery.lock();
        let (subscription, snapshot) = {
            // Registration and snapshot happen under the same read lock so no
            // change can slip between them.
            let current = self.inner.value.read();
            let forward = Arc::clone(&observer);
            let gate = Arc::clone(&delivery);
            let subscription = self.inner.changes.subscribe(move |next: &S| {
                let _delivering = gate.lock();
                forward(next);
            });
            (subscription, current.clone())
        };
        observer(&snapshot);

        subscription
    }

    /// Async stream with the same replay-one and dedup semantics.
    pub fn changes(&self) -> StateStream<S> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |value: &S| {
            let _ = tx.send(value.clone());
        });
        StateStream {
            inner: SubjectStream::new(rx, subscription),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.changes.subscriber_count()
    }

    /// Stop following the source bus and end every change stream.
    pub(crate) fn close(&self) {
        if let Some(mut subscription) = self.inner.source.lock().take() {
            subscription.cancel();
        }
        self.inner.changes.complete();
    }
}

impl<S> Clone for StateObservable<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> std::fmt::Debug for StateObservable<S>
where
    S: Clone + PartialEq + Send + Sync + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateObservable")
            .field("value", &self.value())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Stream of distinct state values, starting with the current one.
pub struct StateStream<S> {
    inner: SubjectStream<S>,
}

impl<S> Stream for StateStream<S> {
    type Item = S;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
