//! Subject Implementation
//!
//! A Subject is a multicast bus: every value pushed with [`Subject::next`] is
//! delivered to all live subscribers, in subscription order.
//!
//! # Delivery
//!
//! The subscriber list is snapshotted under a read lock and the lock is
//! released before any callback runs. Observers may therefore subscribe,
//! cancel, or push into other buses from inside a notification.
//!
//! # Streams
//!
//! [`Subject::stream`] bridges the synchronous callbacks into an async
//! `Stream` through an unbounded tokio channel. The stream keeps its
//! subscription alive and cancels it when dropped.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures_util::Stream;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use super::subscriber::{Subscriber, SubscriberId, Subscription, Unsubscribe};

struct SubjectInner<T> {
    subscribers: RwLock<Vec<Subscriber<T>>>,
    completed: AtomicBool,
}

impl<T> Unsubscribe for SubjectInner<T>
where
    T: Send + Sync + 'static,
{
    fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.write().retain(|s| s.id() != id);
    }
}

/// A multicast bus of values of type `T`.
pub struct Subject<T> {
    inner: Arc<SubjectInner<T>>,
}

impl<T> Subject<T>
where
    T: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SubjectInner {
                subscribers: RwLock::new(Vec::new()),
                completed: AtomicBool::new(false),
            }),
        }
    }

    /// Push a value to every live subscriber.
    ///
    /// No-op once the subject has completed.
    pub fn next(&self, value: &T) {
        if self.is_completed() {
            return;
        }

        let snapshot: Vec<Subscriber<T>> = self.inner.subscribers.read().clone();
        for subscriber in &snapshot {
            subscriber.notify(value);
        }
    }

    /// Register an observer for every later value.
    ///
    /// Subscribing to a completed subject returns an already-closed handle.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        if self.is_completed() {
            return Subscription::closed();
        }

        let subscriber = Subscriber::new(observer);
        let id = subscriber.id();
        let active = subscriber.active_flag();
        self.inner.subscribers.write().push(subscriber);

        let source: Weak<dyn Unsubscribe> = Arc::downgrade(&self.inner) as Weak<dyn Unsubscribe>;
        Subscription::new(id, active, source)
    }

    /// Drop every subscriber and stop accepting values.
    ///
    /// Streams created through [`Subject::stream`] end once their observer
    /// is dropped here.
    pub fn complete(&self) {
        if self.inner.completed.swap(true, Ordering::AcqRel) {
            return;
        }

        let drained: Vec<Subscriber<T>> = std::mem::take(&mut *self.inner.subscribers.write());
        for subscriber in &drained {
            subscriber.active_flag().store(false, Ordering::Release);
        }
    }

    pub fn is_completed(&self) -> bool {
        self.inner.completed.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }
}

impl<T> Subject<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Observe this subject as an async stream.
    pub fn stream(&self) -> SubjectStream<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |value: &T| {
            // The receiver going away is handled by the subscription drop.
            let _ = tx.send(value.clone());
        });
        SubjectStream::new(rx, subscription)
    }
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Subject<T>
where
    T: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Subject<T>
where
    T: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subject")
            .field("subscriber_count", &self.subscriber_count())
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// Async view of a bus. Ends when the bus completes.
pub struct SubjectStream<T> {
    rx: mpsc::UnboundedReceiver<T>,
    subscription: Subscription,
}

impl<T> SubjectStream<T> {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<T>, subscription: Subscription) -> Self {
        Self { rx, subscription }
    }

    /// Stop receiving new values. Already buffered values are still yielded.
    pub fn cancel(&mut self) {
        self.subscription.cancel();
        self.rx.close();
    }
}

impl<T> Stream for SubjectStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl<T> std::fmt::Debug for SubjectStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubjectStream")
            .field("subscription", &self.subscription)
            .finish()
    }
}
