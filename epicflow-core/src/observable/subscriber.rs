//! Subscriber types for the observable buses.
//!
//! A Subscriber is a registered observer callback on a [`Subject`]. The
//! matching [`Subscription`] is the caller's cancellation handle.
//!
//! [`Subject`]: super::Subject

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Unique identifier for a subscriber.
///
/// Every observer registered on a bus gets a fresh ID. Cancellation looks
/// the observer up by this ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// An observer registered on a bus.
///
/// The `active` flag is shared with the [`Subscription`] so that a cancel
/// racing with an in-flight delivery still suppresses the callback.
pub(crate) struct Subscriber<T> {
    id: SubscriberId,
    active: Arc<AtomicBool>,
    notify: Arc<dyn Fn(&T) + Send + Sync>,
}

impl<T> Subscriber<T> {
    pub(crate) fn new<F>(notify: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Self {
            id: SubscriberId::new(),
            active: Arc::new(AtomicBool::new(true)),
            notify: Arc::new(notify),
        }
    }

    pub(crate) fn id(&self) -> SubscriberId {
        self.id
    }

    pub(crate) fn active_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.active)
    }

    /// Deliver a value unless the subscription was cancelled meanwhile.
    pub(crate) fn notify(&self, value: &T) {
        if self.active.load(Ordering::Acquire) {
            (self.notify)(value);
        }
    }
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            active: Arc::clone(&self.active),
            notify: Arc::clone(&self.notify),
        }
    }
}

/// Something a subscription can detach itself from.
pub(crate) trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: SubscriberId);
}

/// Cancellation handle returned by `subscribe`.
///
/// Dropping the handle cancels the subscription.
pub struct Subscription {
    id: SubscriberId,
    active: Arc<AtomicBool>,
    source: Option<Weak<dyn Unsubscribe>>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriberId, active: Arc<AtomicBool>, source: Weak<dyn Unsubscribe>) -> Self {
        Self {
            id,
            active,
            source: Some(source),
        }
    }

    /// A handle that was never attached, e.g. from a completed bus.
    pub(crate) fn closed() -> Self {
        Self {
            id: SubscriberId::new(),
            active: Arc::new(AtomicBool::new(false)),
            source: None,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Stop delivery. Idempotent.
    pub fn cancel(&mut self) {
        self.active.store(false, Ordering::Release);
        if let Some(source) = self.source.take().and_then(|weak| weak.upgrade()) {
            source.unsubscribe(self.id);
        }
    }

    pub fn is_closed(&self) -> bool {
        !self.active.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
