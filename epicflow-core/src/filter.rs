//! Action-type filtering.
//!
//! `of_type` narrows an action stream to the kinds an epic cares about.
//! Order and payloads are preserved. Items that are not actions at all
//! (`None` from a heterogeneous upstream) are dropped silently.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use futures_util::Stream;
use smallvec::SmallVec;

use crate::action::{Action, ActionType};

/// Stream items that may carry an action.
pub trait IntoAction {
    fn into_action(self) -> Option<Action>;
}

impl IntoAction for Action {
    fn into_action(self) -> Option<Action> {
        Some(self)
    }
}

impl IntoAction for &Action {
    fn into_action(self) -> Option<Action> {
        Some(self.clone())
    }
}

impl IntoAction for Arc<Action> {
    fn into_action(self) -> Option<Action> {
        Some(Arc::try_unwrap(self).unwrap_or_else(|shared| (*shared).clone()))
    }
}

impl<T: IntoAction> IntoAction for Option<T> {
    fn into_action(self) -> Option<Action> {
        self.and_then(IntoAction::into_action)
    }
}

/// Set of action names to match against.
#[derive(Debug, Clone, Default)]
pub struct ActionKinds {
    kinds: SmallVec<[ActionType; 4]>,
}

impl ActionKinds {
    /// Collect the names to match.
    pub fn new<I, K>(kinds: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<ActionType>,
    {
        Self {
            kinds: kinds.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `kind` is one of the collected names.
    pub fn matches(&self, kind: &str) -> bool {
        self.kinds.iter().any(|k| k.as_str() == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// Stream returned by [`of_type`].
#[must_use = "streams do nothing unless polled"]
pub struct OfType<St> {
    stream: Pin<Box<St>>,
    kinds: ActionKinds,
}

impl<St> Stream for OfType<St>
where
    St: Stream,
    St::Item: IntoAction,
{
    type Item = Action;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Action>> {
        let this = &mut *self;
        loop {
            match ready!(this.stream.as_mut().poll_next(cx)) {
                Some(item) => {
                    if let Some(action) = item.into_action() {
                        if this.kinds.matches(action.kind()) {
                            return Poll::Ready(Some(action));
                        }
                    }
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

/// Keep only the actions whose kind is one of `kinds`.
pub fn of_type<St, I, K>(stream: St, kinds: I) -> OfType<St>
where
    St: Stream,
    St::Item: IntoAction,
    I: IntoIterator<Item = K>,
    K: Into<ActionType>,
{
    OfType {
        stream: Box::pin(stream),
        kinds: ActionKinds::new(kinds),
    }
}

/// Pipeline-style access to [`of_type`].
pub trait ActionStreamExt: Stream + Sized
where
    Self::Item: IntoAction,
{
    fn of_type<I, K>(self, kinds: I) -> OfType<Self>
    where
        I: IntoIterator<Item = K>,
        K: Into<ActionType>,
    {
        of_type(self, kinds)
    }
}

impl<St> ActionStreamExt for St
where
    St: Stream,
    St::Item: IntoAction,
{
}
