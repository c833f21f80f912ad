//! Observable Primitives
//!
//! The buses the store publishes into and epics read from.
//!
//! # Concepts
//!
//! ## Subjects
//!
//! A [`Subject`] is a multicast bus. Values pushed into it reach every live
//! subscriber in subscription order. The store owns two of them: the action
//! bus and the state bus.
//!
//! ## State Observable
//!
//! A [`StateObservable`] sits on top of the state bus. It remembers the
//! latest value, replays it to each new subscriber, and drops values equal
//! to the one it already holds.
//!
//! ## Subscriptions
//!
//! Every `subscribe` call returns a [`Subscription`]. Cancelling or dropping
//! it detaches the observer.

mod state;
mod subject;
mod subscriber;

pub use state::{StateObservable, StateStream};
pub use subject::{Subject, SubjectStream};
pub use subscriber::{SubscriberId, Subscription};
