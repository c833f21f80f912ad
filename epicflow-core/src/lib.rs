//! Epicflow Core
//!
//! This crate provides a reactive state container for event-driven hosts.
//! It implements:
//!
//! - Reducer-style state transitions declared as a handler map
//! - A typed callback surface generated from that map
//! - Action and state buses with replay and change deduplication
//! - Long-lived side-effect processes ("epics") driven on tokio
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `action`: Action values, the handler registry and the callback surface
//! - `observable`: Subjects, subscriptions and the state observable
//! - `filter`: Type-based filtering of action streams
//! - `store`: The orchestration loop, commit scheduling and epic lifecycle
//! - `config`: Options a store is mounted with
//!
//! # Example
//!
//! ```rust,ignore
//! use epicflow_core::{ActionStreamExt, EpicList, EpicOutput, HandlerMap, Store, StoreConfig};
//! use futures_util::StreamExt;
//!
//! let handlers = HandlerMap::builder()
//!     .on("increment", |count: &mut i64, (): ()| Ok(Some(*count + 1)))
//!     .effect::<()>("delayed_increment")
//!     .build()?;
//!
//! let epics = EpicList::new().with(|actions, _state, callbacks| {
//!     Ok(EpicOutput::new(actions.of_type(["delayed_increment"]).then(
//!         move |_| {
//!             let callbacks = callbacks.clone();
//!             async move {
//!                 tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!                 callbacks.call("increment", ())
//!             }
//!         },
//!     )))
//! });
//!
//! let store = Store::mount(handlers, 0, epics, StoreConfig::default())?;
//! store.callbacks().call("delayed_increment", ())?;
//! // One second later the state is 1.
//! ```

pub mod action;
pub mod config;
pub mod error;
pub mod filter;
pub mod observable;
pub mod store;

pub use action::{Action, ActionType, Args, Callback, CallbackSurface, HandlerMap, TypedCallback};
pub use config::{CommitMode, StoreConfig};
pub use error::{EpicError, HandlerError, PayloadError, Result, StoreError};
pub use filter::{of_type, ActionKinds, ActionStreamExt, IntoAction, OfType};
pub use observable::{StateObservable, Subject, Subscription};
pub use store::{
    ActionStream, Epic, EpicList, EpicOutput, EpicStatus, HostScheduler, ManualScheduler, Store,
    StoreBuilder, TokioScheduler,
};

/// Bound shared by every store state.
///
/// Equality drives change detection on the state observable.
pub trait State: Clone + PartialEq + Send + Sync + 'static {}

impl<T> State for T where T: Clone + PartialEq + Send + Sync + 'static {}
