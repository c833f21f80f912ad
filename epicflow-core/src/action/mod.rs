//! Actions and Handler Registry
//!
//! A store is declared with a single [`HandlerMap`]: one transition function
//! per action name. From that registry the store derives two things:
//!
//! - the [`Action`] values it reduces: `{ kind, payload }`, where `payload`
//!   is the ordered list of the handler's arguments;
//! - a [`CallbackSurface`] with one [`Callback`] per registered name, so
//!   callers never build the type tag by hand.
//!
//! Arguments travel as `serde_json::Value`s. The [`Args`] trait converts a
//! typed argument tuple to and from that payload, which lets the registry
//! check every call against the handler's declared tuple.

mod args;
mod callbacks;
mod registry;

use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde_json::Value;
use smallvec::SmallVec;

use crate::error::PayloadError;

pub use args::Args;
pub use callbacks::{Callback, CallbackSurface, Dispatch, TypedCallback};
pub use registry::{HandlerMap, HandlerMapBuilder};

/// Ordered handler arguments.
pub type Payload = SmallVec<[Value; 2]>;

/// Name of an action, cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionType(Arc<str>);

impl ActionType {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for ActionType {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ActionType {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ActionType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ActionType {
    fn from(name: &str) -> Self {
        Self(Arc::from(name))
    }
}

impl From<String> for ActionType {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl From<&ActionType> for ActionType {
    fn from(name: &ActionType) -> Self {
        name.clone()
    }
}

impl PartialEq<str> for ActionType {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for ActionType {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Something that happened: a named event carrying its handler's arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    kind: ActionType,
    payload: Payload,
}

impl Action {
    pub fn new(kind: impl Into<ActionType>, payload: Payload) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Build an action from a typed argument tuple.
    pub fn with_args<A: Args>(kind: impl Into<ActionType>, args: A) -> Result<Self, PayloadError> {
        Ok(Self::new(kind, args.into_payload()?))
    }

    pub fn kind(&self) -> &ActionType {
        &self.kind
    }

    pub fn payload(&self) -> &[Value] {
        &self.payload
    }

    /// Decode the payload back into a typed argument tuple.
    pub fn args<A: Args>(&self) -> Result<A, PayloadError> {
        A::from_payload(&self.payload)
    }

    pub fn is(&self, kind: &str) -> bool {
        self.kind == *kind
    }
}
