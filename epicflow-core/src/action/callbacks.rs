//! Callback surface.
//!
//! One [`Callback`] per registered handler. Invoking a callback is exactly
//! dispatching `{ kind: name, payload: args }`; the surface only hides the
//! type tag from callers and checks the argument tuple.

use std::marker::PhantomData;
use std::sync::Arc;

use indexmap::IndexMap;

use super::{Action, ActionType, Args, HandlerMap};
use crate::error::{Result, StoreError};

/// Sink for actions, implemented by the store.
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, action: Action) -> Result<()>;
}

/// Entry point for one action name.
#[derive(Clone)]
pub struct Callback {
    kind: ActionType,
    arity: usize,
    args_type: &'static str,
    dispatcher: Arc<dyn Dispatch>,
}

impl Callback {
    /// The action name this callback dispatches.
    pub fn kind(&self) -> &ActionType {
        &self.kind
    }

    /// Number of arguments the handler takes.
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Dispatch this callback's action with `args` as payload.
    pub fn invoke<A: Args>(&self, args: A) -> Result<()> {
        self.check::<A>()?;
        let action = Action::with_args(self.kind.clone(), args).map_err(|source| StoreError::Payload {
            action: self.kind.clone(),
            source,
        })?;
        self.dispatcher.dispatch(action)
    }

    fn check<A: Args>(&self) -> Result<()> {
        if A::ARITY != self.arity || A::type_name() != self.args_type {
            return Err(StoreError::CallbackType {
                action: self.kind.clone(),
                expected: self.args_type,
                requested: A::type_name(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callback")
            .field("kind", &self.kind)
            .field("args", &self.args_type)
            .finish()
    }
}

/// A callback whose argument tuple was checked when it was looked up.
pub struct TypedCallback<A> {
    callback: Callback,
    _args: PhantomData<fn(A)>,
}

impl<A: Args> TypedCallback<A> {
    pub fn call(&self, args: A) -> Result<()> {
        let action = Action::with_args(self.callback.kind.clone(), args).map_err(|source| {
            StoreError::Payload {
                action: self.callback.kind.clone(),
                source,
            }
        })?;
        self.callback.dispatcher.dispatch(action)
    }

    pub fn kind(&self) -> &ActionType {
        &self.callback.kind
    }
}

impl<A> std::fmt::Debug for TypedCallback<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TypedCallback").field(&self.callback).finish()
    }
}

impl<A> Clone for TypedCallback<A> {
    fn clone(&self) -> Self {
        Self {
            callback: self.callback.clone(),
            _args: PhantomData,
        }
    }
}

/// Table of callbacks, one per registered action name.
///
/// Generated once from the handler registry; cheap to clone and safe to
/// move into epics.
#[derive(Clone)]
pub struct CallbackSurface {
    callbacks: Arc<IndexMap<ActionType, Callback>>,
    dispatcher: Arc<dyn Dispatch>,
}

impl CallbackSurface {
    pub fn new<S>(handlers: &HandlerMap<S>, dispatcher: Arc<dyn Dispatch>) -> Self
    where
        S: Send + 'static,
    {
        let callbacks = handlers
            .entries()
            .map(|entry| {
                let callback = Callback {
                    kind: entry.kind().clone(),
                    arity: entry.arity(),
                    args_type: entry.args_type(),
                    dispatcher: Arc::clone(&dispatcher),
                };
                (entry.kind().clone(), callback)
            })
            .collect();

        Self {
            callbacks: Arc::new(callbacks),
            dispatcher,
        }
    }

    pub fn get(&self, kind: &str) -> Option<&Callback> {
        self.callbacks.get(kind)
    }

    /// Invoke the callback registered under `kind`.
    pub fn call<A: Args>(&self, kind: &str, args: A) -> Result<()> {
        self.get(kind)
            .ok_or_else(|| StoreError::UnknownAction(ActionType::from(kind)))?
            .invoke(args)
    }

    /// Look up a callback and pin its argument tuple.
    pub fn typed<A: Args>(&self, kind: &str) -> Result<TypedCallback<A>> {
        let callback = self
            .get(kind)
            .ok_or_else(|| StoreError::UnknownAction(ActionType::from(kind)))?;
        callback.check::<A>()?;
        Ok(TypedCallback {
            callback: callback.clone(),
            _args: PhantomData,
        })
    }

    /// Dispatch a prebuilt action. The payload is checked during reduction.
    pub fn dispatch(&self, action: Action) -> Result<()> {
        if !self.callbacks.contains_key(action.kind().as_str()) {
            return Err(StoreError::UnknownAction(action.kind().clone()));
        }
        self.dispatcher.dispatch(action)
    }

    pub fn names(&self) -> impl Iterator<Item = &ActionType> + '_ {
        self.callbacks.keys()
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl std::fmt::Debug for CallbackSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.callbacks.keys()).finish()
    }
}
