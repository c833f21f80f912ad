//! Handler registry.
//!
//! The registry is the single declaration a store is built from. It maps
//! each action name to its transition function and remembers the argument
//! tuple the function expects, so the callback surface can be generated by
//! walking it once.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use super::{ActionType, Args};
use crate::error::{HandlerError, Result, StoreError};

type ErasedHandler<S> = dyn Fn(&mut S, &[Value]) -> Result<Option<S>> + Send + Sync;

/// A registered transition function with its argument signature.
pub(crate) struct HandlerEntry<S> {
    kind: ActionType,
    arity: usize,
    args_type: &'static str,
    run: Arc<ErasedHandler<S>>,
}

impl<S> HandlerEntry<S> {
    pub(crate) fn kind(&self) -> &ActionType {
        &self.kind
    }

    pub(crate) fn arity(&self) -> usize {
        self.arity
    }

    pub(crate) fn args_type(&self) -> &'static str {
        self.args_type
    }

    /// Decode the payload and run the handler against a draft.
    pub(crate) fn apply(&self, draft: &mut S, payload: &[Value]) -> Result<Option<S>> {
        (self.run)(draft, payload)
    }
}

/// Immutable map from action name to transition function.
///
/// Build one with [`HandlerMap::builder`]. Entries keep declaration order.
pub struct HandlerMap<S> {
    entries: IndexMap<ActionType, HandlerEntry<S>>,
}

impl<S> HandlerMap<S>
where
    S: Send + 'static,
{
    pub fn builder() -> HandlerMapBuilder<S> {
        HandlerMapBuilder {
            entries: IndexMap::new(),
            error: None,
        }
    }

    /// Registered names, in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &ActionType> + '_ {
        self.entries.keys()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.entries.contains_key(kind)
    }

    /// Number of arguments the handler for `kind` takes.
    pub fn arity(&self, kind: &str) -> Option<usize> {
        self.entries.get(kind).map(HandlerEntry::arity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn get(&self, kind: &str) -> Option<&HandlerEntry<S>> {
        self.entries.get(kind)
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = &HandlerEntry<S>> + '_ {
        self.entries.values()
    }
}

impl<S> std::fmt::Debug for HandlerMap<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, e)| (k.as_str(), e.args_type)))
            .finish()
    }
}

/// Collects handlers and validates them on [`build`](Self::build).
pub struct HandlerMapBuilder<S> {
    entries: IndexMap<ActionType, HandlerEntry<S>>,
    error: Option<StoreError>,
}

impl<S> HandlerMapBuilder<S>
where
    S: Send + 'static,
{
    /// Register a transition function.
    ///
    /// The handler receives a draft of the current state and its typed
    /// arguments. Returning `Ok(Some(next))` replaces the state; `Ok(None)`
    /// is "no explicit return", interpreted by the store's structural-update
    /// strategy.
    pub fn on<A, F>(mut self, name: impl Into<ActionType>, handler: F) -> Self
    where
        A: Args,
        F: Fn(&mut S, A) -> Result<Option<S>, HandlerError> + Send + Sync + 'static,
    {
        let kind = name.into();
        if self.error.is_some() {
            return self;
        }
        if kind.trim().is_empty() {
            self.error = Some(StoreError::InvalidHandler(format!("{:?}", kind.as_str())));
            return self;
        }
        if self.entries.contains_key(kind.as_str()) {
            self.error = Some(StoreError::DuplicateHandler(kind));
            return self;
        }

        let action = kind.clone();
        let run = move |draft: &mut S, payload: &[Value]| -> Result<Option<S>> {
            let args = A::from_payload(payload).map_err(|source| StoreError::Payload {
                action: action.clone(),
                source,
            })?;
            handler(draft, args).map_err(|source| StoreError::Handler {
                action: action.clone(),
                source,
            })
        };

        self.entries.insert(
            kind.clone(),
            HandlerEntry {
                kind,
                arity: A::ARITY,
                args_type: A::type_name(),
                run: Arc::new(run),
            },
        );
        self
    }

    /// Register an action that never changes state.
    ///
    /// Its only purpose is to reach the epics.
    pub fn effect<A: Args>(self, name: impl Into<ActionType>) -> Self {
        self.on(name, |_: &mut S, _: A| Ok(None))
    }

    pub fn build(self) -> Result<HandlerMap<S>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(HandlerMap {
                entries: self.entries,
            }),
        }
    }
}
