//! Error types for the store.
//!
//! Handler failures are returned to the dispatch call site. Epic failures
//! never reach a caller: they are recorded on the epic's handle and logged.

use thiserror::Error;

use crate::action::ActionType;

/// Convenience alias used across the crate.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error raised by a transition function during reduction.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying error, keeping it reachable through `source()`.
    pub fn from_source<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Mismatch between an action payload and a handler's argument tuple.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("expected {expected} argument(s), got {actual}")]
    Arity { expected: usize, actual: usize },

    #[error("failed to encode argument {index}: {source}")]
    Encode {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode argument {index}: {source}")]
    Decode {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure of an epic, either while building its stream or while running it.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct EpicError(String);

impl EpicError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EpicError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for EpicError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

/// Errors surfaced by the store API.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no handler registered for action `{0}`")]
    UnknownAction(ActionType),

    #[error("handler `{0}` registered twice")]
    DuplicateHandler(ActionType),

    #[error("invalid handler name: {0}")]
    InvalidHandler(String),

    #[error("payload mismatch for action `{action}`: {source}")]
    Payload {
        action: ActionType,
        #[source]
        source: PayloadError,
    },

    #[error("handler for `{action}` failed: {source}")]
    Handler {
        action: ActionType,
        #[source]
        source: HandlerError,
    },

    #[error("action `{0}` dispatched from inside a reduction")]
    ReentrantDispatch(ActionType),

    #[error("epic `{name}` failed to start: {source}")]
    MisconfiguredEpic {
        name: String,
        #[source]
        source: EpicError,
    },

    #[error("callback `{action}` takes {expected}, not {requested}")]
    CallbackType {
        action: ActionType,
        expected: &'static str,
        requested: &'static str,
    },

    #[error("epics need a tokio runtime to run on")]
    NoRuntime,

    #[error("store has been disposed")]
    Disposed,
}
