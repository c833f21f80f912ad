//! Store configuration.

use serde::{Deserialize, Serialize};

/// How pending commits get drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    /// The host calls `Store::commit` once its update has settled.
    Manual,
    /// A commit task is spawned on the current tokio runtime after each
    /// dispatch and runs once the dispatching task yields.
    Tokio,
}

/// Options a store is mounted with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Keep draft mutations when a handler returns nothing.
    pub structural_update: bool,

    /// Abort the whole activation when one epic fails to start.
    pub strict_activation: bool,

    pub commit: CommitMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            structural_update: true,
            strict_activation: false,
            commit: CommitMode::Tokio,
        }
    }
}

impl StoreConfig {
    /// Manual commits, everything else default.
    pub fn manual() -> Self {
        Self {
            commit: CommitMode::Manual,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
