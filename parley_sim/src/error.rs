//! Harness error taxonomy.
//!
//! Everything here is fatal: a run that hits one ends with
//! `RunStatus::Aborted`. Expectation failures and tool-wait timeouts are
//! not errors; they are recorded as outcomes in the results ledger.

use parley_core::LayerError;
use parley_env::EnvError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HarnessError {
    /// Malformed scenario document
    #[error("Scenario schema error: {0}")]
    Schema(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// An action needs a layer the run was not given
    #[error("Layer not registered: {0}")]
    UnregisteredLayer(String),

    #[error("Tool not registered: {0}")]
    UnregisteredTool(String),

    /// Configuration rejected by a layer (unknown profile, bad parameter)
    #[error(transparent)]
    Layer(#[from] LayerError),

    /// Attempt to move time backwards; always a scheduling bug
    #[error("Clock order violation: requested {requested:?} but now is {now:?}")]
    ClockOrderViolation { requested: Duration, now: Duration },

    #[error(transparent)]
    System(#[from] EnvError),

    #[error("Orchestrator already finished")]
    RunFinished,

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl HarnessError {
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(err: serde_json::Error) -> Self {
        Self::Schema(err.to_string())
    }
}

impl From<std::io::Error> for HarnessError {
    fn from(err: std::io::Error) -> Self {
        Self::Runtime(err.to_string())
    }
}
