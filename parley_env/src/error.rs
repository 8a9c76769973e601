//! Error types for the Parley environment abstraction.

use thiserror::Error;

/// Errors that can occur at the boundary with the system under test.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvError {
    /// The system under test rejected or failed an operation
    #[error("System error: {0}")]
    SystemError(String),
}

impl EnvError {
    /// Creates a system error.
    pub fn system(msg: impl Into<String>) -> Self {
        Self::SystemError(msg.into())
    }
}
