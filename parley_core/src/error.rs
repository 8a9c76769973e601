//! Configuration errors raised by simulation layers.

use thiserror::Error;

/// Errors reported by a layer at call time.
///
/// These are structural: a scenario that triggers one cannot be
/// meaningfully continued.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LayerError {
    #[error("Unknown noise source: {0}")]
    UnknownNoiseSource(String),

    #[error("Unknown noise profile: {0}")]
    UnknownNoiseProfile(String),

    #[error("Unknown noise type: {0}")]
    UnknownNoiseKind(String),

    #[error("Unknown network profile: {0}")]
    UnknownNetworkProfile(String),

    #[error("Unknown barge-in pattern: {0}")]
    UnknownBargeInPattern(String),

    #[error("Tool not registered: {0}")]
    UnknownTool(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl LayerError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }
}
