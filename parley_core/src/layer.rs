//! Capability contract shared by every simulation layer.
//!
//! A layer implements only the capabilities that make sense for it:
//!
//! | layer                  | generate | inject | apply | wait_for_call |
//! |------------------------|:--------:|:------:|:-----:|:-------------:|
//! | `AudioStreamSimulator` |    x     |        |       |               |
//! | `VideoStreamSimulator` |    x     |        |       |               |
//! | `NoiseEngine`          |          |   x    |   x   |               |
//! | `NetworkSimulator`     |          |        |   x   |               |
//! | `MockToolRegistry`     |          |        |       |       x       |
//!
//! The orchestrator only talks to layers through these methods (plus each
//! layer's own configuration setters); it never touches layer state.

use async_trait::async_trait;
use parley_env::{AudioChunk, ToolArgs};
use std::time::Duration;

use crate::error::LayerError;
use crate::tools::CallWait;

/// RNG stream identifiers handed to `HarnessContext::derive_rng`.
pub const RNG_STREAM_NOISE: u64 = 0x4e01;
pub const RNG_STREAM_NETWORK: u64 = 0x4e02;
pub const RNG_STREAM_BARGE_IN: u64 = 0x4e03;
pub const RNG_STREAM_TOOLS: u64 = 0x4e04;
pub const RNG_STREAM_VIDEO: u64 = 0x4e05;

/// Base trait of every layer.
pub trait SimulationLayer: Send + Sync + 'static {
    /// Name used in logs and in `UnregisteredLayer` errors.
    fn layer_name(&self) -> &'static str;
}

/// A producer of paced, finite, single-consumption chunk sequences.
///
/// Every call creates a fresh sequence; sequences are not restartable.
pub trait ChunkSource: SimulationLayer {
    type Request;
    type Stream;

    fn generate(&self, request: Self::Request) -> Result<Self::Stream, LayerError>;
}

/// A layer that accepts side-effecting injections at the current time.
pub trait Injectable: SimulationLayer {
    type Kind;

    fn inject(&self, kind: Self::Kind, source: &str) -> Result<(), LayerError>;
}

/// A stage on the microphone path. `None` means the chunk was consumed
/// (dropped or withheld) and must not be delivered.
#[async_trait]
pub trait ChunkFilter: SimulationLayer {
    async fn apply(&self, chunk: AudioChunk) -> Option<AudioChunk>;
}

/// A layer whose effects can be awaited with a timeout.
#[async_trait]
pub trait CallObserver: SimulationLayer {
    async fn wait_for_call(&self, name: &str, args_contain: &ToolArgs, timeout: Duration) -> CallWait;
}
