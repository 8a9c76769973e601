//! Parley Core - Simulation layers for voice-agent testing
//!
//! Each layer models one way the real world degrades a conversation:
//! 1. **Audio / Video**: paced synthetic microphone and camera input
//! 2. **Noise**: ambient beds, transient events and competing speakers
//! 3. **Network**: latency, jitter, loss, bandwidth caps and dropouts
//! 4. **Barge-in**: users who interrupt, correct, or go "mm-hmm"
//! 5. **Tools**: slow and flaky mock backends with an inspectable call log
//!
//! Layers draw time and randomness only from a `HarnessContext`, so the
//! same seed replays the same conversation.

pub mod audio;
pub mod barge_in;
pub mod error;
pub mod layer;
pub mod mocks;
pub mod network;
pub mod noise;
pub mod tools;
pub mod video;

// Re-export key types for convenience
pub use audio::{AudioConfig, AudioStreamSimulator, ChunkStream, SpeechRequest, SpeechStyle};
pub use barge_in::{BargeInPattern, BargeInPhase, BargeInRequest, BargeInRun, BargeInSimulator, InterruptEvent};
pub use error::LayerError;
pub use layer::{CallObserver, ChunkFilter, ChunkSource, Injectable, SimulationLayer};
pub use mocks::{register_general_mocks, register_hotel_booking_mocks};
pub use network::{NetworkConfig, NetworkSimulator, NetworkStats, Transmission};
pub use noise::{NoiseConfig, NoiseEngine, NoiseKind, NoiseLevel};
pub use tools::{CallWait, MockOverride, MockToolRegistry, ToolCallRecord, ToolCompletion, ToolMock};
pub use video::{FrameStream, VideoConfig, VideoRequest, VideoSource, VideoStreamSimulator};
