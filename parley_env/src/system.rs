//! Boundary with the system under test.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::EnvError;
use crate::types::{AudioChunk, ResponseStream, SystemState, ToolArgs, ToolResult, VideoFrame};

/// Abstraction for a realtime voice agent driven by the harness.
///
/// # Implementations
///
/// - **Live**: an adapter speaking the agent's wire protocol
/// - **Simulation**: `ScriptedSystem` in `parley_sim`
///
/// # Turn Flow
///
/// ```text
/// Harness                        VoiceSystem
///   |-- push_audio(chunk) x N ------->|
///   |-- commit_audio() -------------->|-- processing
///   |                                 |-- tool call --> ToolInvoker
///   |<-- response stream -------------|-- speaking
/// ```
#[async_trait]
pub trait VoiceSystem: Send + Sync + 'static {
    /// Delivers one microphone chunk.
    async fn push_audio(&self, chunk: AudioChunk) -> Result<(), EnvError>;

    /// Delivers one camera/screen frame.
    async fn push_video(&self, frame: VideoFrame) -> Result<(), EnvError>;

    /// Marks the end of the user's utterance.
    async fn commit_audio(&self) -> Result<(), EnvError>;

    /// Subscribes to the system's responses from this point on.
    fn get_response_stream(&self) -> ResponseStream;

    /// Routes calls to tool `name` through `handler`.
    fn register_tool_handler(&self, name: &str, handler: Arc<dyn ToolInvoker>);

    /// Current conversational state.
    fn state(&self) -> SystemState;
}

/// Anything able to answer a tool call on behalf of an external service.
#[async_trait]
pub trait ToolInvoker: Send + Sync + 'static {
    async fn invoke(&self, name: &str, args: ToolArgs) -> ToolResult;
}
