//! Common types shared by the harness, its layers and the system under test.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Unique identifier for a scenario run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Creates a new random RunId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic RunId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// A block of 16-bit little-endian PCM captured at `timestamp`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Raw PCM16 LE bytes
    pub data: Vec<u8>,

    /// Virtual capture time of the first sample
    pub timestamp: Duration,

    /// Samples per second
    pub sample_rate: u32,

    /// Interleaved channel count
    pub channels: u16,
}

impl AudioChunk {
    /// Packs samples into a chunk.
    pub fn from_samples(samples: &[i16], timestamp: Duration, sample_rate: u32, channels: u16) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            data.extend_from_slice(&s.to_le_bytes());
        }
        Self {
            data,
            timestamp,
            sample_rate,
            channels,
        }
    }

    /// Decodes the payload back into samples.
    pub fn samples(&self) -> Vec<i16> {
        self.data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    /// Number of sample frames in the chunk.
    pub fn frames(&self) -> usize {
        self.data.len() / 2 / usize::from(self.channels.max(1))
    }

    /// Playback duration of the chunk.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / f64::from(self.sample_rate))
    }

    /// Root-mean-square level of the chunk in sample units.
    pub fn rms(&self) -> f64 {
        let samples = self.samples();
        if samples.is_empty() {
            return 0.0;
        }
        let energy: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
        (energy / samples.len() as f64).sqrt()
    }
}

/// Pixel layout of a video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Rgb24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
        }
    }
}

/// A single video frame.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub data: Vec<u8>,
    pub timestamp: Duration,
    /// (width, height)
    pub resolution: (u32, u32),
    pub format: PixelFormat,
}

/// Coarse conversational state exposed by the system under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemState {
    Idle,
    Listening,
    Processing,
    ToolCalling,
    Speaking,
}

impl SystemState {
    pub fn name(&self) -> &'static str {
        match self {
            SystemState::Idle => "idle",
            SystemState::Listening => "listening",
            SystemState::Processing => "processing",
            SystemState::ToolCalling => "tool_calling",
            SystemState::Speaking => "speaking",
        }
    }
}

impl std::fmt::Display for SystemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for SystemState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(SystemState::Idle),
            "listening" => Ok(SystemState::Listening),
            "processing" | "thinking" => Ok(SystemState::Processing),
            "tool_calling" | "toolcalling" => Ok(SystemState::ToolCalling),
            "speaking" => Ok(SystemState::Speaking),
            _ => Err(format!("Unknown system state: {}", s)),
        }
    }
}

/// Arguments passed to a tool call.
pub type ToolArgs = serde_json::Map<String, serde_json::Value>;

/// Why a tool call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Injected failure simulating an unavailable backend
    ServiceUnavailable,
    /// The mock handler itself returned an error
    HandlerFailed,
    /// No mock is registered under the requested name
    UnknownTool,
}

impl ToolErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ToolErrorKind::ServiceUnavailable => "ServiceUnavailable",
            ToolErrorKind::HandlerFailed => "HandlerFailed",
            ToolErrorKind::UnknownTool => "UnknownTool",
        }
    }
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

/// Result returned to the system under test for a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub data: serde_json::Value,
    pub error: Option<ToolError>,
    /// Simulated latency between invocation and completion
    pub latency: Duration,
}

impl ToolResult {
    pub fn ok(data: serde_json::Value, latency: Duration) -> Self {
        Self {
            success: true,
            data,
            error: None,
            latency,
        }
    }

    pub fn failure(kind: ToolErrorKind, message: impl Into<String>, latency: Duration) -> Self {
        Self {
            success: false,
            data: serde_json::Value::Null,
            error: Some(ToolError {
                kind,
                message: message.into(),
            }),
            latency,
        }
    }

    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// What the system under test produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseKind {
    /// A block of synthesized reply audio
    Audio(Vec<u8>),
    /// Reply transcript text
    Text(String),
    /// Recognized user intent tag
    Intent(String),
    ToolCall { name: String, args: ToolArgs },
    ToolResult { name: String, result: ToolResult },
    StateChange(SystemState),
    Error(String),
}

/// One event on the system's response stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEvent {
    pub kind: ResponseKind,
    pub timestamp: Duration,
}

impl ResponseEvent {
    pub fn new(kind: ResponseKind, timestamp: Duration) -> Self {
        Self { kind, timestamp }
    }
}

/// Lazy, infinite-until-closed view of a system's responses.
///
/// Each call to `get_response_stream` hands out an independent
/// subscription that only sees events emitted after it was created.
pub struct ResponseStream {
    rx: broadcast::Receiver<ResponseEvent>,
}

impl ResponseStream {
    pub fn new(rx: broadcast::Receiver<ResponseEvent>) -> Self {
        Self { rx }
    }

    /// Waits for the next event; `None` once the sender side is gone.
    pub async fn next(&mut self) -> Option<ResponseEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "response stream lagged, events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_chunk_sample_roundtrip() {
        let samples = vec![0i16, 1000, -1000, i16::MAX, i16::MIN];
        let chunk = AudioChunk::from_samples(&samples, Duration::from_millis(40), 16000, 1);

        assert_eq!(chunk.data.len(), 10);
        assert_eq!(chunk.samples(), samples);
        assert_eq!(chunk.frames(), 5);
    }

    #[test]
    fn test_audio_chunk_duration_and_rms() {
        let samples = vec![1000i16; 320];
        let chunk = AudioChunk::from_samples(&samples, Duration::ZERO, 16000, 1);

        assert_eq!(chunk.duration(), Duration::from_millis(20));
        assert!((chunk.rms() - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_run_id_from_seed_is_stable() {
        assert_eq!(RunId::from_seed(42), RunId::from_seed(42));
        assert_ne!(RunId::from_seed(42), RunId::from_seed(43));
        assert_eq!(RunId::from_seed(42).to_string().len(), 8);
    }

    #[test]
    fn test_system_state_parse() {
        assert_eq!("speaking".parse::<SystemState>(), Ok(SystemState::Speaking));
        assert_eq!("Tool_Calling".parse::<SystemState>(), Ok(SystemState::ToolCalling));
        assert!("dancing".parse::<SystemState>().is_err());
    }

    #[tokio::test]
    async fn test_response_stream_ends_when_sender_dropped() {
        let (tx, rx) = broadcast::channel(8);
        let mut stream = ResponseStream::new(rx);

        tx.send(ResponseEvent::new(ResponseKind::Text("hi".into()), Duration::ZERO))
            .unwrap();
        drop(tx);

        let first = stream.next().await.unwrap();
        assert_eq!(first.kind, ResponseKind::Text("hi".into()));
        assert!(stream.next().await.is_none());
    }
}
