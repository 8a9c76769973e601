//! Simulated microphone: synthetic speech plus paced chunk streaming.
//!
//! Speech is a deterministic tone standing in for TTS output. Its length
//! tracks the text length (~80ms per character, never shorter than
//! 500ms) and its pitch is derived from the text, so two different
//! utterances are distinguishable in captured audio.

use parley_env::{AudioChunk, HarnessContext};
use serde::Deserialize;
use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;

use crate::error::LayerError;
use crate::layer::{ChunkSource, SimulationLayer};

const TTS_PREFIX: &str = "tts://";
const SECS_PER_CHAR: f64 = 0.08;
const MIN_UTTERANCE_SECS: f64 = 0.5;
const TONE_AMPLITUDE: f64 = 16000.0;
const HESITATION_EVERY_SECS: f64 = 2.0;
const HESITATION_SECS: f64 = 0.15;
const INTERRUPTION_TRIM_MS: u64 = 50;
const SILENCE_THRESHOLD: i16 = 500;

/// Microphone configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Pacing interval between successive chunks
    pub chunk_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            chunk_ms: 20,
        }
    }
}

/// How the simulated user speaks.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SpeechStyle {
    /// Playback speed multiplier (>1 is faster)
    pub speed: f64,
    /// Insert short pauses every couple of seconds
    pub hesitation: bool,
    /// Start abruptly, trimming leading silence
    pub interruption: bool,
    /// Linear gain applied after synthesis
    pub volume: f64,
}

impl Default for SpeechStyle {
    fn default() -> Self {
        Self {
            speed: 1.0,
            hesitation: false,
            interruption: false,
            volume: 1.0,
        }
    }
}

/// A `user_speak` request.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    pub text: String,
    pub style: SpeechStyle,
}

impl SpeechRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            style: SpeechStyle::default(),
        }
    }

    pub fn with_style(mut self, style: SpeechStyle) -> Self {
        self.style = style;
        self
    }
}

/// Simulates the user's microphone.
pub struct AudioStreamSimulator<Ctx: HarnessContext> {
    ctx: Arc<Ctx>,
    config: AudioConfig,
}

impl<Ctx: HarnessContext> AudioStreamSimulator<Ctx> {
    pub fn new(ctx: Arc<Ctx>, config: AudioConfig) -> Self {
        Self { ctx, config }
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    /// Renders `text` to mono PCM with `style` applied.
    pub fn synthesize(&self, text: &str, style: &SpeechStyle) -> Vec<i16> {
        let text = text.strip_prefix(TTS_PREFIX).unwrap_or(text);
        let sr = f64::from(self.config.sample_rate);

        let secs = (text.chars().count() as f64 * SECS_PER_CHAR).max(MIN_UTTERANCE_SECS);
        let freq = 200.0 + (fnv1a(text.as_bytes()) % 300) as f64;
        let n = (sr * secs).round() as usize;

        let mut samples: Vec<i16> = (0..n)
            .map(|i| ((2.0 * PI * freq * i as f64 / sr).sin() * TONE_AMPLITUDE) as i16)
            .collect();

        if style.speed > 0.0 && (style.speed - 1.0).abs() > f64::EPSILON {
            samples = resample(&samples, style.speed);
        }
        if style.hesitation {
            samples = insert_pauses(&samples, self.config.sample_rate);
        }
        if style.interruption {
            let max = (u64::from(self.config.sample_rate) * INTERRUPTION_TRIM_MS / 1000) as usize;
            samples = trim_leading_silence(&samples, max);
        }
        if (style.volume - 1.0).abs() > f64::EPSILON {
            for s in samples.iter_mut() {
                *s = (f64::from(*s) * style.volume).clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
            }
        }

        samples
    }

    /// Streams pre-rendered mono PCM, starting now.
    pub fn stream_pcm(&self, pcm: Vec<i16>) -> ChunkStream<Ctx> {
        let channels = self.config.channels.max(1);
        let samples = if channels == 1 {
            pcm
        } else {
            pcm.iter()
                .flat_map(|&s| std::iter::repeat(s).take(usize::from(channels)))
                .collect()
        };
        let frames_per_chunk = (u64::from(self.config.sample_rate) * self.config.chunk_ms / 1000).max(1) as usize;

        ChunkStream {
            ctx: Arc::clone(&self.ctx),
            samples,
            samples_per_chunk: frames_per_chunk * usize::from(channels),
            sample_rate: self.config.sample_rate,
            channels,
            chunk_period: Duration::from_millis(self.config.chunk_ms),
            start: self.ctx.now(),
            next_index: 0,
        }
    }
}

impl<Ctx: HarnessContext> SimulationLayer for AudioStreamSimulator<Ctx> {
    fn layer_name(&self) -> &'static str {
        "audio"
    }
}

impl<Ctx: HarnessContext> ChunkSource for AudioStreamSimulator<Ctx> {
    type Request = SpeechRequest;
    type Stream = ChunkStream<Ctx>;

    fn generate(&self, request: SpeechRequest) -> Result<ChunkStream<Ctx>, LayerError> {
        if request.style.speed <= 0.0 || !request.style.speed.is_finite() {
            return Err(LayerError::invalid(format!("speech speed must be positive, got {}", request.style.speed)));
        }
        let pcm = self.synthesize(&request.text, &request.style);
        tracing::debug!(
            text = %request.text,
            samples = pcm.len(),
            "synthesized utterance"
        );
        Ok(self.stream_pcm(pcm))
    }
}

/// A lazy, finite, single-consumption sequence of microphone chunks.
///
/// Chunk `k` is released at `start + k * chunk_ms` and stamped with that
/// capture time. A consumer that falls behind receives the overdue chunks
/// immediately, with their original capture timestamps.
pub struct ChunkStream<Ctx: HarnessContext> {
    ctx: Arc<Ctx>,
    samples: Vec<i16>,
    samples_per_chunk: usize,
    sample_rate: u32,
    channels: u16,
    chunk_period: Duration,
    start: Duration,
    next_index: usize,
}

impl<Ctx: HarnessContext> ChunkStream<Ctx> {
    /// Total number of chunks this stream yields.
    pub fn chunk_count(&self) -> usize {
        self.samples.len().div_ceil(self.samples_per_chunk)
    }

    pub fn start(&self) -> Duration {
        self.start
    }

    /// Virtual time at which the last sample has been spoken.
    pub fn ends_at(&self) -> Duration {
        let frames = self.samples.len() / usize::from(self.channels);
        self.start + Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate))
    }

    /// Waits for the next chunk's capture time and returns it.
    pub async fn next(&mut self) -> Option<AudioChunk> {
        let offset = self.next_index * self.samples_per_chunk;
        if offset >= self.samples.len() {
            return None;
        }
        let at = self.start + self.chunk_period * self.next_index as u32;
        self.ctx.sleep_until(at).await;

        let end = (offset + self.samples_per_chunk).min(self.samples.len());
        self.next_index += 1;
        Some(AudioChunk::from_samples(
            &self.samples[offset..end],
            at,
            self.sample_rate,
            self.channels,
        ))
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Nearest-index resampling; `speed > 1` shortens the clip.
fn resample(samples: &[i16], speed: f64) -> Vec<i16> {
    let out_len = (samples.len() as f64 / speed).floor() as usize;
    (0..out_len)
        .map(|i| (i as f64 * speed).round() as usize)
        .take_while(|&idx| idx < samples.len())
        .map(|idx| samples[idx])
        .collect()
}

fn insert_pauses(samples: &[i16], sample_rate: u32) -> Vec<i16> {
    let every = (f64::from(sample_rate) * HESITATION_EVERY_SECS) as usize;
    let pause = (f64::from(sample_rate) * HESITATION_SECS) as usize;
    let mut out = Vec::with_capacity(samples.len() + pause * (samples.len() / every.max(1)));
    for (i, block) in samples.chunks(every.max(1)).enumerate() {
        if i > 0 {
            out.extend(std::iter::repeat(0i16).take(pause));
        }
        out.extend_from_slice(block);
    }
    out
}

fn trim_leading_silence(samples: &[i16], max: usize) -> Vec<i16> {
    let silent = samples
        .iter()
        .take(max)
        .take_while(|s| s.unsigned_abs() < SILENCE_THRESHOLD.unsigned_abs())
        .count();
    samples[silent..].to_vec()
}
