//! Environmental noise engine.
//!
//! Three-layer additive model applied to every outgoing speech chunk:
//!
//! 1. **Ambient** - a continuous bed (office, cafe, street) mixed at a
//!    target SNR relative to the user's speech.
//! 2. **Transient** - bounded events (phone ring, dog bark) at their own
//!    peak level, faded in and out at the window boundaries.
//! 3. **Competing speech** - background talkers mixed at a (usually
//!    negative) SNR relative to the user's speech.
//!
//! Noise gain is derived from the long-run speech level, not from each
//! chunk, so the noise floor stays put while the user's speech envelope
//! moves:
//!
//! ```text
//! gain = speech_rms / (noise_rms * 10^(snr_db / 20))
//! ```

use async_trait::async_trait;
use parley_env::{lock, AudioChunk, HarnessContext};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use std::f64::consts::PI;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::LayerError;
use crate::layer::{ChunkFilter, Injectable, SimulationLayer, RNG_STREAM_NOISE};

/// Speech level assumed before any voiced chunk has been observed.
pub const REFERENCE_SPEECH_RMS: f64 = 3000.0;

/// Default SNR of background talkers relative to the user.
pub const DEFAULT_COMPETING_SNR_DB: f64 = -3.0;

/// Chunks quieter than this do not update the speech estimate.
const VOICED_RMS: f64 = 100.0;
const MAX_FADE: Duration = Duration::from_millis(50);
const COMPETING_SPEECH_SECS: (f64, f64) = (3.0, 8.0);
const SYLLABLE_RATE_HZ: f64 = 4.0;

/// A named continuous background.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmbientProfile {
    pub name: &'static str,
    pub snr_db: f64,
    /// One-pole low-pass coefficient; 0 is white noise
    pub smoothing: f64,
}

pub const AMBIENT_PROFILES: &[AmbientProfile] = &[
    AmbientProfile { name: "quiet_room", snr_db: 40.0, smoothing: 0.0 },
    AmbientProfile { name: "office", snr_db: 25.0, smoothing: 0.3 },
    AmbientProfile { name: "cafe", snr_db: 15.0, smoothing: 0.2 },
    AmbientProfile { name: "street", snr_db: 10.0, smoothing: 0.6 },
    AmbientProfile { name: "construction", snr_db: 5.0, smoothing: 0.4 },
    AmbientProfile { name: "car_driving", snr_db: 18.0, smoothing: 0.9 },
];

pub fn ambient_profile(name: &str) -> Result<&'static AmbientProfile, LayerError> {
    AMBIENT_PROFILES
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| LayerError::UnknownNoiseProfile(name.to_string()))
}

/// Catalog entry for a transient noise source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransientSpec {
    pub name: &'static str,
    /// Duration range in seconds
    pub duration_secs: (f64, f64),
    pub peak_dbfs: f64,
}

pub const TRANSIENT_EVENTS: &[TransientSpec] = &[
    TransientSpec { name: "phone_ring", duration_secs: (2.0, 5.0), peak_dbfs: -10.0 },
    TransientSpec { name: "door_knock", duration_secs: (1.0, 3.0), peak_dbfs: -15.0 },
    TransientSpec { name: "dog_bark", duration_secs: (1.0, 4.0), peak_dbfs: -8.0 },
    TransientSpec { name: "baby_cry", duration_secs: (3.0, 10.0), peak_dbfs: -5.0 },
    TransientSpec { name: "notification", duration_secs: (0.5, 1.0), peak_dbfs: -20.0 },
    TransientSpec { name: "keyboard", duration_secs: (0.2, 1.0), peak_dbfs: -25.0 },
    TransientSpec { name: "siren", duration_secs: (5.0, 15.0), peak_dbfs: -3.0 },
];

pub fn transient_spec(name: &str) -> Result<&'static TransientSpec, LayerError> {
    TRANSIENT_EVENTS
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| LayerError::UnknownNoiseSource(name.to_string()))
}

/// What `inject` adds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseKind {
    Transient,
    CompetingSpeech,
}

impl std::str::FromStr for NoiseKind {
    type Err = LayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "transient" => Ok(NoiseKind::Transient),
            "competing_speech" | "babble" => Ok(NoiseKind::CompetingSpeech),
            _ => Err(LayerError::UnknownNoiseKind(s.to_string())),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseConfig {
    pub competing_speech_snr_db: f64,
    /// Cap on concurrently active injected instances; `None` is unbounded.
    /// When full, the oldest instance is evicted.
    pub max_active_transients: Option<usize>,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            competing_speech_snr_db: DEFAULT_COMPETING_SNR_DB,
            max_active_transients: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NoiseLevel {
    /// Absolute peak level in dB relative to full scale
    PeakDbfs(f64),
    /// Level relative to the long-run speech RMS
    RelativeSnrDb(f64),
}

/// An injected noise instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveNoise {
    pub kind: NoiseKind,
    pub source: String,
    pub start: Duration,
    pub duration: Duration,
    pub level: NoiseLevel,
    /// Partials (Hz, phase) used to render the instance
    partials: Vec<(f64, f64)>,
}

impl ActiveNoise {
    /// Linear fade-in/out envelope at absolute time `t`.
    fn envelope(&self, t: f64) -> f64 {
        let start = self.start.as_secs_f64();
        let dur = self.duration.as_secs_f64();
        let elapsed = t - start;
        if elapsed < 0.0 || elapsed > dur {
            return 0.0;
        }
        let fade = MAX_FADE.as_secs_f64().min(dur / 4.0);
        if fade <= 0.0 {
            return 1.0;
        }
        (elapsed / fade).min((dur - elapsed) / fade).clamp(0.0, 1.0)
    }

    fn waveform(&self, t: f64) -> f64 {
        let tone: f64 = self
            .partials
            .iter()
            .map(|&(freq, phase)| (2.0 * PI * freq * t + phase).sin())
            .sum();
        match self.kind {
            NoiseKind::Transient => tone,
            // Syllable-rate amplitude modulation gives speech-like bursts
            NoiseKind::CompetingSpeech => tone * (0.5 + 0.5 * (2.0 * PI * SYLLABLE_RATE_HZ * t).sin()),
        }
    }
}

#[derive(Debug, Clone)]
struct SnrFade {
    from: f64,
    start: Duration,
    over: Duration,
}

#[derive(Debug, Clone)]
struct AmbientBed {
    name: String,
    snr_db: f64,
    smoothing: f64,
    fade: Option<SnrFade>,
    filter_state: f64,
}

impl AmbientBed {
    fn snr_at(&self, now: Duration) -> f64 {
        match &self.fade {
            Some(fade) if now < fade.start + fade.over => {
                let progress = (now.saturating_sub(fade.start)).as_secs_f64() / fade.over.as_secs_f64();
                fade.from + (self.snr_db - fade.from) * progress
            }
            _ => self.snr_db,
        }
    }
}

struct NoiseState {
    ambient: Option<AmbientBed>,
    active: Vec<ActiveNoise>,
    speech_energy: f64,
    speech_samples: u64,
    rng: ChaCha8Rng,
}

impl NoiseState {
    fn prune(&mut self, now: Duration) {
        self.active.retain(|n| now.saturating_sub(n.start) <= n.duration);
    }

    fn speech_rms(&self) -> f64 {
        if self.speech_samples == 0 {
            REFERENCE_SPEECH_RMS
        } else {
            (self.speech_energy / self.speech_samples as f64).sqrt()
        }
    }
}

/// Mixes environmental noise into the user's microphone signal.
pub struct NoiseEngine<Ctx: HarnessContext> {
    ctx: Arc<Ctx>,
    config: NoiseConfig,
    state: Mutex<NoiseState>,
}

impl<Ctx: HarnessContext> NoiseEngine<Ctx> {
    pub fn new(ctx: Arc<Ctx>, config: NoiseConfig) -> Self {
        let rng = ctx.derive_rng(RNG_STREAM_NOISE);
        Self {
            ctx,
            config,
            state: Mutex::new(NoiseState {
                ambient: None,
                active: Vec::new(),
                speech_energy: 0.0,
                speech_samples: 0,
                rng,
            }),
        }
    }

    /// Switches the ambient bed, optionally overriding the profile's SNR.
    pub fn set_profile(&self, name: &str, snr_db: Option<f64>) -> Result<(), LayerError> {
        self.crossfade_profile(name, snr_db, Duration::ZERO)
    }

    /// Switches the ambient bed, ramping the SNR linearly over `over`.
    pub fn crossfade_profile(&self, name: &str, snr_db: Option<f64>, over: Duration) -> Result<(), LayerError> {
        let profile = ambient_profile(name)?;
        let now = self.ctx.now();
        let mut state = lock(&self.state);

        let fade = match (&state.ambient, over.is_zero()) {
            (Some(current), false) => Some(SnrFade {
                from: current.snr_at(now),
                start: now,
                over,
            }),
            _ => None,
        };
        tracing::debug!(profile = name, snr_db = snr_db.unwrap_or(profile.snr_db), "ambient profile set");
        state.ambient = Some(AmbientBed {
            name: profile.name.to_string(),
            snr_db: snr_db.unwrap_or(profile.snr_db),
            smoothing: profile.smoothing,
            fade,
            filter_state: 0.0,
        });
        Ok(())
    }

    /// Overrides the SNR of the current ambient bed.
    pub fn set_snr(&self, snr_db: f64) {
        if let Some(bed) = lock(&self.state).ambient.as_mut() {
            bed.snr_db = snr_db;
            bed.fade = None;
        }
    }

    /// Name and effective SNR of the ambient bed.
    pub fn ambient(&self) -> Option<(String, f64)> {
        let now = self.ctx.now();
        lock(&self.state)
            .ambient
            .as_ref()
            .map(|bed| (bed.name.clone(), bed.snr_at(now)))
    }

    /// Injects a noise instance starting now.
    ///
    /// `duration` overrides the catalog draw; `level_db` overrides the peak
    /// level (transients) or the relative SNR (competing speech).
    pub fn inject_with(
        &self,
        kind: NoiseKind,
        source: &str,
        duration: Option<Duration>,
        level_db: Option<f64>,
    ) -> Result<(), LayerError> {
        let now = self.ctx.now();
        let mut state = lock(&self.state);
        state.prune(now);

        let noise = match kind {
            NoiseKind::Transient => {
                let spec = transient_spec(source)?;
                let (lo, hi) = spec.duration_secs;
                let secs = state.rng.gen_range(lo..=hi);
                let freq = 800.0 + (source.bytes().map(u64::from).sum::<u64>() % 400) as f64;
                ActiveNoise {
                    kind,
                    source: spec.name.to_string(),
                    start: now,
                    duration: duration.unwrap_or_else(|| Duration::from_secs_f64(secs)),
                    level: NoiseLevel::PeakDbfs(level_db.unwrap_or(spec.peak_dbfs)),
                    partials: vec![(freq, 0.0)],
                }
            }
            NoiseKind::CompetingSpeech => {
                let (lo, hi) = COMPETING_SPEECH_SECS;
                let secs = state.rng.gen_range(lo..=hi);
                let partials = (0..3)
                    .map(|_| (state.rng.gen_range(120.0..300.0), state.rng.gen_range(0.0..2.0 * PI)))
                    .collect();
                ActiveNoise {
                    kind,
                    source: if source.is_empty() { "background_speaker".to_string() } else { source.to_string() },
                    start: now,
                    duration: duration.unwrap_or_else(|| Duration::from_secs_f64(secs)),
                    level: NoiseLevel::RelativeSnrDb(level_db.unwrap_or(self.config.competing_speech_snr_db)),
                    partials,
                }
            }
        };

        if let Some(cap) = self.config.max_active_transients {
            while state.active.len() >= cap.max(1) {
                let evicted = state.active.remove(0);
                tracing::debug!(source = %evicted.source, "evicting oldest noise instance");
            }
        }
        tracing::debug!(
            kind = ?noise.kind,
            source = %noise.source,
            duration_ms = noise.duration.as_millis() as u64,
            "noise injected"
        );
        state.active.push(noise);
        Ok(())
    }

    /// Currently active injected instances.
    pub fn active(&self) -> Vec<ActiveNoise> {
        let now = self.ctx.now();
        let mut state = lock(&self.state);
        state.prune(now);
        state.active.clone()
    }

    /// Long-run RMS of the voiced speech seen so far.
    pub fn speech_rms(&self) -> f64 {
        lock(&self.state).speech_rms()
    }

    /// Sums speech with every active noise layer.
    pub fn mix_with_speech(&self, chunk: AudioChunk) -> AudioChunk {
        let now = self.ctx.now();
        let speech = chunk.samples();
        if speech.is_empty() {
            return chunk;
        }
        let channels = usize::from(chunk.channels.max(1));
        let sr = f64::from(chunk.sample_rate.max(1));
        let t0 = chunk.timestamp.as_secs_f64();
        let time_of = |i: usize| t0 + (i / channels) as f64 / sr;

        let mut state = lock(&self.state);
        state.prune(now);

        let chunk_energy: f64 = speech.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
        if (chunk_energy / speech.len() as f64).sqrt() > VOICED_RMS {
            state.speech_energy += chunk_energy;
            state.speech_samples += speech.len() as u64;
        }
        let speech_rms = state.speech_rms();

        let mut mixed: Vec<f64> = speech.iter().map(|&s| f64::from(s)).collect();

        let NoiseState { ambient, active, rng, .. } = &mut *state;

        if let Some(bed) = ambient.as_mut() {
            let snr = bed.snr_at(now);
            let raw: Vec<f64> = (0..speech.len())
                .map(|_| {
                    let x: f64 = rng.sample(StandardNormal);
                    bed.filter_state = bed.smoothing * bed.filter_state + (1.0 - bed.smoothing) * x;
                    bed.filter_state
                })
                .collect();
            let gain = gain_for(speech_rms, rms(&raw), snr);
            for (m, n) in mixed.iter_mut().zip(&raw) {
                *m += n * gain;
            }
        }

        for noise in active.iter() {
            let raw: Vec<f64> = (0..speech.len())
                .map(|i| noise.envelope(time_of(i)) * noise.waveform(time_of(i)))
                .collect();
            match noise.level {
                NoiseLevel::PeakDbfs(db) => {
                    let amplitude = f64::from(i16::MAX) * db_to_linear(db);
                    for (m, n) in mixed.iter_mut().zip(&raw) {
                        *m += n * amplitude;
                    }
                }
                NoiseLevel::RelativeSnrDb(snr) => {
                    // Envelope-weighted so fades still ramp the level
                    let peak_env = (0..speech.len())
                        .map(|i| noise.envelope(time_of(i)))
                        .fold(0.0f64, f64::max);
                    let raw_rms = rms(&raw);
                    if raw_rms > 0.0 {
                        let gain = gain_for(speech_rms, raw_rms / peak_env.max(f64::EPSILON), snr);
                        for (m, n) in mixed.iter_mut().zip(&raw) {
                            *m += n * gain;
                        }
                    }
                }
            }
        }

        let out: Vec<i16> = mixed
            .iter()
            .map(|&v| v.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16)
            .collect();
        AudioChunk::from_samples(&out, chunk.timestamp, chunk.sample_rate, chunk.channels)
    }
}

impl<Ctx: HarnessContext> SimulationLayer for NoiseEngine<Ctx> {
    fn layer_name(&self) -> &'static str {
        "noise"
    }
}

impl<Ctx: HarnessContext> Injectable for NoiseEngine<Ctx> {
    type Kind = NoiseKind;

    fn inject(&self, kind: NoiseKind, source: &str) -> Result<(), LayerError> {
        self.inject_with(kind, source, None, None)
    }
}

#[async_trait]
impl<Ctx: HarnessContext> ChunkFilter for NoiseEngine<Ctx> {
    async fn apply(&self, chunk: AudioChunk) -> Option<AudioChunk> {
        Some(self.mix_with_speech(chunk))
    }
}

fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

fn gain_for(speech_rms: f64, noise_rms: f64, snr_db: f64) -> f64 {
    if noise_rms <= 0.0 {
        return 0.0;
    }
    speech_rms / (noise_rms * db_to_linear(snr_db))
}

fn rms(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|v| v * v).sum::<f64>() / samples.len() as f64).sqrt()
}

/// Measured SNR in dB of `mixed` against the clean `speech` it contains.
pub fn measured_snr_db(speech: &[i16], mixed: &[i16]) -> f64 {
    let signal: Vec<f64> = speech.iter().map(|&s| f64::from(s)).collect();
    let noise: Vec<f64> = speech
        .iter()
        .zip(mixed)
        .map(|(&s, &m)| f64::from(m) - f64::from(s))
        .collect();
    20.0 * (rms(&signal) / rms(&noise)).log10()
}
