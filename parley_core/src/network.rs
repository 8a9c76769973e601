//! Network impairment between the user's microphone and the agent.
//!
//! Every chunk goes through a fixed pipeline:
//!
//! ```text
//! connected? --no--> buffer (withheld until reconnect)
//!     | yes
//! loss draw --hit--> dropped
//!     |
//! delay = clamp(latency + N(0, jitter), 0, MAX_DELAY)   arrival = capture time + delay
//!     | suspend until arrival
//! bandwidth cap --over--> sample-and-hold decimation
//!     |
//! delivered
//! ```

use async_trait::async_trait;
use parley_env::{lock, AudioChunk, HarnessContext};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::LayerError;

/// Upper bound on the delay of a single chunk.
const MAX_DELAY: Duration = Duration::from_secs(60);
use crate::layer::{ChunkFilter, SimulationLayer, RNG_STREAM_NETWORK};

/// Impairment parameters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub latency_ms: f64,
    pub jitter_ms: f64,
    /// Loss probability in [0, 1]
    pub loss: f64,
    /// Optional cap in bits per second
    pub bandwidth_bps: Option<u64>,
}

impl NetworkConfig {
    pub fn new(latency_ms: f64, jitter_ms: f64, loss: f64) -> Self {
        Self {
            latency_ms,
            jitter_ms,
            loss,
            bandwidth_bps: None,
        }
    }

    /// Looks up a named profile.
    pub fn profile(name: &str) -> Result<Self, LayerError> {
        match name {
            "perfect" => Ok(Self::new(10.0, 2.0, 0.0)),
            "good_4g" => Ok(Self::new(50.0, 15.0, 0.01)),
            "poor_4g" => Ok(Self::new(150.0, 50.0, 0.05)),
            "bad_wifi" => Ok(Self::new(200.0, 100.0, 0.10)),
            "elevator" => Ok(Self::new(500.0, 200.0, 0.30)),
            _ => Err(LayerError::UnknownNetworkProfile(name.to_string())),
        }
    }

    fn sanitized(mut self) -> Self {
        self.latency_ms = self.latency_ms.max(0.0);
        self.jitter_ms = self.jitter_ms.max(0.0);
        self.loss = if self.loss.is_finite() { self.loss.clamp(0.0, 1.0) } else { 0.0 };
        self
    }
}

/// What happened to one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum Transmission {
    Delivered {
        chunk: AudioChunk,
        sent_at: Duration,
        arrival: Duration,
        delivered_at: Duration,
    },
    /// Lost in transit; an expected outcome, not an error
    Dropped,
    /// Withheld during a disconnect, released on reconnect
    Buffered,
}

/// Delivery counters for the report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStats {
    /// Chunks that entered the pipeline while connected
    pub sent: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub buffered: u64,
    /// Buffered chunks released by a reconnect
    pub flushed: u64,
    pub disconnects: u64,
}

struct NetworkState {
    config: NetworkConfig,
    connected: bool,
    buffer: VecDeque<AudioChunk>,
    stats: NetworkStats,
    rng: ChaCha8Rng,
}

/// Simulated uplink.
pub struct NetworkSimulator<Ctx: HarnessContext> {
    ctx: Arc<Ctx>,
    state: Mutex<NetworkState>,
}

impl<Ctx: HarnessContext> NetworkSimulator<Ctx> {
    pub fn new(ctx: Arc<Ctx>, config: NetworkConfig) -> Self {
        let rng = ctx.derive_rng(RNG_STREAM_NETWORK);
        Self {
            ctx,
            state: Mutex::new(NetworkState {
                config: config.sanitized(),
                connected: true,
                buffer: VecDeque::new(),
                stats: NetworkStats::default(),
                rng,
            }),
        }
    }

    pub fn configure(&self, config: NetworkConfig) {
        tracing::debug!(?config, "network reconfigured");
        lock(&self.state).config = config.sanitized();
    }

    pub fn set_profile(&self, name: &str) -> Result<(), LayerError> {
        self.configure(NetworkConfig::profile(name)?);
        Ok(())
    }

    pub fn config(&self) -> NetworkConfig {
        lock(&self.state).config.clone()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    pub fn stats(&self) -> NetworkStats {
        lock(&self.state).stats.clone()
    }

    /// Pushes one chunk through the impairment pipeline.
    ///
    /// The chunk's capture timestamp is its send time. The caller is
    /// suspended until the computed arrival time, so a delivered chunk is
    /// never handed over early.
    pub async fn transmit(&self, chunk: AudioChunk) -> Transmission {
        let sent_at = chunk.timestamp;
        let (arrival, bandwidth) = {
            let mut state = lock(&self.state);
            if !state.connected {
                state.buffer.push_back(chunk);
                state.stats.buffered += 1;
                return Transmission::Buffered;
            }
            state.stats.sent += 1;

            let NetworkState { config, rng, stats, .. } = &mut *state;
            if config.loss > 0.0 && rng.gen_bool(config.loss) {
                stats.dropped += 1;
                return Transmission::Dropped;
            }

            let jitter = if config.jitter_ms > 0.0 {
                Normal::new(0.0, config.jitter_ms)
                    .map(|n| n.sample(rng))
                    .unwrap_or(0.0)
            } else {
                0.0
            };
            let delay_ms = (config.latency_ms + jitter).max(0.0);
            let delay = Duration::try_from_secs_f64(delay_ms / 1000.0).map_or(MAX_DELAY, |d| d.min(MAX_DELAY));
            (sent_at + delay, config.bandwidth_bps)
        };

        self.ctx.sleep_until(arrival).await;

        let chunk = match bandwidth {
            Some(cap) => degrade(chunk, cap),
            None => chunk,
        };
        let delivered_at = self.ctx.now();
        lock(&self.state).stats.delivered += 1;

        Transmission::Delivered {
            chunk,
            sent_at,
            arrival,
            delivered_at,
        }
    }

    /// Drops connectivity for `duration`, then returns everything offered
    /// in the meantime, in the order it was offered.
    pub async fn simulate_disconnect(&self, duration: Duration) -> Vec<AudioChunk> {
        {
            let mut state = lock(&self.state);
            state.connected = false;
            state.stats.disconnects += 1;
        }
        tracing::info!(duration_ms = duration.as_millis() as u64, "network disconnected");

        self.ctx.sleep(duration).await;

        let mut state = lock(&self.state);
        state.connected = true;
        let flushed: Vec<AudioChunk> = state.buffer.drain(..).collect();
        state.stats.flushed += flushed.len() as u64;
        tracing::info!(flushed = flushed.len(), "network reconnected");
        flushed
    }
}

impl<Ctx: HarnessContext> SimulationLayer for NetworkSimulator<Ctx> {
    fn layer_name(&self) -> &'static str {
        "network"
    }
}

#[async_trait]
impl<Ctx: HarnessContext> ChunkFilter for NetworkSimulator<Ctx> {
    async fn apply(&self, chunk: AudioChunk) -> Option<AudioChunk> {
        match self.transmit(chunk).await {
            Transmission::Delivered { chunk, .. } => Some(chunk),
            Transmission::Dropped | Transmission::Buffered => None,
        }
    }
}

/// Sample-and-hold decimation down to what fits in `cap_bps`.
fn degrade(chunk: AudioChunk, cap_bps: u64) -> AudioChunk {
    let bitrate = u64::from(chunk.sample_rate) * u64::from(chunk.channels) * 16;
    if cap_bps == 0 || bitrate <= cap_bps {
        return chunk;
    }
    let factor = bitrate.div_ceil(cap_bps) as usize;
    let channels = usize::from(chunk.channels.max(1));
    let samples = chunk.samples();

    let mut held = samples.clone();
    for (frame_idx, frame) in held.chunks_mut(channels).enumerate() {
        let src = (frame_idx / factor) * factor * channels;
        frame.copy_from_slice(&samples[src..src + frame.len()]);
    }
    AudioChunk::from_samples(&held, chunk.timestamp, chunk.sample_rate, chunk.channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_env::TokioContext;

    fn chunk_at(ms: u64) -> AudioChunk {
        AudioChunk::from_samples(&[ms as i16; 320], Duration::from_millis(ms), 16000, 1)
    }

    #[tokio::test(start_paused = true)]
    async fn test_loss_rate_is_respected() {
        let ctx = Arc::new(TokioContext::with_seed(11));
        let net = NetworkSimulator::new(ctx, NetworkConfig::new(0.0, 0.0, 0.05));

        let mut dropped = 0;
        for i in 0..10_000 {
            if net.transmit(chunk_at(i)).await == Transmission::Dropped {
                dropped += 1;
            }
        }
        let rate = dropped as f64 / 10_000.0;
        assert!((0.035..=0.065).contains(&rate), "drop rate {rate}");
        assert_eq!(net.stats().dropped, dropped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_latency_is_exact() {
        let ctx = Arc::new(TokioContext::with_seed(1));
        let net = NetworkSimulator::new(Arc::clone(&ctx), NetworkConfig::new(50.0, 0.0, 0.0));

        for k in 0..20 {
            let sent = Duration::from_millis(20 * k);
            ctx.sleep_until(sent).await;
            match net.transmit(chunk_at(20 * k)).await {
                Transmission::Delivered { sent_at, arrival, delivered_at, .. } => {
                    assert_eq!(sent_at, sent);
                    assert_eq!(arrival, sent + Duration::from_millis(50));
                    assert_eq!(delivered_at, arrival);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_extreme_latency_is_capped() {
        let ctx = Arc::new(TokioContext::with_seed(2));
        let net = NetworkSimulator::new(Arc::clone(&ctx), NetworkConfig::new(1e300, 1e300, 0.0));

        match net.transmit(chunk_at(0)).await {
            Transmission::Delivered { arrival, delivered_at, .. } => {
                assert!(arrival <= MAX_DELAY);
                assert_eq!(delivered_at, arrival);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_never_delivers_early() {
        let ctx = Arc::new(TokioContext::with_seed(8));
        let net = NetworkSimulator::new(Arc::clone(&ctx), NetworkConfig::profile("bad_wifi").unwrap());

        for k in 0..200 {
            if let Transmission::Delivered { sent_at, arrival, delivered_at, .. } = net.transmit(chunk_at(20 * k)).await {
                assert!(arrival >= sent_at);
                assert!(delivered_at >= arrival);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_buffers_then_flushes_in_order() {
        let ctx = Arc::new(TokioContext::with_seed(3));
        let net = Arc::new(NetworkSimulator::new(Arc::clone(&ctx), NetworkConfig::new(0.0, 0.0, 0.0)));

        let outage = {
            let net = Arc::clone(&net);
            tokio::spawn(async move { net.simulate_disconnect(Duration::from_secs(2)).await })
        };
        tokio::task::yield_now().await;
        assert!(!net.is_connected());

        for k in 0..50 {
            ctx.sleep_until(Duration::from_millis(20 * k)).await;
            assert_eq!(net.transmit(chunk_at(20 * k)).await, Transmission::Buffered);
        }

        let flushed = outage.await.unwrap();
        assert_eq!(ctx.now(), Duration::from_secs(2));
        assert!(net.is_connected());
        assert_eq!(flushed.len(), 50);
        let stamps: Vec<u64> = flushed.iter().map(|c| c.timestamp.as_millis() as u64).collect();
        assert_eq!(stamps, (0..50).map(|k| 20 * k).collect::<Vec<_>>());

        let stats = net.stats();
        assert_eq!(stats.dropped, 0);
        assert_eq!(stats.buffered, 50);
        assert_eq!(stats.flushed, 50);
    }

    #[test]
    fn test_bandwidth_cap_decimates() {
        let samples: Vec<i16> = (0..8).collect();
        let chunk = AudioChunk::from_samples(&samples, Duration::ZERO, 16000, 1);

        // 256 kbps stream through a 64 kbps cap holds every 4th sample
        let held = degrade(chunk.clone(), 64_000).samples();
        assert_eq!(held, vec![0, 0, 0, 0, 4, 4, 4, 4]);

        assert_eq!(degrade(chunk.clone(), 512_000), chunk);
    }

    #[test]
    fn test_unknown_profile_rejected() {
        assert_eq!(
            NetworkConfig::profile("carrier_pigeon"),
            Err(LayerError::UnknownNetworkProfile("carrier_pigeon".into()))
        );
        assert_eq!(NetworkConfig::profile("elevator").unwrap().loss, 0.30);
    }
}
