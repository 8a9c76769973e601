//! Explicit set of layers handed to the orchestrator.
//!
//! There is no global registry: a run only has the layers it was built
//! with, and an action that needs a missing one aborts the run with
//! `UnregisteredLayer`.

use parley_core::{
    AudioConfig, AudioStreamSimulator, BargeInSimulator, ChunkFilter, MockToolRegistry, NetworkConfig,
    NetworkSimulator, NoiseConfig, NoiseEngine, SimulationLayer, VideoConfig, VideoStreamSimulator,
};
use parley_env::{AudioChunk, EnvError, HarnessContext, VoiceSystem};
use std::sync::Arc;

use crate::error::HarnessError;

/// Per-layer configuration for [`LayerSet::standard`].
#[derive(Debug, Clone, Default)]
pub struct LayerConfig {
    pub audio: AudioConfig,
    pub video: VideoConfig,
    pub noise: NoiseConfig,
    pub network: NetworkConfig,
}

/// The layers available to one run.
pub struct LayerSet<Ctx: HarnessContext> {
    pub audio: Option<Arc<AudioStreamSimulator<Ctx>>>,
    pub video: Option<Arc<VideoStreamSimulator<Ctx>>>,
    pub noise: Option<Arc<NoiseEngine<Ctx>>>,
    pub network: Option<Arc<NetworkSimulator<Ctx>>>,
    pub barge_in: Option<Arc<BargeInSimulator<Ctx>>>,
    pub tools: Option<Arc<MockToolRegistry<Ctx>>>,
}

impl<Ctx: HarnessContext> LayerSet<Ctx> {
    /// No layers at all.
    pub fn empty() -> Self {
        Self {
            audio: None,
            video: None,
            noise: None,
            network: None,
            barge_in: None,
            tools: None,
        }
    }

    /// Every layer, each with its own RNG stream from `ctx`.
    pub fn standard(ctx: Arc<Ctx>, config: LayerConfig) -> Self {
        let audio = Arc::new(AudioStreamSimulator::new(Arc::clone(&ctx), config.audio));
        Self {
            barge_in: Some(Arc::new(BargeInSimulator::new(Arc::clone(&ctx), Arc::clone(&audio)))),
            audio: Some(audio),
            video: Some(Arc::new(VideoStreamSimulator::new(Arc::clone(&ctx), config.video))),
            noise: Some(Arc::new(NoiseEngine::new(Arc::clone(&ctx), config.noise))),
            network: Some(Arc::new(NetworkSimulator::new(Arc::clone(&ctx), config.network))),
            tools: Some(Arc::new(MockToolRegistry::new(ctx))),
        }
    }

    pub fn without_noise(mut self) -> Self {
        self.noise = None;
        self
    }

    pub fn without_network(mut self) -> Self {
        self.network = None;
        self
    }

    /// Names of the layers present, for the run log.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        let mut push = |layer: Option<&dyn SimulationLayer>| {
            if let Some(layer) = layer {
                names.push(layer.layer_name());
            }
        };
        push(self.audio.as_deref().map(|l| l as &dyn SimulationLayer));
        push(self.video.as_deref().map(|l| l as &dyn SimulationLayer));
        push(self.noise.as_deref().map(|l| l as &dyn SimulationLayer));
        push(self.network.as_deref().map(|l| l as &dyn SimulationLayer));
        push(self.barge_in.as_deref().map(|l| l as &dyn SimulationLayer));
        push(self.tools.as_deref().map(|l| l as &dyn SimulationLayer));
        names
    }

    /// Microphone path into `system` through whichever filters exist.
    pub fn mic_path(&self, system: Arc<dyn VoiceSystem>) -> MicPath {
        let mut filters: Vec<Arc<dyn ChunkFilter>> = Vec::new();
        // Noise is mixed at the microphone, before the uplink
        if let Some(noise) = &self.noise {
            filters.push(noise.clone());
        }
        if let Some(network) = &self.network {
            filters.push(network.clone());
        }
        MicPath { filters, system }
    }
}

/// Looks up an optional layer or fails with `UnregisteredLayer`.
pub fn require<'a, L>(layer: &'a Option<Arc<L>>, name: &str) -> Result<&'a Arc<L>, HarnessError> {
    layer
        .as_ref()
        .ok_or_else(|| HarnessError::UnregisteredLayer(name.to_string()))
}

/// Chunk delivery from the simulated user to the system under test.
#[derive(Clone)]
pub struct MicPath {
    filters: Vec<Arc<dyn ChunkFilter>>,
    system: Arc<dyn VoiceSystem>,
}

impl MicPath {
    /// Runs `chunk` through every filter and pushes what survives.
    ///
    /// Returns whether the chunk reached the system.
    pub async fn deliver(&self, chunk: AudioChunk) -> Result<bool, EnvError> {
        let mut chunk = chunk;
        for filter in &self.filters {
            match filter.apply(chunk).await {
                Some(next) => chunk = next,
                None => return Ok(false),
            }
        }
        self.system.push_audio(chunk).await?;
        Ok(true)
    }

    /// Pushes chunks that already crossed the network (reconnect flush).
    pub async fn push_raw(&self, chunk: AudioChunk) -> Result<(), EnvError> {
        self.system.push_audio(chunk).await
    }

    pub async fn commit(&self) -> Result<(), EnvError> {
        self.system.commit_audio().await
    }

    pub fn filter_names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.layer_name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SimContext;
    use crate::stub::{ScriptedSystem, StubScript};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_mic_path_order_and_missing_layers() {
        let ctx = SimContext::shared(3);
        let system = Arc::new(ScriptedSystem::new(Arc::clone(&ctx), StubScript::default()));

        let layers = LayerSet::standard(Arc::clone(&ctx), LayerConfig::default());
        assert_eq!(layers.names(), vec!["audio", "video", "noise", "network", "barge_in", "tools"]);
        let path = layers.mic_path(system.clone());
        assert_eq!(path.filter_names(), vec!["noise", "network"]);

        let bare = LayerSet::standard(Arc::clone(&ctx), LayerConfig::default())
            .without_noise()
            .without_network();
        assert!(matches!(
            require(&bare.noise, "noise"),
            Err(HarnessError::UnregisteredLayer(name)) if name == "noise"
        ));
        let path = bare.mic_path(system.clone());
        assert!(path.filter_names().is_empty());

        let chunk = AudioChunk::from_samples(&[100i16; 320], Duration::ZERO, 16000, 1);
        assert!(path.deliver(chunk).await.unwrap());
        assert_eq!(system.audio_chunks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lossy_network_drops_before_system() {
        let ctx = SimContext::shared(3);
        let system = Arc::new(ScriptedSystem::new(Arc::clone(&ctx), StubScript::default()));
        let config = LayerConfig {
            network: NetworkConfig::new(0.0, 0.0, 1.0),
            ..LayerConfig::default()
        };
        let path = LayerSet::standard(Arc::clone(&ctx), config).mic_path(system.clone());

        let chunk = AudioChunk::from_samples(&[100i16; 320], Duration::ZERO, 16000, 1);
        assert!(!path.deliver(chunk).await.unwrap());
        assert_eq!(system.audio_chunks(), 0);
    }
}
