//! Simulated visual input: camera, screen share and document scans.

use parley_env::{HarnessContext, PixelFormat, VideoFrame};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::LayerError;
use crate::layer::{ChunkSource, SimulationLayer, RNG_STREAM_VIDEO};

const CURSOR_SIZE: u32 = 12;

#[derive(Debug, Clone, PartialEq)]
pub struct VideoConfig {
    pub fps: u32,
    /// (width, height)
    pub resolution: (u32, u32),
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            resolution: (1280, 720),
        }
    }
}

/// What the camera or screen is showing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum VideoSource {
    Camera {
        #[serde(default = "default_scene")]
        scene: String,
        #[serde(default)]
        lighting: Lighting,
    },
    Screen {
        #[serde(default = "default_app")]
        app: String,
    },
    Document {
        #[serde(default = "default_document")]
        document_type: String,
    },
}

fn default_scene() -> String {
    "office_desk".to_string()
}

fn default_app() -> String {
    "browser".to_string()
}

fn default_document() -> String {
    "pdf".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lighting {
    Dim,
    #[default]
    Normal,
    Bright,
}

impl Lighting {
    fn gain(&self) -> f64 {
        match self {
            Lighting::Dim => 0.5,
            Lighting::Normal => 1.0,
            Lighting::Bright => 1.25,
        }
    }
}

/// An `inject_video` request.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoRequest {
    pub source: VideoSource,
    pub duration: Duration,
}

/// Generates synthetic frame sequences.
pub struct VideoStreamSimulator<Ctx: HarnessContext> {
    ctx: Arc<Ctx>,
    config: VideoConfig,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl<Ctx: HarnessContext> VideoStreamSimulator<Ctx> {
    pub fn new(ctx: Arc<Ctx>, config: VideoConfig) -> Self {
        let rng = ctx.derive_rng(RNG_STREAM_VIDEO);
        Self {
            ctx,
            config,
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    pub fn config(&self) -> &VideoConfig {
        &self.config
    }
}

impl<Ctx: HarnessContext> SimulationLayer for VideoStreamSimulator<Ctx> {
    fn layer_name(&self) -> &'static str {
        "video"
    }
}

impl<Ctx: HarnessContext> ChunkSource for VideoStreamSimulator<Ctx> {
    type Request = VideoRequest;
    type Stream = FrameStream<Ctx>;

    fn generate(&self, request: VideoRequest) -> Result<FrameStream<Ctx>, LayerError> {
        if self.config.fps == 0 {
            return Err(LayerError::invalid("video fps must be non-zero"));
        }
        let (w, h) = self.config.resolution;
        if w == 0 || h == 0 {
            return Err(LayerError::invalid("video resolution must be non-zero"));
        }
        let total = (request.duration.as_secs_f64() * f64::from(self.config.fps)).round() as usize;
        tracing::debug!(source = ?request.source, frames = total, "generating video");

        Ok(FrameStream {
            ctx: Arc::clone(&self.ctx),
            rng: Arc::clone(&self.rng),
            source: request.source,
            resolution: self.config.resolution,
            frame_period: Duration::from_secs_f64(1.0 / f64::from(self.config.fps)),
            start: self.ctx.now(),
            total,
            next_index: 0,
        })
    }
}

/// A lazy, finite, single-consumption sequence of frames paced at the
/// configured frame rate.
pub struct FrameStream<Ctx: HarnessContext> {
    ctx: Arc<Ctx>,
    rng: Arc<Mutex<ChaCha8Rng>>,
    source: VideoSource,
    resolution: (u32, u32),
    frame_period: Duration,
    start: Duration,
    total: usize,
    next_index: usize,
}

impl<Ctx: HarnessContext> FrameStream<Ctx> {
    pub fn frame_count(&self) -> usize {
        self.total
    }

    pub async fn next(&mut self) -> Option<VideoFrame> {
        if self.next_index >= self.total {
            return None;
        }
        let index = self.next_index;
        let at = self.start + self.frame_period * index as u32;
        self.ctx.sleep_until(at).await;
        self.next_index += 1;

        let flicker: i16 = parley_env::lock(&self.rng).gen_range(-3..=3);
        Some(VideoFrame {
            data: self.render(index, flicker),
            timestamp: at,
            resolution: self.resolution,
            format: PixelFormat::Rgb24,
        })
    }

    fn render(&self, index: usize, flicker: i16) -> Vec<u8> {
        let (w, h) = self.resolution;
        let bpp = PixelFormat::Rgb24.bytes_per_pixel();
        match &self.source {
            VideoSource::Camera { scene, lighting } => {
                let base = f64::from(scene.bytes().fold(0u8, |acc, b| acc.wrapping_add(b)));
                let level = (base * lighting.gain() + f64::from(flicker)).clamp(0.0, 255.0) as u8;
                vec![level; w as usize * h as usize * bpp]
            }
            VideoSource::Screen { .. } => {
                let mut data = vec![40u8; w as usize * h as usize * bpp];
                // Cursor sweeps diagonally across the screen
                let cx = (index as u32 * 8) % w.saturating_sub(CURSOR_SIZE).max(1);
                let cy = (index as u32 * 5) % h.saturating_sub(CURSOR_SIZE).max(1);
                for y in cy..(cy + CURSOR_SIZE).min(h) {
                    for x in cx..(cx + CURSOR_SIZE).min(w) {
                        let at = (y as usize * w as usize + x as usize) * bpp;
                        data[at..at + bpp].fill(255);
                    }
                }
                data
            }
            VideoSource::Document { .. } => vec![240u8; w as usize * h as usize * bpp],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_env::TokioContext;

    fn small() -> VideoConfig {
        VideoConfig {
            fps: 10,
            resolution: (64, 48),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_stream_paced_at_fps() {
        let ctx = Arc::new(TokioContext::with_seed(3));
        let video = VideoStreamSimulator::new(Arc::clone(&ctx), small());

        let mut stream = video
            .generate(VideoRequest {
                source: VideoSource::Document {
                    document_type: "pdf".into(),
                },
                duration: Duration::from_secs(1),
            })
            .unwrap();
        assert_eq!(stream.frame_count(), 10);

        let mut count = 0;
        while let Some(frame) = stream.next().await {
            assert_eq!(frame.data.len(), 64 * 48 * 3);
            assert!(frame.data.iter().all(|&b| b == 240));
            count += 1;
        }
        assert_eq!(count, 10);
        assert_eq!(ctx.now(), Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_screen_frames_draw_moving_cursor() {
        let ctx = Arc::new(TokioContext::with_seed(3));
        let video = VideoStreamSimulator::new(ctx, small());
        let mut stream = video
            .generate(VideoRequest {
                source: VideoSource::Screen { app: "browser".into() },
                duration: Duration::from_millis(200),
            })
            .unwrap();

        let first = stream.next().await.unwrap();
        let second = stream.next().await.unwrap();
        assert!(first.data.contains(&255));
        assert_ne!(first.data, second.data);
    }

    #[test]
    fn test_video_source_deserializes_tagged() {
        let source: VideoSource = serde_json::from_value(serde_json::json!({
            "source": "camera",
            "scene": "hotel_lobby",
            "lighting": "dim"
        }))
        .unwrap();
        assert_eq!(
            source,
            VideoSource::Camera {
                scene: "hotel_lobby".into(),
                lighting: Lighting::Dim
            }
        );

        let bad = serde_json::from_value::<VideoSource>(serde_json::json!({ "source": "hologram" }));
        assert!(bad.is_err());
    }
}
