//! Parley Environment Abstraction Layer
//!
//! This crate provides the seam that lets the Parley harness drive a
//! voice agent either in **Realtime** (wall clock) or in **Simulation**
//! (virtual clock) without the layers knowing which one they run on.
//!
//! # Core Concept: The Reactor Pattern
//!
//! For deterministic scenario runs, every source of non-determinism is
//! routed through a [`HarnessContext`]:
//! - Time (`now()`, `sleep()`, `sleep_until()`)
//! - Task spawning (`spawn()`)
//! - Randomness (`derive_rng()`)
//!
//! By deriving all entropy from a single 64-bit seed, any failing run
//! becomes reproducible via its seed number.
//!
//! The system under test is reached only through [`VoiceSystem`], and the
//! system reaches mocked tools only through [`ToolInvoker`].
//!
//! # Example
//!
//! ```ignore
//! use parley_env::{HarnessContext, VoiceSystem};
//!
//! async fn speak<Ctx: HarnessContext>(ctx: &Ctx, sut: &dyn VoiceSystem, chunks: Vec<AudioChunk>) {
//!     for chunk in chunks {
//!         ctx.sleep(Duration::from_millis(20)).await;
//!         sut.push_audio(chunk).await?;
//!     }
//!     sut.commit_audio().await?;
//! }
//! ```

mod context;
mod error;
mod sync;
mod system;
mod tokio_impl;
mod types;

pub use context::HarnessContext;
pub use error::EnvError;
pub use sync::lock;
pub use system::{ToolInvoker, VoiceSystem};
pub use tokio_impl::TokioContext;
pub use types::{
    AudioChunk, PixelFormat, ResponseEvent, ResponseKind, ResponseStream, RunId, SystemState,
    ToolArgs, ToolError, ToolErrorKind, ToolResult, VideoFrame,
};
