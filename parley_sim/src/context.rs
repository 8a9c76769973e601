//! Simulation context implementing HarnessContext for deterministic runs.

use async_trait::async_trait;
use parley_env::HarnessContext;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Simulation context backed by the paused tokio clock and a master seed.
///
/// This implements `HarnessContext` using:
/// - The runtime's virtual clock, which jumps to the next timer deadline
///   whenever every task is blocked
/// - Seeded ChaCha8 streams for every layer
///
/// Must be created inside the runtime returned by [`SimContext::runtime`]
/// so that its epoch is virtual time zero of that runtime.
pub struct SimContext {
    /// Master seed for this run
    seed: u64,

    /// Virtual instant that maps to `now() == 0`
    epoch: Instant,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            epoch: Instant::now(),
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Builds the single-threaded, paused-clock runtime simulations run on.
    pub fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
    }
}

#[async_trait]
impl HarnessContext for SimContext {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        // The paused clock auto-advances once all tasks are idle
        tokio::time::sleep(duration).await;
    }

    async fn sleep_until(&self, deadline: Duration) {
        tokio::time::sleep_until(self.epoch + deadline).await;
    }

    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::trace!(task = name, "spawning simulated task");
        tokio::spawn(future)
    }

    fn derive_rng(&self, stream: u64) -> ChaCha8Rng {
        // Combine master seed with the stream id for an independent stream
        ChaCha8Rng::seed_from_u64(self.seed.wrapping_mul(0x517cc1b727220a95) ^ stream)
    }

    fn seed(&self) -> u64 {
        self.seed
    }

    fn is_deterministic(&self) -> bool {
        true
    }
}
