//! Core environment context trait for the harness and its layers.

use async_trait::async_trait;
use rand_chacha::ChaCha8Rng;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// The central interface for environment interaction.
///
/// This trait abstracts the passage of time and the source of entropy so
/// that every simulation layer can run against the wall clock or against
/// a paused, auto-advancing virtual clock.
///
/// # Implementations
///
/// - **Realtime**: `TokioContext` - wall clock, optionally seeded RNG
/// - **Simulation**: `SimContext` (in `parley_sim`) - paused tokio clock, seeded RNG
///
/// # Determinism
///
/// For reproducible runs, all methods that would normally introduce
/// non-determinism (time, randomness) are controlled by the implementation.
#[async_trait]
pub trait HarnessContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Suspends execution for the given duration.
    ///
    /// In realtime: a wall-clock delay.
    /// In simulation: advances the virtual clock once every task is idle.
    async fn sleep(&self, duration: Duration);

    /// Suspends until `deadline` (measured like [`now`](Self::now)).
    ///
    /// Returns immediately when the deadline has already passed.
    async fn sleep_until(&self, deadline: Duration) {
        let now = self.now();
        if deadline > now {
            self.sleep(deadline - now).await;
        }
    }

    /// Spawns a background task on the context's runtime.
    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static;

    /// Derives an independent RNG stream from the master seed.
    ///
    /// Each layer draws from its own stream so that adding draws in one
    /// layer never perturbs the sequence seen by another.
    ///
    /// # Arguments
    /// * `stream` - A per-layer stream identifier
    fn derive_rng(&self, stream: u64) -> ChaCha8Rng;

    /// Returns the context's seed (for logging/debugging).
    fn seed(&self) -> u64;

    /// True when time is virtual and every draw is seeded.
    fn is_deterministic(&self) -> bool;
}
