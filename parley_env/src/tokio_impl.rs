//! Realtime implementation of HarnessContext using Tokio.

use crate::HarnessContext;
use async_trait::async_trait;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Realtime context backed by the Tokio clock.
///
/// This is the context used for live demos against a real agent. Time
/// comes from the runtime clock, randomness from OS entropy unless a seed
/// is supplied.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,

    /// Optional seed; `None` means every derived RNG is entropy-seeded
    seed: Option<u64>,
}

impl TokioContext {
    /// Creates a new unseeded TokioContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            seed: None,
        }
    }

    /// Creates a TokioContext whose RNG streams are derived from `seed`.
    ///
    /// Timing still follows the wall clock, so runs are only approximately
    /// reproducible.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            start: Instant::now(),
            seed: Some(seed),
        }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HarnessContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tracing::trace!(task = name, "spawning task");
        tokio::spawn(future)
    }

    fn derive_rng(&self, stream: u64) -> ChaCha8Rng {
        match self.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed.wrapping_mul(0x517cc1b727220a95) ^ stream),
            None => ChaCha8Rng::from_entropy(),
        }
    }

    fn seed(&self) -> u64 {
        // Unseeded contexts report 0
        self.seed.unwrap_or(0)
    }

    fn is_deterministic(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[tokio::test]
    async fn test_tokio_context_time() {
        let ctx = TokioContext::new();
        let t1 = ctx.now();
        ctx.sleep(Duration::from_millis(10)).await;
        let t2 = ctx.now();

        assert!(t2 > t1);
        assert!(t2 - t1 >= Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_context_sleep_until_past_deadline_returns() {
        let ctx = TokioContext::new();
        ctx.sleep(Duration::from_millis(100)).await;

        // Deadline already behind us
        ctx.sleep_until(Duration::from_millis(50)).await;
        assert_eq!(ctx.now(), Duration::from_millis(100));

        ctx.sleep_until(Duration::from_millis(250)).await;
        assert_eq!(ctx.now(), Duration::from_millis(250));
    }

    #[test]
    fn test_tokio_context_unseeded_rng() {
        let ctx = TokioContext::new();
        let a: u64 = ctx.derive_rng(1).gen();
        let b: u64 = ctx.derive_rng(1).gen();

        // Entropy-seeded streams should differ
        assert_ne!(a, b);
        assert_eq!(ctx.seed(), 0);
        assert!(!ctx.is_deterministic());
    }

    #[test]
    fn test_tokio_context_seeded_rng() {
        let ctx = TokioContext::with_seed(99);
        let a: u64 = ctx.derive_rng(1).gen();
        let b: u64 = ctx.derive_rng(1).gen();
        let c: u64 = ctx.derive_rng(2).gen();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(ctx.seed(), 99);
    }

    #[tokio::test]
    async fn test_tokio_context_spawn_joins() {
        let ctx = TokioContext::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let handle = ctx.spawn("probe", async move {
            let _ = tx.send(7u8);
        });
        handle.await.unwrap();
        assert_eq!(rx.await.unwrap(), 7);
    }
}
