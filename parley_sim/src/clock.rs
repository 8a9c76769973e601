//! The run's single authority on "now".

use parley_env::HarnessContext;
use std::sync::Arc;
use std::time::Duration;

use crate::error::HarnessError;

/// Monotonic virtual clock over a `HarnessContext`.
///
/// Under `SimContext` advancing is a virtual-time jump; under a realtime
/// context it is a wall-clock wait. Either way `now` never goes backwards.
pub struct SimulatedClock<Ctx: HarnessContext> {
    ctx: Arc<Ctx>,
}

impl<Ctx: HarnessContext> SimulatedClock<Ctx> {
    pub fn new(ctx: Arc<Ctx>) -> Self {
        Self { ctx }
    }

    pub fn now(&self) -> Duration {
        self.ctx.now()
    }

    /// Suspends until `t`. Asking for a time in the past is a scheduling
    /// bug and fails without touching the clock.
    pub async fn advance_to(&self, t: Duration) -> Result<(), HarnessError> {
        let now = self.ctx.now();
        if t < now {
            return Err(HarnessError::ClockOrderViolation { requested: t, now });
        }
        self.ctx.sleep_until(t).await;
        Ok(())
    }

    pub async fn advance_by(&self, d: Duration) {
        let target = self.ctx.now() + d;
        self.ctx.sleep_until(target).await;
    }
}
