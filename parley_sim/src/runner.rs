//! Scenario runner: builds a runtime, a context, the layers and the
//! scripted agent, then drives one scenario to a report.

use parley_core::{register_general_mocks, register_hotel_booking_mocks};
use parley_env::{HarnessContext, TokioContext};
use std::sync::Arc;
use tracing::{info, warn};

use crate::context::SimContext;
use crate::error::HarnessError;
use crate::layers::{LayerConfig, LayerSet};
use crate::orchestrator::Orchestrator;
use crate::results::RunReport;
use crate::scenario::Scenario;
use crate::scenarios::ScenarioId;
use crate::stub::ScriptedSystem;

/// Runner configuration.
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    /// Master seed for every layer
    pub seed: u64,
    /// Wall-clock timing instead of the paused virtual clock
    pub realtime: bool,
    pub layers: LayerConfig,
}

/// Runs scenarios against the built-in scripted agent.
pub struct ScenarioRunner {
    config: RunnerConfig,
}

impl ScenarioRunner {
    /// Creates a deterministic runner for `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            config: RunnerConfig {
                seed,
                ..RunnerConfig::default()
            },
        }
    }

    pub fn with_config(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Switches between virtual and wall-clock time.
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.config.realtime = realtime;
        self
    }

    pub fn seed(&self) -> u64 {
        self.config.seed
    }

    /// Runs a built-in scenario.
    pub fn run_builtin(&self, id: ScenarioId) -> Result<RunReport, HarnessError> {
        self.run(&id.scenario()?)
    }

    /// Runs `scenario` to completion on a fresh runtime.
    pub fn run(&self, scenario: &Scenario) -> Result<RunReport, HarnessError> {
        let seed = self.config.seed;
        let layers = self.config.layers.clone();
        info!(scenario = %scenario.name, seed, realtime = self.config.realtime, "running scenario");

        if self.config.realtime {
            warn!("realtime mode: timings follow the wall clock and are not reproducible");
            let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
            runtime.block_on(async move {
                let ctx = Arc::new(TokioContext::with_seed(seed));
                run_in_context(ctx, scenario, layers).await
            })
        } else {
            let runtime = SimContext::runtime()?;
            runtime.block_on(async move {
                // Created inside the runtime so its epoch is virtual zero
                let ctx = SimContext::shared(seed);
                run_in_context(ctx, scenario, layers).await
            })
        }
    }
}

/// Wires a standard run on any context.
pub async fn run_in_context<Ctx: HarnessContext>(
    ctx: Arc<Ctx>,
    scenario: &Scenario,
    config: LayerConfig,
) -> Result<RunReport, HarnessError> {
    let layers = LayerSet::standard(Arc::clone(&ctx), config);
    if let Some(tools) = &layers.tools {
        register_hotel_booking_mocks(tools);
        register_general_mocks(tools);
    }
    let script = scenario.stub.clone().unwrap_or_default();
    let system = Arc::new(ScriptedSystem::new(Arc::clone(&ctx), script));

    let mut orchestrator = Orchestrator::new(ctx, layers, system);
    orchestrator.run(scenario).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{Outcome, RunStatus};

    #[test]
    fn test_same_seed_same_report() {
        let runner = ScenarioRunner::new(1234);
        let first = runner.run_builtin(ScenarioId::HotelBookingNoisy).unwrap();
        let second = runner.run_builtin(ScenarioId::HotelBookingNoisy).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.run_id, second.run_id);
    }

    #[test]
    fn test_different_seeds_differ_in_tool_latency() {
        let a = ScenarioRunner::new(1).run_builtin(ScenarioId::HotelBookingNoisy).unwrap();
        let b = ScenarioRunner::new(2).run_builtin(ScenarioId::HotelBookingNoisy).unwrap();
        assert_ne!(a.run_id, b.run_id);
        assert_eq!(a.tool_completions.len(), 1);
        assert_ne!(a.tool_completions, b.tool_completions);
    }

    #[test]
    fn test_basic_booking_passes() {
        let report = ScenarioRunner::new(42).run_builtin(ScenarioId::HotelBookingBasic).unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.count(Outcome::Pass), 2);
    }

    #[test]
    fn test_schema_error_surfaces_before_run() {
        let err = Scenario::from_json(r#"{ "name": "x", "timeline": [{ "action": "jump" }] }"#).unwrap_err();
        assert_eq!(err, HarnessError::UnknownAction("jump".into()));
    }
}
