//! Scenario orchestrator: the run loop.
//!
//! The orchestrator owns the clock and the timeline, talks to layers only
//! through their capability traits and setters, and records every verdict
//! in the results ledger. It drives the system under test only through
//! [`VoiceSystem`].
//!
//! ```text
//! apply environment -> register tools -> load timeline -> start collector
//! loop {
//!     next = timeline.next_due_at()
//!     if next > now { clock.advance_to(next) }
//!     dispatch(timeline.pop_next_due(now))
//! }
//! await background work -> stop collector -> Finished
//! ```

use parley_core::{
    BargeInRequest, CallObserver, CallWait, ChunkSource, SpeechRequest, ToolCallRecord, VideoRequest,
};
use parley_env::{lock, HarnessContext, SystemState, ToolInvoker, VoiceSystem};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::SimulatedClock;
use crate::error::HarnessError;
use crate::layers::{require, LayerSet, MicPath};
use crate::results::{BargeInRecord, Outcome, OutcomeRecord, ResultsCollector, RunReport, RunStatus};
use crate::scenario::{
    Action, ActionKind, Condition, ConditionalAction, Environment, Expectation, NetworkSettings, NoiseAction,
    Scenario, SpeakAction, ToolExpectation, VideoAction, DEFAULT_BRANCH,
};
use crate::timeline::{Timeline, TimelineEvent};

/// Scheduler passes granted to tasks woken at the current instant before
/// the observed state is read.
const SETTLE_PASSES: usize = 4;

const FLUSH_TASK: &str = "network-disconnect";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Running,
    Finished,
}

/// First fatal error raised by a background task.
type FaultSlot = Arc<Mutex<Option<HarnessError>>>;

fn raise(slot: &FaultSlot, err: HarnessError) {
    error!(error = %err, "background task failed");
    lock(slot).get_or_insert(err);
}

/// Runs one scenario against one system under test.
pub struct Orchestrator<Ctx: HarnessContext> {
    ctx: Arc<Ctx>,
    clock: SimulatedClock<Ctx>,
    timeline: Timeline,
    layers: LayerSet<Ctx>,
    system: Arc<dyn VoiceSystem>,
    mic: MicPath,
    results: Arc<Mutex<ResultsCollector>>,
    faults: FaultSlot,
    background: Vec<(&'static str, JoinHandle<()>)>,
    phase: RunPhase,
}

impl<Ctx: HarnessContext> Orchestrator<Ctx> {
    pub fn new(ctx: Arc<Ctx>, layers: LayerSet<Ctx>, system: Arc<dyn VoiceSystem>) -> Self {
        let mic = layers.mic_path(Arc::clone(&system));
        Self {
            clock: SimulatedClock::new(Arc::clone(&ctx)),
            ctx,
            timeline: Timeline::new(),
            layers,
            system,
            mic,
            results: Arc::new(Mutex::new(ResultsCollector::new())),
            faults: Arc::new(Mutex::new(None)),
            background: Vec::new(),
            phase: RunPhase::Idle,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Adds an event to the pending timeline.
    pub fn schedule(&mut self, at: Duration, action: Action) -> Result<u64, HarnessError> {
        if self.phase == RunPhase::Finished {
            return Err(HarnessError::RunFinished);
        }
        self.timeline.schedule(at, action)
    }

    /// Executes `scenario` to completion.
    ///
    /// Only a second run is an `Err`. Structural errors during the run
    /// end it early and come back as `RunStatus::Aborted` with the partial
    /// ledger.
    pub async fn run(&mut self, scenario: &Scenario) -> Result<RunReport, HarnessError> {
        if self.phase == RunPhase::Finished {
            return Err(HarnessError::RunFinished);
        }
        self.phase = RunPhase::Running;
        info!(
            scenario = %scenario.name,
            seed = self.ctx.seed(),
            events = scenario.timeline.len(),
            layers = ?self.layers.names(),
            "scenario started"
        );

        let collector = self.spawn_collector();
        let status = match self.execute(scenario).await {
            Ok(()) => self.finish_background().await,
            Err(err) => {
                error!(scenario = %scenario.name, error = %err, "scenario aborted");
                for (_, handle) in self.background.drain(..) {
                    handle.abort();
                }
                RunStatus::Aborted { error: err }
            }
        };

        self.settle().await;
        collector.abort();

        let collected = std::mem::take(&mut *lock(&self.results));
        let (tool_calls, tool_completions) = match &self.layers.tools {
            Some(tools) => (tools.calls(), tools.completions()),
            None => (Vec::new(), Vec::new()),
        };
        let network = self.layers.network.as_ref().map(|n| n.stats());
        let report = RunReport::assemble(
            &scenario.name,
            self.ctx.seed(),
            status,
            collected,
            tool_calls,
            tool_completions,
            network,
            self.clock.now(),
        );
        self.phase = RunPhase::Finished;

        info!(
            scenario = %scenario.name,
            passed = report.passed(),
            outcomes = report.outcomes.len(),
            finished_at_ms = report.finished_at.as_millis() as u64,
            "scenario finished"
        );
        Ok(report)
    }

    async fn execute(&mut self, scenario: &Scenario) -> Result<(), HarnessError> {
        self.apply_environment(&scenario.environment)?;
        self.prepare_tools(scenario)?;

        for event in &scenario.timeline {
            self.timeline.schedule(event.at, event.action.clone())?;
        }

        loop {
            if let Some(err) = lock(&self.faults).take() {
                return Err(err);
            }
            let Some(next_at) = self.timeline.next_due_at() else {
                break;
            };
            let now = self.clock.now();
            if next_at > now {
                self.clock.advance_to(next_at).await?;
                continue;
            }
            // Overdue events (an earlier dispatch ran past them) fire now
            if let Some(event) = self.timeline.pop_next_due(now) {
                self.dispatch(event).await?;
            }
        }
        Ok(())
    }

    fn apply_environment(&self, env: &Environment) -> Result<(), HarnessError> {
        if env.noise_profile.is_some() || env.noise_snr_db.is_some() {
            let noise = require(&self.layers.noise, "noise")?;
            match &env.noise_profile {
                Some(profile) => noise.set_profile(profile, env.noise_snr_db)?,
                None => {
                    if let Some(snr) = env.noise_snr_db {
                        noise.set_snr(snr);
                    }
                }
            }
        }
        if let Some(settings) = &env.network {
            self.set_network(settings)?;
        }
        Ok(())
    }

    /// Applies per-tool overrides and hands every mock to the system.
    fn prepare_tools(&self, scenario: &Scenario) -> Result<(), HarnessError> {
        let Some(tools) = &self.layers.tools else {
            if let Some(name) = scenario.tools.keys().next() {
                return Err(HarnessError::UnregisteredLayer(format!("tools (override for {name})")));
            }
            return Ok(());
        };
        for (name, patch) in &scenario.tools {
            tools
                .apply_override(name, *patch)
                .map_err(|_| HarnessError::UnregisteredTool(name.clone()))?;
        }
        let handler: Arc<dyn ToolInvoker> = tools.clone();
        for name in tools.tool_names() {
            self.system.register_tool_handler(&name, Arc::clone(&handler));
        }
        debug!(tools = ?tools.tool_names(), "mock tools registered with the system");
        Ok(())
    }

    fn spawn_collector(&self) -> JoinHandle<()> {
        let mut stream = self.system.get_response_stream();
        let results = Arc::clone(&self.results);
        self.ctx.spawn("response-collector", async move {
            while let Some(event) = stream.next().await {
                lock(&results).observe(&event);
            }
        })
    }

    /// Lets tasks woken at this instant (agent, collector) run first.
    async fn settle(&self) {
        for _ in 0..SETTLE_PASSES {
            tokio::task::yield_now().await;
        }
    }

    /// Joins pending disconnect tasks. Holds the loop until reconnect.
    async fn await_flushes(&mut self) {
        let (flushes, rest): (Vec<_>, Vec<_>) =
            self.background.drain(..).partition(|(name, _)| *name == FLUSH_TASK);
        self.background = rest;
        for (name, handle) in flushes {
            if let Err(err) = handle.await {
                warn!(task = name, error = %err, "background task did not complete");
            }
        }
    }

    async fn finish_background(&mut self) -> RunStatus {
        for (name, handle) in self.background.drain(..) {
            if let Err(err) = handle.await {
                warn!(task = name, error = %err, "background task did not complete");
            }
        }
        match lock(&self.faults).take() {
            Some(error) => RunStatus::Aborted { error },
            None => RunStatus::Completed,
        }
    }

    async fn dispatch(&mut self, event: TimelineEvent) -> Result<(), HarnessError> {
        let kind = event.action.kind();
        debug!(
            %kind,
            at_ms = event.at.as_millis() as u64,
            now_ms = self.clock.now().as_millis() as u64,
            seq = event.seq,
            "dispatching event"
        );
        match event.action {
            Action::UserSpeak(speak) => self.user_speak(speak).await,
            Action::InjectNoise(noise) => self.inject_noise(&noise),
            Action::InjectVideo(video) => self.inject_video(video),
            Action::AssertSystem(expect) => self.assert_system(event.at, &expect).await,
            Action::ExpectToolCall(expect) => self.expect_tool_call(event.at, &expect).await,
            Action::Conditional(conditional) => self.conditional(conditional).await,
            Action::BargeIn(request) => self.barge_in(request),
            Action::Wait { duration_ms } => {
                self.clock.advance_by(Duration::from_millis(duration_ms)).await;
                Ok(())
            }
            Action::SetNetwork(settings) => self.set_network(&settings),
            Action::NetworkDisconnect { duration_ms } => self.network_disconnect(Duration::from_millis(duration_ms)),
        }
    }

    async fn user_speak(&mut self, speak: SpeakAction) -> Result<(), HarnessError> {
        let audio = require(&self.layers.audio, "audio")?;
        let request = SpeechRequest::new(speak.audio).with_style(speak.speech_style);
        let mut chunks = audio.generate(request)?;

        let total = chunks.chunk_count();
        let mut delivered = 0usize;
        while let Some(chunk) = chunks.next().await {
            if self.mic.deliver(chunk).await? {
                delivered += 1;
            }
        }
        // Network delay can already have carried us past the end
        self.ctx.sleep_until(chunks.ends_at()).await;
        // Audio withheld by a disconnect belongs to this turn, so the
        // commit waits for the reconnect flush
        self.await_flushes().await;

        lock(&self.results).mark_turn_end(self.clock.now());
        self.mic.commit().await?;
        debug!(total, delivered, "user turn committed");
        Ok(())
    }

    fn inject_noise(&self, noise: &NoiseAction) -> Result<(), HarnessError> {
        let engine = require(&self.layers.noise, "noise")?;
        engine.inject_with(noise.kind, &noise.source, noise.duration, noise.level_db)?;
        Ok(())
    }

    fn inject_video(&mut self, video: VideoAction) -> Result<(), HarnessError> {
        let layer = require(&self.layers.video, "video")?;
        let mut frames = layer.generate(VideoRequest {
            source: video.source,
            duration: video.duration,
        })?;
        let system = Arc::clone(&self.system);
        let faults = Arc::clone(&self.faults);
        let handle = self.ctx.spawn("video-feed", async move {
            while let Some(frame) = frames.next().await {
                if let Err(err) = system.push_video(frame).await {
                    raise(&faults, err.into());
                    return;
                }
            }
        });
        self.background.push(("video-feed", handle));
        Ok(())
    }

    async fn assert_system(&mut self, scheduled_at: Duration, expect: &Expectation) -> Result<(), HarnessError> {
        self.settle().await;
        let observed = lock(&self.results).observed().clone();

        let mut checks = Vec::new();
        let mut failures = Vec::new();
        let mut check = |name: String, ok: bool, failure: String| {
            checks.push(name);
            if !ok {
                failures.push(failure);
            }
        };

        if let Some(intent) = &expect.intent {
            let got = observed.latest_intent();
            check(
                format!("intent={intent}"),
                got == Some(intent.as_str()),
                format!("intent: expected '{intent}', got '{}'", got.unwrap_or("none")),
            );
        }
        if let Some(needle) = &expect.response_contains {
            let got = observed.latest_response().unwrap_or("");
            check(
                format!("response contains '{needle}'"),
                got.to_lowercase().contains(&needle.to_lowercase()),
                format!("response: '{got}' does not contain '{needle}'"),
            );
        }
        if let Some(state) = expect.state {
            let got = self.system.state();
            check(
                format!("state={state}"),
                got == state,
                format!("state: expected {state}, got {got}"),
            );
        }
        if let Some(tool) = &expect.tool_called {
            let tools = require(&self.layers.tools, "tools")?;
            check(
                format!("called {tool}"),
                tools.was_called(tool),
                format!("tool '{tool}' was never called"),
            );
        }
        if let Some(tool) = &expect.did_not_call {
            let tools = require(&self.layers.tools, "tools")?;
            let times = tools.called_times(tool);
            check(
                format!("did not call {tool}"),
                times == 0,
                format!("tool '{tool}' was called {times} time(s)"),
            );
        }
        if let Some(needle) = &expect.did_not_say {
            check(
                format!("did not say '{needle}'"),
                !observed.ever_said(needle),
                format!("system said '{needle}'"),
            );
        }

        let (outcome, detail) = if failures.is_empty() {
            (Outcome::Pass, if checks.is_empty() { "no checks".to_string() } else { checks.join(", ") })
        } else {
            (Outcome::Fail, failures.join("; "))
        };
        self.record(scheduled_at, ActionKind::AssertSystem, outcome, detail, None);
        Ok(())
    }

    async fn expect_tool_call(&mut self, scheduled_at: Duration, expect: &ToolExpectation) -> Result<(), HarnessError> {
        let tools = require(&self.layers.tools, "tools")?;
        if !tools.is_registered(&expect.tool) {
            return Err(HarnessError::UnregisteredTool(expect.tool.clone()));
        }
        let observer: &dyn CallObserver = &**tools;
        let timeout = Duration::from_millis(expect.timeout_ms);
        let wait = observer.wait_for_call(&expect.tool, &expect.args_contain, timeout).await;

        match wait {
            CallWait::Matched { record, waited } => {
                let detail = describe_call(&record, waited);
                self.record(scheduled_at, ActionKind::ExpectToolCall, Outcome::Pass, detail, Some(waited));
            }
            CallWait::TimedOut { mismatched } if mismatched > 0 => {
                let detail = format!(
                    "{} called {mismatched} time(s) but arguments never matched {}",
                    expect.tool,
                    serde_json::Value::Object(expect.args_contain.clone())
                );
                self.record(scheduled_at, ActionKind::ExpectToolCall, Outcome::Fail, detail, None);
            }
            CallWait::TimedOut { .. } => {
                let detail = format!("{} not called within {}ms", expect.tool, expect.timeout_ms);
                self.record(scheduled_at, ActionKind::ExpectToolCall, Outcome::Timeout, detail, None);
            }
        }
        Ok(())
    }

    async fn conditional(&mut self, conditional: ConditionalAction) -> Result<(), HarnessError> {
        self.settle().await;
        let key = self.evaluate(&conditional.condition)?;
        let now = self.clock.now();

        let branch = conditional
            .branches
            .get(&key)
            .or_else(|| conditional.branches.get(DEFAULT_BRANCH));
        let Some(events) = branch else {
            debug!(condition = ?conditional.condition, %key, "no branch matched");
            return Ok(());
        };
        debug!(condition = ?conditional.condition, %key, events = events.len(), "branch selected");
        for event in events {
            self.timeline.schedule(now + event.at, event.action.clone())?;
        }
        Ok(())
    }

    /// Reduces a condition to a branch key.
    fn evaluate(&self, condition: &Condition) -> Result<String, HarnessError> {
        let flag = |b: bool| b.to_string();
        let key = match condition {
            Condition::ToolCalled(tool) => flag(require(&self.layers.tools, "tools")?.was_called(tool)),
            Condition::ToolSucceeded(tool) => {
                flag(require(&self.layers.tools, "tools")?.last_succeeded(tool) == Some(true))
            }
            Condition::LastOutcome => lock(&self.results)
                .last_outcome()
                .map_or("none", |o| o.name())
                .to_string(),
            Condition::SystemState => self.system.state().name().to_string(),
            Condition::Intent => lock(&self.results)
                .observed()
                .latest_intent()
                .unwrap_or("none")
                .to_string(),
            Condition::ResponseContains(needle) => {
                let results = lock(&self.results);
                let latest = results.observed().latest_response().unwrap_or("");
                flag(latest.to_lowercase().contains(&needle.to_lowercase()))
            }
        };
        Ok(key)
    }

    fn barge_in(&mut self, request: BargeInRequest) -> Result<(), HarnessError> {
        let simulator = require(&self.layers.barge_in, "barge_in")?;
        let audio = Arc::clone(require(&self.layers.audio, "audio")?);
        let mut run = simulator.start(request, self.system.get_response_stream(), self.system.state());

        let ctx = Arc::clone(&self.ctx);
        let system = Arc::clone(&self.system);
        let mic = self.mic.clone();
        let results = Arc::clone(&self.results);
        let faults = Arc::clone(&self.faults);

        let handle = self.ctx.spawn("barge-in", async move {
            while let Some(event) = run.next().await {
                let system_state = system.state();
                {
                    let mut results = lock(&results);
                    if event.is_true_interrupt && system_state == SystemState::Speaking {
                        results.mark_interrupt(ctx.now());
                    }
                    results.record_barge_in(BargeInRecord {
                        pattern: run.pattern(),
                        text: event.text.clone(),
                        is_true_interrupt: event.is_true_interrupt,
                        triggered_at: event.triggered_at,
                        emitted_at: event.timestamp,
                        system_state,
                    });
                }
                info!(pattern = %run.pattern(), text = %event.text, state = %system_state, "user barged in");

                let mut chunks = audio.stream_pcm(event.audio);
                while let Some(chunk) = chunks.next().await {
                    if let Err(err) = mic.deliver(chunk).await {
                        raise(&faults, err.into());
                        return;
                    }
                }
                // Backchannels are not a turn
                if event.is_true_interrupt {
                    if let Err(err) = mic.commit().await {
                        raise(&faults, err.into());
                        return;
                    }
                }
            }
        });
        self.background.push(("barge-in", handle));
        Ok(())
    }

    fn set_network(&self, settings: &NetworkSettings) -> Result<(), HarnessError> {
        let network = require(&self.layers.network, "network")?;
        let config = settings.resolve()?;
        info!(
            latency_ms = config.latency_ms,
            jitter_ms = config.jitter_ms,
            loss = config.loss,
            "network reconfigured"
        );
        network.configure(config);
        Ok(())
    }

    fn network_disconnect(&mut self, duration: Duration) -> Result<(), HarnessError> {
        let network = Arc::clone(require(&self.layers.network, "network")?);
        let mic = self.mic.clone();
        let faults = Arc::clone(&self.faults);
        let handle = self.ctx.spawn(FLUSH_TASK, async move {
            let flushed = network.simulate_disconnect(duration).await;
            for chunk in flushed {
                if let Err(err) = mic.push_raw(chunk).await {
                    raise(&faults, err.into());
                    return;
                }
            }
        });
        self.background.push((FLUSH_TASK, handle));
        Ok(())
    }

    fn record(
        &self,
        scheduled_at: Duration,
        kind: ActionKind,
        outcome: Outcome,
        detail: String,
        latency: Option<Duration>,
    ) {
        lock(&self.results).record(OutcomeRecord {
            scheduled_at,
            evaluated_at: self.clock.now(),
            kind,
            outcome,
            detail,
            latency,
        });
    }
}

fn describe_call(record: &ToolCallRecord, waited: Duration) -> String {
    format!(
        "{} called at {:.2}s (waited {}ms)",
        record.tool,
        record.invoked_at.as_secs_f64(),
        waited.as_millis()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SimContext;
    use crate::layers::LayerConfig;
    use crate::stub::ScriptedSystem;
    use parley_core::register_hotel_booking_mocks;
    use serde_json::json;

    fn hotel_scenario() -> Scenario {
        Scenario::from_value(json!({
            "name": "hotel_booking_basic",
            "stub": {
                "turns": [
                    { "intent": "hotel_booking", "reply": "Sure, for which dates?", "speak_ms": 1500 },
                    {
                        "tool_call": {
                            "name": "check_availability",
                            "args": { "checkin": "next_friday", "nights": 2 }
                        },
                        "reply": "We have rooms available"
                    }
                ]
            },
            "timeline": [
                { "at": "0s", "action": "user_speak", "audio": "I want to book a hotel" },
                { "at": "3s", "action": "assert_system", "expect": { "intent": "hotel_booking" } },
                { "at": "5s", "action": "user_speak", "audio": "Next Friday for two nights" },
                { "at": "8s", "action": "expect_tool_call", "tool": "check_availability",
                  "args_contain": { "checkin": "next_friday", "nights": 2 }, "timeout_ms": 5000 }
            ]
        }))
        .unwrap()
    }

    fn orchestrator_for(ctx: &Arc<SimContext>, scenario: &Scenario) -> (Orchestrator<SimContext>, Arc<ScriptedSystem<SimContext>>) {
        let layers = LayerSet::standard(Arc::clone(ctx), LayerConfig::default());
        if let Some(tools) = &layers.tools {
            register_hotel_booking_mocks(tools);
        }
        let system = Arc::new(ScriptedSystem::new(Arc::clone(ctx), scenario.stub.clone().unwrap_or_default()));
        (Orchestrator::new(Arc::clone(ctx), layers, system.clone()), system)
    }

    #[tokio::test(start_paused = true)]
    async fn test_hotel_booking_end_to_end() {
        let ctx = SimContext::shared(42);
        let scenario = hotel_scenario();
        let (mut orchestrator, system) = orchestrator_for(&ctx, &scenario);

        let report = orchestrator.run(&scenario).await.unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.outcomes.len(), 2, "{:?}", report.outcomes);
        assert!(report.outcomes.iter().all(|r| r.outcome == Outcome::Pass), "{:?}", report.outcomes);
        assert_eq!(report.outcomes[0].kind, ActionKind::AssertSystem);
        assert_eq!(report.outcomes[1].kind, ActionKind::ExpectToolCall);
        assert!(report.outcomes[1].latency.is_some());

        assert_eq!(report.tool_calls.len(), 1);
        assert_eq!(report.tool_calls[0].tool, "check_availability");
        // First reply text lands think_ms after the user's turn ends
        let gap = report.latency.turn_gap[0].as_secs_f64();
        assert!((gap - 0.4).abs() < 0.002, "turn gap {gap}");
        assert_eq!(system.commits(), 2);
        assert!(system.registered_tools().contains(&"create_booking".to_string()));
        assert_eq!(orchestrator.phase(), RunPhase::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_rejected() {
        let ctx = SimContext::shared(1);
        let scenario = Scenario::from_value(json!({ "name": "empty" })).unwrap();
        let (mut orchestrator, _) = orchestrator_for(&ctx, &scenario);

        let report = orchestrator.run(&scenario).await.unwrap();
        assert!(report.passed());
        assert_eq!(orchestrator.run(&scenario).await.unwrap_err(), HarnessError::RunFinished);
        assert_eq!(
            orchestrator.schedule(Duration::ZERO, Action::Wait { duration_ms: 1 }),
            Err(HarnessError::RunFinished)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregistered_tool_aborts_with_partial_ledger() {
        let ctx = SimContext::shared(1);
        let scenario = Scenario::from_value(json!({
            "name": "teleport",
            "timeline": [
                { "at": "1s", "action": "assert_system", "expect": { "state": "idle" } },
                { "at": "2s", "action": "expect_tool_call", "tool": "teleport" },
                { "at": "3s", "action": "assert_system", "expect": { "state": "idle" } }
            ]
        }))
        .unwrap();
        let (mut orchestrator, _) = orchestrator_for(&ctx, &scenario);

        let report = orchestrator.run(&scenario).await.unwrap();
        assert_eq!(
            report.status,
            RunStatus::Aborted {
                error: HarnessError::UnregisteredTool("teleport".into())
            }
        );
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.finished_at, Duration::from_secs(2));
        assert!(!report.passed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_layer_aborts() {
        let ctx = SimContext::shared(1);
        let scenario = Scenario::from_value(json!({
            "name": "noisy",
            "timeline": [{ "at": 0, "action": "inject_noise", "type": "transient", "source": "dog_bark" }]
        }))
        .unwrap();
        let system = Arc::new(ScriptedSystem::new(Arc::clone(&ctx), Default::default()));
        let mut orchestrator = Orchestrator::new(Arc::clone(&ctx), LayerSet::empty(), system);

        let report = orchestrator.run(&scenario).await.unwrap();
        assert_eq!(
            report.status,
            RunStatus::Aborted {
                error: HarnessError::UnregisteredLayer("noise".into())
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_branch_events_interleave_with_timeline() {
        let ctx = SimContext::shared(9);
        let scenario = Scenario::from_value(json!({
            "name": "branching",
            "timeline": [
                {
                    "at": "1s",
                    "action": "conditional",
                    "condition": "system_state",
                    "branches": {
                        "idle": [
                            { "at": "500ms", "action": "assert_system", "expect": { "state": "idle" } },
                            { "at": "2s", "action": "assert_system", "expect": { "state": "idle" } }
                        ],
                        "default": [
                            { "at": 0, "action": "assert_system", "expect": { "state": "speaking" } }
                        ]
                    }
                },
                { "at": "2s", "action": "assert_system", "expect": { "state": "idle" } }
            ]
        }))
        .unwrap();
        let system = Arc::new(ScriptedSystem::new(Arc::clone(&ctx), Default::default()));
        let mut orchestrator = Orchestrator::new(Arc::clone(&ctx), LayerSet::empty(), system);

        let report = orchestrator.run(&scenario).await.unwrap();
        assert!(report.passed(), "{:?}", report.failure_reason());
        let at: Vec<u64> = report.outcomes.iter().map(|r| r.scheduled_at.as_millis() as u64).collect();
        assert_eq!(at, vec![1500, 2000, 3000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_wait_times_out_without_error() {
        let ctx = SimContext::shared(5);
        let scenario = Scenario::from_value(json!({
            "name": "silent",
            "timeline": [
                { "at": "1s", "action": "expect_tool_call", "tool": "check_availability", "timeout_ms": 2000 },
                { "at": "2s", "action": "assert_system", "expect": { "did_not_call": "create_booking" } }
            ]
        }))
        .unwrap();
        let (mut orchestrator, _) = orchestrator_for(&ctx, &scenario);

        let report = orchestrator.run(&scenario).await.unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.outcomes[0].outcome, Outcome::Timeout);
        assert_eq!(report.outcomes[0].evaluated_at, Duration::from_secs(3));
        // The wait held the loop, so the 2 s event fired late
        assert_eq!(report.outcomes[1].outcome, Outcome::Pass);
        assert_eq!(report.outcomes[1].evaluated_at, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_flushes_buffered_speech() {
        let ctx = SimContext::shared(11);
        let scenario = Scenario::from_value(json!({
            "name": "dropout",
            "timeline": [
                { "at": 0, "action": "network_disconnect", "duration_ms": 500 },
                { "at": 0, "action": "user_speak", "audio": "Hello there" }
            ]
        }))
        .unwrap();
        let (mut orchestrator, system) = orchestrator_for(&ctx, &scenario);

        let report = orchestrator.run(&scenario).await.unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        let stats = report.network.unwrap();
        assert_eq!(stats.disconnects, 1);
        assert_eq!(stats.dropped, 0);
        assert_eq!(stats.buffered, stats.flushed);
        assert!(stats.buffered > 0);
        assert_eq!(system.audio_chunks() as u64, stats.delivered + stats.flushed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_assertion_keeps_running() {
        let ctx = SimContext::shared(3);
        let scenario = Scenario::from_value(json!({
            "name": "wrong_intent",
            "stub": {
                "turns": [
                    { "intent": "hotel_booking", "reply": "Sure", "speak_ms": 500 },
                    { "intent": "dates", "reply": "Got it", "speak_ms": 500 }
                ]
            },
            "timeline": [
                { "at": "0s", "action": "user_speak", "audio": "I want to book a hotel" },
                { "at": "3s", "action": "assert_system", "expect": { "intent": "flight_booking" } },
                { "at": "4s", "action": "user_speak", "audio": "Next Friday" },
                { "at": "7s", "action": "assert_system", "expect": { "intent": "dates" } }
            ]
        }))
        .unwrap();
        let (mut orchestrator, system) = orchestrator_for(&ctx, &scenario);

        let report = orchestrator.run(&scenario).await.unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        let outcomes: Vec<Outcome> = report.outcomes.iter().map(|r| r.outcome).collect();
        assert_eq!(outcomes, vec![Outcome::Fail, Outcome::Pass]);
        assert!(report.outcomes[0].detail.contains("expected 'flight_booking', got 'hotel_booking'"));
        assert!(!report.passed());
        assert_eq!(report.count(Outcome::Fail), 1);
        assert_eq!(system.commits(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatched_tool_arguments_fail() {
        let ctx = SimContext::shared(4);
        let scenario = Scenario::from_value(json!({
            "name": "wrong_day",
            "stub": {
                "turns": [{
                    "tool_call": {
                        "name": "check_availability",
                        "args": { "checkin": "next_saturday", "nights": 2 }
                    },
                    "reply": "Saturday it is"
                }]
            },
            "timeline": [
                { "at": "0s", "action": "user_speak", "audio": "Book me a room" },
                { "at": "1s", "action": "expect_tool_call", "tool": "check_availability",
                  "args_contain": { "checkin": "next_friday" }, "timeout_ms": 2000 }
            ]
        }))
        .unwrap();
        let (mut orchestrator, _) = orchestrator_for(&ctx, &scenario);

        let report = orchestrator.run(&scenario).await.unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.tool_calls.len(), 1);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].kind, ActionKind::ExpectToolCall);
        assert_eq!(report.outcomes[0].outcome, Outcome::Fail);
        assert!(report.outcomes[0].detail.contains("never matched"), "{}", report.outcomes[0].detail);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_waits_for_reconnect_flush() {
        let ctx = SimContext::shared(12);
        let scenario = Scenario::from_value(json!({
            "name": "long_dropout",
            "stub": { "turns": [{ "intent": "greeting", "reply": "Hi", "speak_ms": 200 }] },
            "timeline": [
                { "at": 0, "action": "network_disconnect", "duration_ms": 2000 },
                { "at": 0, "action": "user_speak", "audio": "Hello there" },
                { "at": "1s", "action": "assert_system", "expect": { "state": "processing" } }
            ]
        }))
        .unwrap();
        let (mut orchestrator, system) = orchestrator_for(&ctx, &scenario);

        let report = orchestrator.run(&scenario).await.unwrap();
        assert!(report.passed(), "{:?}", report.failure_reason());
        // The whole utterance was withheld, so the turn only ends at reconnect
        assert_eq!(report.outcomes[0].evaluated_at, Duration::from_secs(2));
        let stats = report.network.unwrap();
        assert!(stats.flushed > 0);
        assert_eq!(system.audio_chunks() as u64, stats.delivered + stats.flushed);
        assert_eq!(system.commits(), 1);
    }
}
