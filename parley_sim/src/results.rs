//! Results ledger: per-event outcomes plus what the agent was observed
//! doing.
//!
//! The ledger is append-only. Expectation failures land here as records
//! rather than errors so a single run reports every assertion.

use parley_core::{BargeInPattern, NetworkStats, ToolCallRecord, ToolCompletion};
use parley_env::{ResponseEvent, ResponseKind, RunId, SystemState};
use serde::Serialize;
use std::time::Duration;

use crate::error::HarnessError;
use crate::scenario::ActionKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Fail,
    Timeout,
}

impl Outcome {
    pub fn name(&self) -> &'static str {
        match self {
            Outcome::Pass => "pass",
            Outcome::Fail => "fail",
            Outcome::Timeout => "timeout",
        }
    }
}

/// One evaluated expectation.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeRecord {
    /// When the event was scheduled to fire
    pub scheduled_at: Duration,
    /// When the verdict was reached
    pub evaluated_at: Duration,
    pub kind: ActionKind,
    pub outcome: Outcome,
    pub detail: String,
    /// Observed latency for tool waits
    pub latency: Option<Duration>,
}

/// What the agent has said and done so far.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObservedState {
    pub intents: Vec<String>,
    pub responses: Vec<String>,
    /// Latest state announced on the response stream
    pub state: Option<SystemState>,
    pub tool_calls: Vec<String>,
    pub errors: Vec<String>,
    pub audio_events: usize,
}

impl ObservedState {
    pub fn latest_intent(&self) -> Option<&str> {
        self.intents.last().map(String::as_str)
    }

    pub fn latest_response(&self) -> Option<&str> {
        self.responses.last().map(String::as_str)
    }

    /// Case-insensitive search of every reply so far.
    pub fn ever_said(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.responses.iter().any(|r| r.to_lowercase().contains(&needle))
    }
}

/// Raw latency samples; statistics are left to the consumer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LatencySamples {
    /// User turn end -> first reply audio
    pub first_byte: Vec<Duration>,
    /// User turn end -> first reply text or audio
    pub turn_gap: Vec<Duration>,
    /// Interruption delivered -> agent stops speaking
    pub interrupt_response: Vec<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BargeInRecord {
    pub pattern: BargeInPattern,
    pub text: String,
    pub is_true_interrupt: bool,
    pub triggered_at: Duration,
    pub emitted_at: Duration,
    /// Agent state when the interruption started playing
    pub system_state: SystemState,
}

/// Accumulates outcomes and observations during a run.
#[derive(Debug, Default)]
pub struct ResultsCollector {
    outcomes: Vec<OutcomeRecord>,
    observed: ObservedState,
    latency: LatencySamples,
    barge_ins: Vec<BargeInRecord>,
    turn_end: Option<Duration>,
    awaiting_first_byte: bool,
    awaiting_turn_gap: bool,
    interrupt_mark: Option<Duration>,
}

impl ResultsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: OutcomeRecord) {
        match record.outcome {
            Outcome::Pass => tracing::info!(kind = %record.kind, detail = %record.detail, "PASS"),
            Outcome::Fail => tracing::warn!(kind = %record.kind, detail = %record.detail, "FAIL"),
            Outcome::Timeout => tracing::warn!(kind = %record.kind, detail = %record.detail, "TIMEOUT"),
        }
        self.outcomes.push(record);
    }

    /// The user finished a turn; next replies are measured against `at`.
    pub fn mark_turn_end(&mut self, at: Duration) {
        self.turn_end = Some(at);
        self.awaiting_first_byte = true;
        self.awaiting_turn_gap = true;
    }

    /// An interruption was delivered while the agent was speaking.
    pub fn mark_interrupt(&mut self, at: Duration) {
        self.interrupt_mark = Some(at);
    }

    pub fn record_barge_in(&mut self, record: BargeInRecord) {
        self.barge_ins.push(record);
    }

    /// Folds one response event into the observed state and latencies.
    pub fn observe(&mut self, event: &ResponseEvent) {
        let since_turn = self.turn_end.map(|end| event.timestamp.saturating_sub(end));
        match &event.kind {
            ResponseKind::Audio(_) => {
                self.observed.audio_events += 1;
                if self.awaiting_first_byte {
                    self.awaiting_first_byte = false;
                    self.latency.first_byte.extend(since_turn);
                }
                if self.awaiting_turn_gap {
                    self.awaiting_turn_gap = false;
                    self.latency.turn_gap.extend(since_turn);
                }
            }
            ResponseKind::Text(text) => {
                self.observed.responses.push(text.clone());
                if self.awaiting_turn_gap {
                    self.awaiting_turn_gap = false;
                    self.latency.turn_gap.extend(since_turn);
                }
            }
            ResponseKind::Intent(intent) => self.observed.intents.push(intent.clone()),
            ResponseKind::ToolCall { name, .. } => self.observed.tool_calls.push(name.clone()),
            ResponseKind::ToolResult { .. } => {}
            ResponseKind::StateChange(state) => {
                self.observed.state = Some(*state);
                if *state != SystemState::Speaking {
                    if let Some(mark) = self.interrupt_mark.take() {
                        self.latency
                            .interrupt_response
                            .push(event.timestamp.saturating_sub(mark));
                    }
                }
            }
            ResponseKind::Error(message) => {
                tracing::warn!(%message, "system reported an error");
                self.observed.errors.push(message.clone());
            }
        }
    }

    pub fn outcomes(&self) -> &[OutcomeRecord] {
        &self.outcomes
    }

    pub fn last_outcome(&self) -> Option<Outcome> {
        self.outcomes.last().map(|r| r.outcome)
    }

    pub fn observed(&self) -> &ObservedState {
        &self.observed
    }

    pub fn latency(&self) -> &LatencySamples {
        &self.latency
    }

    pub fn barge_ins(&self) -> &[BargeInRecord] {
        &self.barge_ins
    }

    fn into_parts(self) -> (Vec<OutcomeRecord>, ObservedState, LatencySamples, Vec<BargeInRecord>) {
        (self.outcomes, self.observed, self.latency, self.barge_ins)
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    /// The whole timeline was dispatched
    Completed,
    /// A structural error stopped the run; the ledger is partial
    Aborted { error: HarnessError },
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub scenario: String,
    pub seed: u64,
    pub run_id: RunId,
    pub status: RunStatus,
    pub outcomes: Vec<OutcomeRecord>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub tool_completions: Vec<ToolCompletion>,
    pub latency: LatencySamples,
    pub barge_ins: Vec<BargeInRecord>,
    pub network: Option<NetworkStats>,
    pub observed: ObservedState,
    pub finished_at: Duration,
}

impl RunReport {
    pub(crate) fn assemble(
        scenario: &str,
        seed: u64,
        status: RunStatus,
        collector: ResultsCollector,
        tool_calls: Vec<ToolCallRecord>,
        tool_completions: Vec<ToolCompletion>,
        network: Option<NetworkStats>,
        finished_at: Duration,
    ) -> Self {
        let (outcomes, observed, latency, barge_ins) = collector.into_parts();
        Self {
            scenario: scenario.to_string(),
            seed,
            run_id: RunId::from_seed(seed),
            status,
            outcomes,
            tool_calls,
            tool_completions,
            latency,
            barge_ins,
            network,
            observed,
            finished_at,
        }
    }

    /// Completed with every outcome passing.
    pub fn passed(&self) -> bool {
        self.status == RunStatus::Completed && self.outcomes.iter().all(|r| r.outcome == Outcome::Pass)
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.outcomes.iter().filter(|r| r.outcome == outcome).count()
    }

    /// Human-readable reason for a failed run.
    pub fn failure_reason(&self) -> Option<String> {
        if let RunStatus::Aborted { error } = &self.status {
            return Some(format!("aborted: {error}"));
        }
        self.outcomes
            .iter()
            .find(|r| r.outcome != Outcome::Pass)
            .map(|r| format!("{} at {:.1}s {}: {}", r.kind, r.scheduled_at.as_secs_f64(), r.outcome.name(), r.detail))
    }
}
