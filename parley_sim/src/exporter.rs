//! JSON exporter for run reports.
//!
//! Exports a flattened, millisecond-based view of a `RunReport` for CI
//! dashboards and offline diffing between seeds.

use parley_core::NetworkStats;
use parley_env::ToolArgs;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::time::Duration;
use uuid::Uuid;

use crate::results::{Outcome, RunReport, RunStatus};
use crate::scenario::ActionKind;

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn ms_all(samples: &[Duration]) -> Vec<f64> {
    samples.iter().copied().map(ms).collect()
}

/// One ledger row.
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeRow {
    pub scheduled_ms: f64,
    pub evaluated_ms: f64,
    pub kind: ActionKind,
    pub outcome: Outcome,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRow {
    pub call_id: u64,
    pub tool: String,
    pub args: ToolArgs,
    pub invoked_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolCompletionRow {
    pub call_id: u64,
    pub tool: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    pub completed_ms: f64,
}

/// Raw latency samples in milliseconds.
#[derive(Debug, Clone, Serialize)]
pub struct LatencyExport {
    pub first_byte_ms: Vec<f64>,
    pub turn_gap_ms: Vec<f64>,
    pub interrupt_response_ms: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BargeInRow {
    pub pattern: String,
    pub text: String,
    pub is_true_interrupt: bool,
    pub triggered_ms: f64,
    pub emitted_ms: f64,
    pub system_state: String,
}

/// Complete run export.
#[derive(Debug, Clone, Serialize)]
pub struct RunExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    pub run_id: Uuid,

    /// "completed" or "aborted"
    pub status: &'static str,

    /// Terminal error of an aborted run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub passed: bool,

    /// Virtual time the run ended at
    pub duration_ms: f64,

    pub outcomes: Vec<OutcomeRow>,
    pub tool_calls: Vec<ToolCallRow>,
    pub tool_completions: Vec<ToolCompletionRow>,
    pub latency: LatencyExport,
    pub barge_ins: Vec<BargeInRow>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkStats>,
}

impl RunExport {
    pub fn from_report(report: &RunReport) -> Self {
        let (status, error) = match &report.status {
            RunStatus::Completed => ("completed", None),
            RunStatus::Aborted { error } => ("aborted", Some(error.to_string())),
        };
        Self {
            scenario: report.scenario.clone(),
            seed: report.seed,
            run_id: report.run_id.as_uuid(),
            status,
            error,
            passed: report.passed(),
            duration_ms: ms(report.finished_at),
            outcomes: report
                .outcomes
                .iter()
                .map(|r| OutcomeRow {
                    scheduled_ms: ms(r.scheduled_at),
                    evaluated_ms: ms(r.evaluated_at),
                    kind: r.kind,
                    outcome: r.outcome,
                    detail: r.detail.clone(),
                    latency_ms: r.latency.map(ms),
                })
                .collect(),
            tool_calls: report
                .tool_calls
                .iter()
                .map(|c| ToolCallRow {
                    call_id: c.call_id,
                    tool: c.tool.clone(),
                    args: c.args.clone(),
                    invoked_ms: ms(c.invoked_at),
                })
                .collect(),
            tool_completions: report
                .tool_completions
                .iter()
                .map(|c| ToolCompletionRow {
                    call_id: c.call_id,
                    tool: c.tool.clone(),
                    success: c.result.success,
                    error: c.result.error_kind().map(|k| k.name()),
                    completed_ms: ms(c.completed_at),
                })
                .collect(),
            latency: LatencyExport {
                first_byte_ms: ms_all(&report.latency.first_byte),
                turn_gap_ms: ms_all(&report.latency.turn_gap),
                interrupt_response_ms: ms_all(&report.latency.interrupt_response),
            },
            barge_ins: report
                .barge_ins
                .iter()
                .map(|b| BargeInRow {
                    pattern: b.pattern.name().to_string(),
                    text: b.text.clone(),
                    is_true_interrupt: b.is_true_interrupt,
                    triggered_ms: ms(b.triggered_at),
                    emitted_ms: ms(b.emitted_at),
                    system_state: b.system_state.name().to_string(),
                })
                .collect(),
            network: report.network.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = self.to_json()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

/// Writes several runs (a seed sweep) as one JSON array.
pub fn write_all(exports: &[RunExport], path: &str) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(exports)?;
    let mut file = File::create(path)?;
    file.write_all(json.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;
    use crate::results::{OutcomeRecord, ResultsCollector};
    use approx::assert_relative_eq;

    fn report(status: RunStatus) -> RunReport {
        let mut collector = ResultsCollector::new();
        collector.record(OutcomeRecord {
            scheduled_at: Duration::from_secs(8),
            evaluated_at: Duration::from_millis(8200),
            kind: ActionKind::ExpectToolCall,
            outcome: Outcome::Pass,
            detail: "check_availability called".into(),
            latency: Some(Duration::from_millis(200)),
        });
        collector.mark_turn_end(Duration::from_millis(1760));
        RunReport::assemble(
            "hotel_booking_basic",
            42,
            status,
            collector,
            Vec::new(),
            Vec::new(),
            Some(NetworkStats::default()),
            Duration::from_millis(9500),
        )
    }

    #[test]
    fn test_export_in_milliseconds() {
        let export = RunExport::from_report(&report(RunStatus::Completed));
        assert_eq!(export.status, "completed");
        assert!(export.passed);
        assert_relative_eq!(export.duration_ms, 9500.0);
        assert_relative_eq!(export.outcomes[0].evaluated_ms, 8200.0);
        assert_relative_eq!(export.outcomes[0].latency_ms.unwrap(), 200.0);

        let json: serde_json::Value = serde_json::from_str(&export.to_json().unwrap()).unwrap();
        assert_eq!(json["outcomes"][0]["kind"], "expect_tool_call");
        assert_eq!(json["outcomes"][0]["outcome"], "pass");
        assert_eq!(json["run_id"], export.run_id.to_string());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_aborted_export_carries_error() {
        let export = RunExport::from_report(&report(RunStatus::Aborted {
            error: HarnessError::UnregisteredLayer("video".into()),
        }));
        assert_eq!(export.status, "aborted");
        assert!(!export.passed);
        assert_eq!(export.error.as_deref(), Some("Layer not registered: video"));
    }
}
