//! Parley Deterministic Scenario Harness
//!
//! This crate provides the controlled environment in which a realtime
//! voice agent is put through scripted conversations: the user speaks,
//! the room gets noisy, the network drops, the user interrupts, tools
//! fail, and every expectation is checked against what the agent did.
//!
//! # Core Principle: The Reactor Pattern
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: a paused tokio clock that jumps to the next deadline once
//!   every task is blocked
//! - **Network**: latency, jitter, loss and dropouts drawn from seeded streams
//! - **Randomness**: all entropy derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                         Orchestrator                          │
//! │   SimulatedClock ── Timeline ── ResultsCollector              │
//! │        │                                                      │
//! │  ┌─────▼──────────── LayerSet ─────────────────────────┐      │
//! │  │ Audio → Noise → Network ─┐   Video   BargeIn  Tools │      │
//! │  └──────────────────────────┼─────────────────────▲───┘      │
//! │                             ▼                     │           │
//! │                     ┌──────────────┐   tool calls │           │
//! │                     │ VoiceSystem  │──────────────┘           │
//! │                     └──────┬───────┘                          │
//! │                            │ response stream                  │
//! │                            ▼                                  │
//! │                     ResultsCollector                          │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use parley_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let report = ScenarioRunner::new(42).run_builtin(ScenarioId::HotelBookingBasic)?;
//! assert!(report.passed());
//! ```

mod clock;
mod context;
pub mod error;
mod exporter;
mod layers;
mod orchestrator;
mod results;
mod runner;
pub mod scenario;
pub mod scenarios;
mod stub;
mod timeline;

pub use clock::SimulatedClock;
pub use context::SimContext;
pub use error::HarnessError;
pub use exporter::{write_all, RunExport};
pub use layers::{LayerConfig, LayerSet, MicPath};
pub use orchestrator::{Orchestrator, RunPhase};
pub use results::{
    BargeInRecord, LatencySamples, ObservedState, Outcome, OutcomeRecord, ResultsCollector, RunReport, RunStatus,
};
pub use runner::{run_in_context, RunnerConfig, ScenarioRunner};
pub use scenario::{Action, ActionKind, Scenario};
pub use stub::{ScriptedSystem, ScriptedToolCall, StubScript, TurnScript};
pub use timeline::{Timeline, TimelineEvent};
