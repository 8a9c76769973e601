//! Mock tool registry.
//!
//! Stands in for every external service the agent can call. Each mock has
//! a latency range and a failure probability so scenarios can exercise
//! slow and flaky backends, not just the happy path.
//!
//! Two append-only logs are kept: invocation records (written the moment
//! a call arrives) and completions (written when its result is returned).
//! Neither is ever rewritten, so a test can reason about exactly what the
//! agent asked for and when.

use async_trait::async_trait;
use parley_env::{lock, HarnessContext, ToolArgs, ToolErrorKind, ToolInvoker, ToolResult};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::error::LayerError;
use crate::layer::{CallObserver, SimulationLayer, RNG_STREAM_TOOLS};

/// Mock implementation of one tool.
pub type ToolHandler = Arc<dyn Fn(&ToolArgs) -> Result<Value, String> + Send + Sync>;

#[derive(Clone)]
pub struct ToolMock {
    pub handler: ToolHandler,
    /// Inclusive simulated latency range in milliseconds
    pub latency_ms: (u64, u64),
    /// Probability in [0, 1] that a call fails before reaching the handler
    pub failure_rate: f64,
    pub error_kind: ToolErrorKind,
}

impl ToolMock {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&ToolArgs) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            latency_ms: (100, 500),
            failure_rate: 0.0,
            error_kind: ToolErrorKind::ServiceUnavailable,
        }
    }

    pub fn with_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.latency_ms = (min_ms.min(max_ms), min_ms.max(max_ms));
        self
    }

    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = sanitize_rate(rate);
        self
    }

    pub fn with_error_kind(mut self, kind: ToolErrorKind) -> Self {
        self.error_kind = kind;
        self
    }
}

impl std::fmt::Debug for ToolMock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolMock")
            .field("latency_ms", &self.latency_ms)
            .field("failure_rate", &self.failure_rate)
            .field("error_kind", &self.error_kind)
            .finish_non_exhaustive()
    }
}

fn sanitize_rate(rate: f64) -> f64 {
    if rate.is_finite() {
        rate.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Partial override of a registered mock, applied by scenarios.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MockOverride {
    pub latency_ms: Option<(u64, u64)>,
    pub failure_rate: Option<f64>,
}

/// One call as the agent made it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRecord {
    pub call_id: u64,
    pub tool: String,
    pub args: ToolArgs,
    pub invoked_at: Duration,
}

/// The result handed back for a call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCompletion {
    pub call_id: u64,
    pub tool: String,
    pub result: ToolResult,
    pub completed_at: Duration,
}

/// Outcome of [`MockToolRegistry::wait_for_call`].
#[derive(Debug, Clone, PartialEq)]
pub enum CallWait {
    Matched {
        record: ToolCallRecord,
        /// Time from the start of the wait to the matching call; zero when
        /// the call was already in the log
        waited: Duration,
    },
    TimedOut {
        /// Calls to the right tool whose arguments never matched
        mismatched: usize,
    },
}

impl CallWait {
    pub fn is_matched(&self) -> bool {
        matches!(self, CallWait::Matched { .. })
    }
}

struct RegistryState {
    mocks: BTreeMap<String, ToolMock>,
    calls: Vec<ToolCallRecord>,
    completions: Vec<ToolCompletion>,
    /// Call ids already consumed by an expectation
    claimed: HashSet<u64>,
    rng: ChaCha8Rng,
    next_call_id: u64,
}

/// Registry of mock tools shared between the agent and the orchestrator.
pub struct MockToolRegistry<Ctx: HarnessContext> {
    ctx: Arc<Ctx>,
    state: Mutex<RegistryState>,
    appended: Notify,
}

impl<Ctx: HarnessContext> MockToolRegistry<Ctx> {
    pub fn new(ctx: Arc<Ctx>) -> Self {
        let rng = ctx.derive_rng(RNG_STREAM_TOOLS);
        Self {
            ctx,
            state: Mutex::new(RegistryState {
                mocks: BTreeMap::new(),
                calls: Vec::new(),
                completions: Vec::new(),
                claimed: HashSet::new(),
                rng,
                next_call_id: 1,
            }),
            appended: Notify::new(),
        }
    }

    /// Registers a handler with the default latency and no failures.
    pub fn register<F>(&self, name: &str, handler: F)
    where
        F: Fn(&ToolArgs) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.register_mock(name, ToolMock::new(handler));
    }

    /// Stores a mock, fully replacing any previous one of the same name.
    pub fn register_mock(&self, name: &str, mut mock: ToolMock) {
        let (lo, hi) = mock.latency_ms;
        mock.latency_ms = (lo.min(hi), lo.max(hi));
        mock.failure_rate = sanitize_rate(mock.failure_rate);
        tracing::debug!(tool = name, ?mock, "registering mock tool");
        lock(&self.state).mocks.insert(name.to_string(), mock);
    }

    /// Adjusts latency and/or failure rate of an already registered mock.
    pub fn apply_override(&self, name: &str, patch: MockOverride) -> Result<(), LayerError> {
        let mut state = lock(&self.state);
        let mock = state
            .mocks
            .get_mut(name)
            .ok_or_else(|| LayerError::UnknownTool(name.to_string()))?;
        if let Some((min, max)) = patch.latency_ms {
            mock.latency_ms = (min.min(max), min.max(max));
        }
        if let Some(rate) = patch.failure_rate {
            mock.failure_rate = sanitize_rate(rate);
        }
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        lock(&self.state).mocks.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        lock(&self.state).mocks.keys().cloned().collect()
    }

    /// Serves one call from the agent.
    pub async fn handle_call(&self, name: &str, args: ToolArgs) -> ToolResult {
        let invoked_at = self.ctx.now();

        // Draws happen under the same lock as the append so concurrent
        // calls consume the stream in log order.
        let (call_id, plan) = {
            let mut state = lock(&self.state);
            let call_id = state.next_call_id;
            state.next_call_id += 1;
            state.calls.push(ToolCallRecord {
                call_id,
                tool: name.to_string(),
                args: args.clone(),
                invoked_at,
            });

            let plan = match state.mocks.get(name).cloned() {
                Some(mock) => {
                    let (lo, hi) = mock.latency_ms;
                    let latency = Duration::from_millis(state.rng.gen_range(lo..=hi));
                    let fails = state.rng.gen_bool(mock.failure_rate);
                    Some((mock, latency, fails))
                }
                None => None,
            };
            (call_id, plan)
        };
        self.appended.notify_waiters();

        let result = match plan {
            None => {
                tracing::warn!(tool = name, "call to unregistered tool");
                ToolResult::failure(ToolErrorKind::UnknownTool, format!("Unknown tool: {name}"), Duration::ZERO)
            }
            Some((mock, latency, fails)) => {
                self.ctx.sleep(latency).await;
                if fails {
                    tracing::debug!(tool = name, call_id, "simulated tool failure");
                    ToolResult::failure(mock.error_kind, mock.error_kind.to_string(), latency)
                } else {
                    match (mock.handler)(&args) {
                        Ok(data) => ToolResult::ok(data, latency),
                        Err(message) => ToolResult::failure(ToolErrorKind::HandlerFailed, message, latency),
                    }
                }
            }
        };

        lock(&self.state).completions.push(ToolCompletion {
            call_id,
            tool: name.to_string(),
            result: result.clone(),
            completed_at: self.ctx.now(),
        });
        self.appended.notify_waiters();
        result
    }

    /// Suspends until an unclaimed call to `name` whose arguments contain
    /// `args_contain` is in the log, or `timeout` elapses.
    ///
    /// A match claims the record; it cannot satisfy another wait.
    pub async fn wait_for_call(&self, name: &str, args_contain: &ToolArgs, timeout: Duration) -> CallWait {
        let started = self.ctx.now();
        let deadline = started + timeout;

        loop {
            // Register interest before scanning so an append between the
            // scan and the await is not missed.
            let appended = self.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            let mismatched = {
                let mut state = lock(&self.state);
                let mut mismatched = 0;
                let mut found = None;
                for record in state.calls.iter().filter(|r| r.tool == name) {
                    if state.claimed.contains(&record.call_id) {
                        continue;
                    }
                    if args_match(&record.args, args_contain) {
                        found = Some(record.clone());
                        break;
                    }
                    mismatched += 1;
                }
                if let Some(record) = found {
                    state.claimed.insert(record.call_id);
                    let waited = record.invoked_at.saturating_sub(started);
                    tracing::debug!(tool = name, call_id = record.call_id, ?waited, "tool call matched");
                    return CallWait::Matched { record, waited };
                }
                mismatched
            };

            tokio::select! {
                biased;
                _ = &mut appended => {}
                _ = self.ctx.sleep_until(deadline) => {
                    tracing::debug!(tool = name, mismatched, "timed out waiting for tool call");
                    return CallWait::TimedOut { mismatched };
                }
            }
        }
    }

    pub fn calls(&self) -> Vec<ToolCallRecord> {
        lock(&self.state).calls.clone()
    }

    pub fn completions(&self) -> Vec<ToolCompletion> {
        lock(&self.state).completions.clone()
    }

    pub fn was_called(&self, name: &str) -> bool {
        lock(&self.state).calls.iter().any(|r| r.tool == name)
    }

    pub fn called_times(&self, name: &str) -> usize {
        lock(&self.state).calls.iter().filter(|r| r.tool == name).count()
    }

    /// True when `names` appear in the log in this relative order (other
    /// calls may be interleaved).
    pub fn called_in_order(&self, names: &[&str]) -> bool {
        let state = lock(&self.state);
        let mut log = state.calls.iter();
        names.iter().all(|name| log.any(|r| r.tool == *name))
    }

    /// True when `name` was called at least twice and at most
    /// `max_retries + 1` times.
    pub fn retried(&self, name: &str, max_retries: usize) -> bool {
        let n = self.called_times(name);
        n >= 2 && n <= max_retries + 1
    }

    /// Whether the latest completion of `name` succeeded.
    pub fn last_succeeded(&self, name: &str) -> Option<bool> {
        lock(&self.state)
            .completions
            .iter()
            .rev()
            .find(|c| c.tool == name)
            .map(|c| c.result.success)
    }
}

/// Superset match: every expected key is present with an equal value.
/// Numbers compare by value so `2` matches `2.0`.
pub fn args_match(actual: &ToolArgs, expected: &ToolArgs) -> bool {
    expected
        .iter()
        .all(|(key, want)| actual.get(key).is_some_and(|got| values_equal(got, want)))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

impl<Ctx: HarnessContext> SimulationLayer for MockToolRegistry<Ctx> {
    fn layer_name(&self) -> &'static str {
        "tools"
    }
}

#[async_trait]
impl<Ctx: HarnessContext> CallObserver for MockToolRegistry<Ctx> {
    async fn wait_for_call(&self, name: &str, args_contain: &ToolArgs, timeout: Duration) -> CallWait {
        MockToolRegistry::wait_for_call(self, name, args_contain, timeout).await
    }
}

#[async_trait]
impl<Ctx: HarnessContext> ToolInvoker for MockToolRegistry<Ctx> {
    async fn invoke(&self, name: &str, args: ToolArgs) -> ToolResult {
        self.handle_call(name, args).await
    }
}
