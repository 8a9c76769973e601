//! Scenario model and JSON loading.
//!
//! A scenario is parsed once, up front, into typed actions. Anything the
//! orchestrator could not act on (unknown action, malformed field, bad
//! duration) is rejected here as a `HarnessError` before the run starts.
//!
//! ```json
//! {
//!   "scenario": {
//!     "name": "hotel_booking_basic",
//!     "environment": { "noise_profile": "office", "network": { "profile": "good_4g" } },
//!     "timeline": [
//!       { "at": "0s", "action": "user_speak", "audio": "I want to book a hotel" },
//!       { "at": 3, "action": "assert_system", "expect": { "intent": "hotel_booking" } }
//!     ]
//!   }
//! }
//! ```

use parley_core::{BargeInPattern, BargeInRequest, LayerError, MockOverride, NetworkConfig, NoiseKind, SpeechStyle, VideoSource};
use parley_env::{SystemState, ToolArgs};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::HarnessError;
use crate::stub::StubScript;

pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_VIDEO_MS: u64 = 1000;
/// Branch taken when no other branch key matches.
pub const DEFAULT_BRANCH: &str = "default";

/// Every action a timeline can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    UserSpeak,
    InjectNoise,
    InjectVideo,
    AssertSystem,
    ExpectToolCall,
    Conditional,
    BargeIn,
    Wait,
    SetNetwork,
    NetworkDisconnect,
}

impl ActionKind {
    pub fn all() -> Vec<ActionKind> {
        vec![
            ActionKind::UserSpeak,
            ActionKind::InjectNoise,
            ActionKind::InjectVideo,
            ActionKind::AssertSystem,
            ActionKind::ExpectToolCall,
            ActionKind::Conditional,
            ActionKind::BargeIn,
            ActionKind::Wait,
            ActionKind::SetNetwork,
            ActionKind::NetworkDisconnect,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::UserSpeak => "user_speak",
            ActionKind::InjectNoise => "inject_noise",
            ActionKind::InjectVideo => "inject_video",
            ActionKind::AssertSystem => "assert_system",
            ActionKind::ExpectToolCall => "expect_tool_call",
            ActionKind::Conditional => "conditional",
            ActionKind::BargeIn => "barge_in",
            ActionKind::Wait => "wait",
            ActionKind::SetNetwork => "set_network",
            ActionKind::NetworkDisconnect => "network_disconnect",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ActionKind {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::all()
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| HarnessError::UnknownAction(s.to_string()))
    }
}

/// A typed timeline action with its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    UserSpeak(SpeakAction),
    InjectNoise(NoiseAction),
    InjectVideo(VideoAction),
    AssertSystem(Expectation),
    ExpectToolCall(ToolExpectation),
    Conditional(ConditionalAction),
    BargeIn(BargeInRequest),
    Wait { duration_ms: u64 },
    SetNetwork(NetworkSettings),
    NetworkDisconnect { duration_ms: u64 },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::UserSpeak(_) => ActionKind::UserSpeak,
            Action::InjectNoise(_) => ActionKind::InjectNoise,
            Action::InjectVideo(_) => ActionKind::InjectVideo,
            Action::AssertSystem(_) => ActionKind::AssertSystem,
            Action::ExpectToolCall(_) => ActionKind::ExpectToolCall,
            Action::Conditional(_) => ActionKind::Conditional,
            Action::BargeIn(_) => ActionKind::BargeIn,
            Action::Wait { .. } => ActionKind::Wait,
            Action::SetNetwork(_) => ActionKind::SetNetwork,
            Action::NetworkDisconnect { .. } => ActionKind::NetworkDisconnect,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SpeakAction {
    /// Text to synthesize (a `tts://` prefix is accepted)
    #[serde(default)]
    pub audio: String,
    #[serde(default)]
    pub speech_style: SpeechStyle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoiseAction {
    pub kind: NoiseKind,
    pub source: String,
    pub duration: Option<Duration>,
    pub level_db: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoAction {
    pub source: VideoSource,
    pub duration: Duration,
}

/// Checks made by `assert_system` against the observed conversation.
///
/// Every set field must hold for the assertion to pass.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Expectation {
    /// Latest recognized intent
    pub intent: Option<String>,
    /// Substring of the latest reply text (case-insensitive)
    pub response_contains: Option<String>,
    pub state: Option<SystemState>,
    pub tool_called: Option<String>,
    pub did_not_call: Option<String>,
    /// Substring that must not appear in any reply so far
    pub did_not_say: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolExpectation {
    pub tool: String,
    #[serde(default)]
    pub args_contain: ToolArgs,
    #[serde(default = "default_tool_timeout")]
    pub timeout_ms: u64,
}

fn default_tool_timeout() -> u64 {
    DEFAULT_TOOL_TIMEOUT_MS
}

/// Predicate evaluated by `conditional` to a branch key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// `tool_called:<name>` -> "true" / "false"
    ToolCalled(String),
    /// `tool_succeeded:<name>` -> "true" / "false"
    ToolSucceeded(String),
    /// `last_outcome` -> "pass" / "fail" / "timeout" / "none"
    LastOutcome,
    /// `system_state` -> the state name
    SystemState,
    /// `intent` -> latest intent or "none"
    Intent,
    /// `response_contains:<text>` -> "true" / "false"
    ResponseContains(String),
}

impl std::str::FromStr for Condition {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (head, arg) = match s.split_once(':') {
            Some((head, arg)) => (head.trim(), Some(arg.trim())),
            None => (s.trim(), None),
        };
        let need_arg = |arg: Option<&str>| {
            arg.filter(|a| !a.is_empty())
                .map(str::to_string)
                .ok_or_else(|| HarnessError::schema(format!("condition '{s}' needs an argument")))
        };
        match head {
            "tool_called" => Ok(Condition::ToolCalled(need_arg(arg)?)),
            "tool_succeeded" => Ok(Condition::ToolSucceeded(need_arg(arg)?)),
            "response_contains" => Ok(Condition::ResponseContains(need_arg(arg)?)),
            "last_outcome" => Ok(Condition::LastOutcome),
            "system_state" => Ok(Condition::SystemState),
            "intent" => Ok(Condition::Intent),
            _ => Err(HarnessError::schema(format!("unknown condition '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalAction {
    pub condition: Condition,
    /// Branch key -> events with offsets relative to the firing time
    pub branches: BTreeMap<String, Vec<ScheduledEvent>>,
}

/// Network settings for the environment block and `set_network`.
///
/// Explicit fields override the named profile.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub profile: Option<String>,
    pub latency_ms: Option<f64>,
    pub jitter_ms: Option<f64>,
    pub loss: Option<f64>,
    pub bandwidth_bps: Option<u64>,
}

impl NetworkSettings {
    pub fn profile(name: &str) -> Self {
        Self {
            profile: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn resolve(&self) -> Result<NetworkConfig, LayerError> {
        let mut config = match &self.profile {
            Some(name) => NetworkConfig::profile(name)?,
            None => NetworkConfig::new(10.0, 2.0, 0.0),
        };
        if let Some(latency) = self.latency_ms {
            config.latency_ms = latency;
        }
        if let Some(jitter) = self.jitter_ms {
            config.jitter_ms = jitter;
        }
        if let Some(loss) = self.loss {
            config.loss = loss;
        }
        if self.bandwidth_bps.is_some() {
            config.bandwidth_bps = self.bandwidth_bps;
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct Environment {
    pub noise_profile: Option<String>,
    pub noise_snr_db: Option<f64>,
    pub network: Option<NetworkSettings>,
}

/// An action at an offset from scenario start (or, inside a branch, from
/// the time the conditional fired).
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEvent {
    pub at: Duration,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub environment: Environment,
    /// Per-tool latency / failure overrides applied before the run
    pub tools: BTreeMap<String, MockOverride>,
    /// Script for the built-in scripted agent
    pub stub: Option<StubScript>,
    pub timeline: Vec<ScheduledEvent>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct ToolSettings {
    latency_ms: Option<(u64, u64)>,
    failure_rate: Option<f64>,
}

impl Scenario {
    pub fn from_json(text: &str) -> Result<Self, HarnessError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, HarnessError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::schema(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    /// Parses a scenario document, optionally wrapped in a `scenario` key.
    pub fn from_value(value: Value) -> Result<Self, HarnessError> {
        let mut root = match value {
            Value::Object(mut map) => match map.remove("scenario") {
                Some(Value::Object(inner)) => inner,
                Some(_) => return Err(HarnessError::schema("'scenario' must be an object")),
                None => map,
            },
            _ => return Err(HarnessError::schema("scenario document must be an object")),
        };

        let name = match root.remove("name") {
            Some(Value::String(name)) if !name.is_empty() => name,
            _ => return Err(HarnessError::schema("scenario needs a non-empty 'name'")),
        };
        let description = match root.remove("description") {
            Some(Value::String(text)) => text,
            _ => String::new(),
        };
        let tags: Vec<String> = take_field(&mut root, "tags")?.unwrap_or_default();
        let environment: Environment = take_field(&mut root, "environment")?.unwrap_or_default();
        let stub: Option<StubScript> = take_field(&mut root, "stub")?;
        let tools = take_field::<BTreeMap<String, ToolSettings>>(&mut root, "tools")?
            .unwrap_or_default()
            .into_iter()
            .map(|(name, settings)| {
                (
                    name,
                    MockOverride {
                        latency_ms: settings.latency_ms,
                        failure_rate: settings.failure_rate,
                    },
                )
            })
            .collect();

        let timeline = match root.remove("timeline") {
            Some(Value::Array(entries)) => parse_events(&entries)?,
            Some(_) => return Err(HarnessError::schema("'timeline' must be a list")),
            None => Vec::new(),
        };

        Ok(Scenario {
            name,
            description,
            tags,
            environment,
            tools,
            stub,
            timeline,
        })
    }
}

fn take_field<T: serde::de::DeserializeOwned>(map: &mut Map<String, Value>, key: &str) -> Result<Option<T>, HarnessError> {
    match map.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| HarnessError::schema(format!("invalid '{key}': {e}"))),
    }
}

fn parse_events(entries: &[Value]) -> Result<Vec<ScheduledEvent>, HarnessError> {
    entries.iter().map(parse_event).collect()
}

fn parse_event(entry: &Value) -> Result<ScheduledEvent, HarnessError> {
    let Value::Object(map) = entry else {
        return Err(HarnessError::schema("timeline entries must be objects"));
    };
    let mut params = map.clone();
    let at = parse_at(params.remove("at").as_ref())?;
    let kind: ActionKind = match params.remove("action") {
        Some(Value::String(action)) => action.parse()?,
        _ => return Err(HarnessError::schema("timeline entry needs an 'action'")),
    };
    let action = parse_action(kind, params)
        .map_err(|e| match e {
            HarnessError::Schema(msg) => HarnessError::schema(format!("{kind} at {at:?}: {msg}")),
            other => other,
        })?;
    Ok(ScheduledEvent { at, action })
}

fn parse_action(kind: ActionKind, mut params: Map<String, Value>) -> Result<Action, HarnessError> {
    let action = match kind {
        ActionKind::UserSpeak => Action::UserSpeak(from_params(params)?),
        ActionKind::InjectNoise => {
            let kind = match params.remove("type") {
                Some(Value::String(kind)) => kind.parse::<NoiseKind>()?,
                None => NoiseKind::Transient,
                Some(_) => return Err(HarnessError::schema("'type' must be a string")),
            };
            let source = match params.remove("source") {
                Some(Value::String(source)) => source,
                None => String::new(),
                Some(_) => return Err(HarnessError::schema("'source' must be a string")),
            };
            if kind == NoiseKind::Transient && source.is_empty() {
                return Err(HarnessError::schema("transient noise needs a 'source'"));
            }
            Action::InjectNoise(NoiseAction {
                kind,
                source,
                duration: optional_u64(&params, "duration_ms")?.map(Duration::from_millis),
                level_db: params.get("level_db").and_then(Value::as_f64),
            })
        }
        ActionKind::InjectVideo => {
            let duration = optional_u64(&params, "duration_ms")?.unwrap_or(DEFAULT_VIDEO_MS);
            params
                .entry("source")
                .or_insert_with(|| Value::String("camera".to_string()));
            Action::InjectVideo(VideoAction {
                source: from_params(params)?,
                duration: Duration::from_millis(duration),
            })
        }
        ActionKind::AssertSystem => {
            let expect = params.remove("expect").unwrap_or(Value::Object(Map::new()));
            Action::AssertSystem(
                serde_json::from_value(expect).map_err(|e| HarnessError::schema(format!("invalid 'expect': {e}")))?,
            )
        }
        ActionKind::ExpectToolCall => Action::ExpectToolCall(from_params(params)?),
        ActionKind::Conditional => {
            let condition = match params.remove("condition") {
                Some(Value::String(text)) => text.parse()?,
                _ => return Err(HarnessError::schema("conditional needs a 'condition' string")),
            };
            let branches = match params.remove("branches") {
                Some(Value::Object(branches)) => branches
                    .into_iter()
                    .map(|(key, events)| match events {
                        Value::Array(entries) => Ok((key, parse_events(&entries)?)),
                        _ => Err(HarnessError::schema(format!("branch '{key}' must be a list"))),
                    })
                    .collect::<Result<BTreeMap<_, _>, _>>()?,
                None => BTreeMap::new(),
                Some(_) => return Err(HarnessError::schema("'branches' must be an object")),
            };
            Action::Conditional(ConditionalAction { condition, branches })
        }
        ActionKind::BargeIn => {
            let pattern: BargeInPattern = match params.get("pattern") {
                Some(Value::String(pattern)) => pattern.parse()?,
                None => BargeInPattern::EagerInterrupt,
                Some(_) => return Err(HarnessError::schema("'pattern' must be a string")),
            };
            let text_field = |key: &str| params.get(key).and_then(Value::as_str).map(str::to_string);
            let mut request = BargeInRequest::new(pattern);
            request.keyword = text_field("keyword");
            request.correction = text_field("correction").unwrap_or_default();
            request.question = text_field("question").unwrap_or_default();
            request.text = text_field("text");
            if let Some(repeats) = optional_u64(&params, "repeats")? {
                request.repeats = repeats as usize;
            }
            if let Some(timeout) = optional_u64(&params, "trigger_timeout_ms")? {
                request.trigger_timeout = Duration::from_millis(timeout);
            }
            Action::BargeIn(request)
        }
        ActionKind::Wait => Action::Wait {
            duration_ms: optional_u64(&params, "duration_ms")?.unwrap_or(0),
        },
        ActionKind::SetNetwork => Action::SetNetwork(from_params(params)?),
        ActionKind::NetworkDisconnect => Action::NetworkDisconnect {
            duration_ms: optional_u64(&params, "duration_ms")?.unwrap_or(0),
        },
    };
    Ok(action)
}

fn from_params<T: serde::de::DeserializeOwned>(params: Map<String, Value>) -> Result<T, HarnessError> {
    serde_json::from_value(Value::Object(params)).map_err(|e| HarnessError::schema(e.to_string()))
}

fn optional_u64(params: &Map<String, Value>, key: &str) -> Result<Option<u64>, HarnessError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| HarnessError::schema(format!("'{key}' must be a non-negative integer"))),
    }
}

/// Parses an `at` offset: a number of seconds, or `"2.5s"` / `"300ms"`.
pub fn parse_at(value: Option<&Value>) -> Result<Duration, HarnessError> {
    let secs = match value {
        None => 0.0,
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| HarnessError::schema(format!("invalid time {n}")))?,
        Some(Value::String(text)) => parse_time_str(text)?,
        Some(other) => return Err(HarnessError::schema(format!("invalid time {other}"))),
    };
    if !secs.is_finite() || secs < 0.0 {
        return Err(HarnessError::schema(format!("time offset must be non-negative, got {secs}")));
    }
    // Whole milliseconds keep virtual sleeps exact
    Ok(Duration::from_millis((secs * 1000.0).round() as u64))
}

fn parse_time_str(text: &str) -> Result<f64, HarnessError> {
    let text = text.trim();
    let invalid = || HarnessError::schema(format!("invalid time '{text}'"));
    if let Some(ms) = text.strip_suffix("ms") {
        return ms.trim().parse::<f64>().map(|v| v / 1000.0).map_err(|_| invalid());
    }
    let secs = text.strip_suffix('s').unwrap_or(text);
    secs.trim().parse::<f64>().map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_times() {
        assert_eq!(parse_at(Some(&json!(2.5))).unwrap(), Duration::from_millis(2500));
        assert_eq!(parse_at(Some(&json!("2.5s"))).unwrap(), Duration::from_millis(2500));
        assert_eq!(parse_at(Some(&json!("300ms"))).unwrap(), Duration::from_millis(300));
        assert_eq!(parse_at(Some(&json!("8"))).unwrap(), Duration::from_secs(8));
        assert_eq!(parse_at(None).unwrap(), Duration::ZERO);
        assert!(parse_at(Some(&json!("-1s"))).is_err());
        assert!(parse_at(Some(&json!("soon"))).is_err());
    }

    #[test]
    fn test_parse_wrapped_scenario() {
        let scenario = Scenario::from_value(json!({
            "scenario": {
                "name": "hotel",
                "environment": {
                    "noise_profile": "office",
                    "noise_snr_db": 20,
                    "network": { "latency_ms": 80, "jitter_ms": 10, "loss": 0.02 }
                },
                "tools": { "create_booking": { "failure_rate": 1.0 } },
                "timeline": [
                    { "at": "0s", "action": "user_speak", "audio": "I want to book a hotel",
                      "speech_style": { "speed": 1.2 } },
                    { "at": 3, "action": "assert_system", "expect": { "intent": "hotel_booking" } },
                    { "at": "8s", "action": "expect_tool_call", "tool": "check_availability",
                      "args_contain": { "checkin": "next_friday", "nights": 2 }, "timeout_ms": 5000 },
                    { "at": "9s", "action": "inject_noise", "type": "transient", "source": "dog_bark" },
                    { "at": "10s", "action": "barge_in", "pattern": "correction", "correction": "Saturday" }
                ]
            }
        }))
        .unwrap();

        assert_eq!(scenario.name, "hotel");
        assert_eq!(scenario.environment.noise_snr_db, Some(20.0));
        let net = scenario.environment.network.as_ref().unwrap().resolve().unwrap();
        assert_eq!(net.latency_ms, 80.0);
        assert_eq!(scenario.tools["create_booking"].failure_rate, Some(1.0));

        let kinds: Vec<ActionKind> = scenario.timeline.iter().map(|e| e.action.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                ActionKind::UserSpeak,
                ActionKind::AssertSystem,
                ActionKind::ExpectToolCall,
                ActionKind::InjectNoise,
                ActionKind::BargeIn,
            ]
        );
        match &scenario.timeline[2].action {
            Action::ExpectToolCall(expect) => {
                assert_eq!(expect.tool, "check_availability");
                assert_eq!(expect.args_contain["nights"], json!(2));
                assert_eq!(expect.timeout_ms, 5000);
            }
            other => panic!("unexpected {other:?}"),
        }
        match &scenario.timeline[4].action {
            Action::BargeIn(request) => {
                assert_eq!(request.pattern, BargeInPattern::Correction);
                assert_eq!(request.correction, "Saturday");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_action_rejected() {
        let err = Scenario::from_value(json!({
            "name": "bad",
            "timeline": [{ "at": 0, "action": "teleport" }]
        }))
        .unwrap_err();
        assert_eq!(err, HarnessError::UnknownAction("teleport".into()));
    }

    #[test]
    fn test_schema_errors() {
        assert!(matches!(
            Scenario::from_value(json!({ "timeline": [] })),
            Err(HarnessError::Schema(_))
        ));
        assert!(matches!(
            Scenario::from_value(json!({ "name": "x", "timeline": [{ "at": 0 }] })),
            Err(HarnessError::Schema(_))
        ));
        assert!(matches!(
            Scenario::from_value(json!({
                "name": "x",
                "timeline": [{ "action": "assert_system", "expect": { "intnet": "typo" } }]
            })),
            Err(HarnessError::Schema(_))
        ));
        assert!(matches!(
            Scenario::from_value(json!({
                "name": "x",
                "timeline": [{ "action": "conditional", "condition": "moon_phase" }]
            })),
            Err(HarnessError::Schema(_))
        ));
    }

    #[test]
    fn test_conditional_branches_parsed() {
        let scenario = Scenario::from_value(json!({
            "name": "branching",
            "timeline": [{
                "at": "4s",
                "action": "conditional",
                "condition": "tool_succeeded:create_booking",
                "branches": {
                    "true": [{ "at": "1s", "action": "assert_system", "expect": { "response_contains": "confirmed" } }],
                    "default": [{ "at": 0, "action": "wait", "duration_ms": 500 }]
                }
            }]
        }))
        .unwrap();

        let Action::Conditional(conditional) = &scenario.timeline[0].action else {
            panic!("expected conditional");
        };
        assert_eq!(conditional.condition, Condition::ToolSucceeded("create_booking".into()));
        assert_eq!(conditional.branches["true"][0].at, Duration::from_secs(1));
        assert_eq!(conditional.branches["default"][0].action, Action::Wait { duration_ms: 500 });
    }

    #[test]
    fn test_unknown_noise_kind_is_layer_error() {
        let err = Scenario::from_value(json!({
            "name": "x",
            "timeline": [{ "action": "inject_noise", "type": "earthquake", "source": "x" }]
        }))
        .unwrap_err();
        assert_eq!(err, HarnessError::Layer(LayerError::UnknownNoiseKind("earthquake".into())));
    }

    #[test]
    fn test_video_source_defaults_to_camera() {
        let scenario = Scenario::from_value(json!({
            "name": "video",
            "timeline": [{ "action": "inject_video", "duration_ms": 2000 }]
        }))
        .unwrap();
        let Action::InjectVideo(video) = &scenario.timeline[0].action else {
            panic!("expected video");
        };
        assert!(matches!(video.source, VideoSource::Camera { .. }));
        assert_eq!(video.duration, Duration::from_secs(2));
    }

    #[test]
    fn test_bundled_scenario_file_parses() {
        let scenario = Scenario::from_json(include_str!("../scenarios/hotel_booking_cafe.json")).unwrap();
        assert_eq!(scenario.name, "hotel_booking_cafe");
        assert_eq!(scenario.tools["check_availability"].latency_ms, Some((400, 1200)));
        assert_eq!(scenario.stub.as_ref().map(|s| s.turns.len()), Some(3));
        let network = scenario.environment.network.as_ref().unwrap().resolve().unwrap();
        assert_eq!(network, NetworkConfig::profile("poor_4g").unwrap());
        assert!(scenario
            .timeline
            .windows(2)
            .all(|pair| pair[0].at <= pair[1].at));
    }
}
