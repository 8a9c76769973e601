//! Scripted stand-in for a realtime voice agent.
//!
//! `ScriptedSystem` follows a fixed per-turn script instead of running any
//! speech recognition. It is what the built-in scenarios and the CLI run
//! against, and it is small enough to reason about in tests:
//!
//! ```text
//! commit_audio
//!   -> Processing --think_ms--> Intent
//!   -> ToolCalling (ToolCall, ToolResult, optional retries)
//!   -> Text(reply) -> Speaking (Audio every 200 ms for speak_ms)
//!   -> Listening
//! ```
//!
//! Sustained user speech while `Speaking` stops the reply after a short
//! reaction delay when the script allows interruptions.

use async_trait::async_trait;
use parley_env::{
    lock, AudioChunk, EnvError, HarnessContext, ResponseEvent, ResponseKind, ResponseStream, SystemState, ToolArgs,
    ToolErrorKind, ToolInvoker, ToolResult, VideoFrame, VoiceSystem,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Interval between reply audio events.
const AUDIO_BLOCK: Duration = Duration::from_millis(200);
/// Chunks quieter than this are not treated as user speech.
const VOICED_RMS: f64 = 100.0;
const EVENT_CAPACITY: usize = 1024;

/// A tool call the agent makes during a turn.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptedToolCall {
    pub name: String,
    #[serde(default)]
    pub args: ToolArgs,
}

/// What the agent does in response to one committed user turn.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TurnScript {
    pub intent: Option<String>,
    pub reply: Option<String>,
    /// Spoken instead of `reply` when the tool call ultimately failed
    pub failure_reply: Option<String>,
    pub tool_call: Option<ScriptedToolCall>,
    /// Extra attempts after a failed tool call
    pub retry_on_failure: u32,
    pub think_ms: u64,
    pub speak_ms: u64,
}

impl Default for TurnScript {
    fn default() -> Self {
        Self {
            intent: None,
            reply: None,
            failure_reply: None,
            tool_call: None,
            retry_on_failure: 0,
            think_ms: 400,
            speak_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StubScript {
    pub turns: Vec<TurnScript>,
    pub stop_on_interrupt: bool,
    pub interrupt_reaction_ms: u64,
    /// Voiced audio needed while speaking before the agent yields
    pub min_barge_in_ms: u64,
}

impl Default for StubScript {
    fn default() -> Self {
        Self {
            turns: Vec::new(),
            stop_on_interrupt: true,
            interrupt_reaction_ms: 150,
            min_barge_in_ms: 600,
        }
    }
}

struct StubState {
    state: SystemState,
    turn_index: usize,
    /// Bumped whenever in-flight work must stop (new turn, interruption)
    generation: u64,
    barge_in_voiced: Duration,
    audio_chunks: usize,
    video_frames: usize,
    commits: usize,
    interruptions: usize,
}

struct Shared<Ctx: HarnessContext> {
    ctx: Arc<Ctx>,
    script: StubScript,
    state: Mutex<StubState>,
    tools: Mutex<BTreeMap<String, Arc<dyn ToolInvoker>>>,
    events: broadcast::Sender<ResponseEvent>,
}

impl<Ctx: HarnessContext> Shared<Ctx> {
    fn emit(&self, kind: ResponseKind) {
        // No subscribers is fine
        let _ = self.events.send(ResponseEvent::new(kind, self.ctx.now()));
    }

    fn is_current(&self, generation: u64) -> bool {
        lock(&self.state).generation == generation
    }

    /// Changes state if `generation` is still current.
    fn transition(&self, generation: u64, next: SystemState) -> bool {
        {
            let mut state = lock(&self.state);
            if state.generation != generation {
                return false;
            }
            if state.state == next {
                return true;
            }
            state.state = next;
        }
        self.emit(ResponseKind::StateChange(next));
        true
    }

    async fn call_tool(&self, call: &ScriptedToolCall) -> ToolResult {
        self.emit(ResponseKind::ToolCall {
            name: call.name.clone(),
            args: call.args.clone(),
        });
        let handler = lock(&self.tools).get(&call.name).cloned();
        let result = match handler {
            Some(handler) => handler.invoke(&call.name, call.args.clone()).await,
            None => ToolResult::failure(
                ToolErrorKind::UnknownTool,
                format!("no handler for {}", call.name),
                Duration::ZERO,
            ),
        };
        self.emit(ResponseKind::ToolResult {
            name: call.name.clone(),
            result: result.clone(),
        });
        result
    }

    async fn run_turn(self: Arc<Self>, generation: u64, turn: TurnScript) {
        if !self.transition(generation, SystemState::Processing) {
            return;
        }
        self.ctx.sleep(Duration::from_millis(turn.think_ms)).await;
        if !self.is_current(generation) {
            return;
        }
        if let Some(intent) = &turn.intent {
            self.emit(ResponseKind::Intent(intent.clone()));
        }

        let mut succeeded = true;
        if let Some(call) = &turn.tool_call {
            if !self.transition(generation, SystemState::ToolCalling) {
                return;
            }
            for attempt in 0..=turn.retry_on_failure {
                let result = self.call_tool(call).await;
                succeeded = result.success;
                if succeeded || !self.is_current(generation) {
                    break;
                }
                tracing::debug!(tool = %call.name, attempt, "scripted agent retrying tool");
            }
        }

        let reply = if succeeded {
            turn.reply.clone()
        } else {
            turn.failure_reply.clone().or_else(|| turn.reply.clone())
        };
        if !self.is_current(generation) {
            return;
        }
        if let Some(text) = reply {
            self.emit(ResponseKind::Text(text));
        }

        if !self.transition(generation, SystemState::Speaking) {
            return;
        }
        let blocks = turn.speak_ms.div_ceil(AUDIO_BLOCK.as_millis() as u64).max(1);
        let block_bytes = (AUDIO_BLOCK.as_millis() as usize) * 16 * 2;
        for _ in 0..blocks {
            if !self.is_current(generation) {
                return;
            }
            self.emit(ResponseKind::Audio(vec![0u8; block_bytes]));
            self.ctx.sleep(AUDIO_BLOCK).await;
        }
        self.transition(generation, SystemState::Listening);
    }

    async fn stop_speaking(self: Arc<Self>, generation: u64) {
        self.ctx
            .sleep(Duration::from_millis(self.script.interrupt_reaction_ms))
            .await;
        if self.transition(generation, SystemState::Listening) {
            tracing::debug!("scripted agent yielded to the user");
        }
    }
}

/// A `VoiceSystem` driven by a [`StubScript`].
pub struct ScriptedSystem<Ctx: HarnessContext> {
    shared: Arc<Shared<Ctx>>,
}

impl<Ctx: HarnessContext> ScriptedSystem<Ctx> {
    pub fn new(ctx: Arc<Ctx>, script: StubScript) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                ctx,
                script,
                state: Mutex::new(StubState {
                    state: SystemState::Idle,
                    turn_index: 0,
                    generation: 0,
                    barge_in_voiced: Duration::ZERO,
                    audio_chunks: 0,
                    video_frames: 0,
                    commits: 0,
                    interruptions: 0,
                }),
                tools: Mutex::new(BTreeMap::new()),
                events,
            }),
        }
    }

    /// Number of audio chunks received so far.
    pub fn audio_chunks(&self) -> usize {
        lock(&self.shared.state).audio_chunks
    }

    pub fn video_frames(&self) -> usize {
        lock(&self.shared.state).video_frames
    }

    pub fn commits(&self) -> usize {
        lock(&self.shared.state).commits
    }

    /// Times the agent stopped speaking because the user talked over it.
    pub fn interruptions(&self) -> usize {
        lock(&self.shared.state).interruptions
    }

    pub fn registered_tools(&self) -> Vec<String> {
        lock(&self.shared.tools).keys().cloned().collect()
    }
}

#[async_trait]
impl<Ctx: HarnessContext> VoiceSystem for ScriptedSystem<Ctx> {
    async fn push_audio(&self, chunk: AudioChunk) -> Result<(), EnvError> {
        let voiced = chunk.rms() > VOICED_RMS;
        let interrupt = {
            let mut state = lock(&self.shared.state);
            state.audio_chunks += 1;
            match state.state {
                SystemState::Speaking if voiced && self.shared.script.stop_on_interrupt => {
                    state.barge_in_voiced += chunk.duration();
                    if state.barge_in_voiced >= Duration::from_millis(self.shared.script.min_barge_in_ms) {
                        state.barge_in_voiced = Duration::ZERO;
                        state.generation += 1;
                        state.interruptions += 1;
                        Some(state.generation)
                    } else {
                        None
                    }
                }
                SystemState::Speaking => None,
                _ => {
                    state.barge_in_voiced = Duration::ZERO;
                    None
                }
            }
        };
        if let Some(generation) = interrupt {
            tracing::debug!("scripted agent interrupted");
            let shared = Arc::clone(&self.shared);
            self.shared.ctx.spawn("stub-interrupt", shared.stop_speaking(generation));
        }
        Ok(())
    }

    async fn push_video(&self, _frame: VideoFrame) -> Result<(), EnvError> {
        lock(&self.shared.state).video_frames += 1;
        Ok(())
    }

    async fn commit_audio(&self) -> Result<(), EnvError> {
        let (generation, turn) = {
            let mut state = lock(&self.shared.state);
            state.commits += 1;
            state.generation += 1;
            state.barge_in_voiced = Duration::ZERO;
            let turn = self.shared.script.turns.get(state.turn_index).cloned();
            state.turn_index += 1;
            (state.generation, turn)
        };
        match turn {
            Some(turn) => {
                let shared = Arc::clone(&self.shared);
                self.shared.ctx.spawn("stub-turn", shared.run_turn(generation, turn));
            }
            None => {
                tracing::debug!("scripted agent has no turn left, listening");
                self.shared.transition(generation, SystemState::Listening);
            }
        }
        Ok(())
    }

    fn get_response_stream(&self) -> ResponseStream {
        ResponseStream::new(self.shared.events.subscribe())
    }

    fn register_tool_handler(&self, name: &str, handler: Arc<dyn ToolInvoker>) {
        lock(&self.shared.tools).insert(name.to_string(), handler);
    }

    fn state(&self) -> SystemState {
        lock(&self.shared.state).state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SimContext;
    use parley_core::{register_hotel_booking_mocks, MockToolRegistry};
    use serde_json::json;

    fn loud_chunk(at: Duration) -> AudioChunk {
        AudioChunk::from_samples(&[8000i16; 320], at, 16000, 1)
    }

    fn booking_script() -> StubScript {
        serde_json::from_value(json!({
            "turns": [
                { "intent": "hotel_booking", "reply": "Sure, when?", "speak_ms": 1000 },
                {
                    "tool_call": { "name": "check_availability", "args": { "nights": 2 } },
                    "reply": "We have rooms",
                    "think_ms": 300
                }
            ]
        }))
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_turns_follow_script() {
        let ctx = SimContext::shared(7);
        let system = ScriptedSystem::new(Arc::clone(&ctx), booking_script());
        let registry = Arc::new(MockToolRegistry::new(Arc::clone(&ctx)));
        register_hotel_booking_mocks(&registry);
        system.register_tool_handler("check_availability", registry.clone());

        let mut stream = system.get_response_stream();
        system.commit_audio().await.unwrap();

        let mut kinds = Vec::new();
        while let Some(event) = stream.next().await {
            let done = event.kind == ResponseKind::StateChange(SystemState::Listening);
            kinds.push(event);
            if done {
                break;
            }
        }
        assert_eq!(kinds[0].kind, ResponseKind::StateChange(SystemState::Processing));
        assert_eq!(kinds[1].kind, ResponseKind::Intent("hotel_booking".into()));
        assert_eq!(kinds[1].timestamp, Duration::from_millis(400));
        assert_eq!(kinds[2].kind, ResponseKind::Text("Sure, when?".into()));
        assert_eq!(kinds[3].kind, ResponseKind::StateChange(SystemState::Speaking));
        let audio = kinds.iter().filter(|e| matches!(e.kind, ResponseKind::Audio(_))).count();
        assert_eq!(audio, 5);
        assert_eq!(kinds.last().unwrap().timestamp, Duration::from_millis(1400));

        system.commit_audio().await.unwrap();
        let mut saw_result = false;
        while let Some(event) = stream.next().await {
            if let ResponseKind::ToolResult { name, result } = &event.kind {
                assert_eq!(name, "check_availability");
                assert!(result.success);
                saw_result = true;
            }
            if event.kind == ResponseKind::StateChange(SystemState::Listening) {
                break;
            }
        }
        assert!(saw_result);
        assert_eq!(registry.called_times("check_availability"), 1);
        assert_eq!(registry.calls()[0].invoked_at, Duration::from_millis(1700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_speech_interrupts_reply() {
        let ctx = SimContext::shared(7);
        let system = ScriptedSystem::new(
            Arc::clone(&ctx),
            serde_json::from_value(json!({ "turns": [{ "reply": "A very long answer", "speak_ms": 10000 }] })).unwrap(),
        );
        system.commit_audio().await.unwrap();
        ctx.sleep(Duration::from_secs(1)).await;
        assert_eq!(system.state(), SystemState::Speaking);

        // 400 ms of speech is not enough
        for _ in 0..20 {
            system.push_audio(loud_chunk(ctx.now())).await.unwrap();
            ctx.sleep(Duration::from_millis(20)).await;
        }
        ctx.sleep(Duration::from_millis(300)).await;
        assert_eq!(system.state(), SystemState::Speaking);

        for _ in 0..15 {
            system.push_audio(loud_chunk(ctx.now())).await.unwrap();
            ctx.sleep(Duration::from_millis(20)).await;
        }
        ctx.sleep(Duration::from_millis(200)).await;
        assert_eq!(system.state(), SystemState::Listening);
        assert_eq!(system.interruptions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_turn_goes_back_to_listening() {
        let ctx = SimContext::shared(7);
        let system = ScriptedSystem::new(ctx, StubScript::default());
        system.commit_audio().await.unwrap();
        assert_eq!(system.state(), SystemState::Listening);
        assert_eq!(system.commits(), 1);
    }
}
