//! Barge-in (user interruption) simulator.
//!
//! Each pattern is a small trigger-driven state machine:
//!
//! ```text
//! Waiting --trigger--> Triggered --draw delay--> Delayed --sleep--> Emitted
//!    |
//!    +--trigger timeout--> (terminal, no event)
//! ```
//!
//! Patterns differ only in their trigger predicate, the human reaction
//! delay range, and whether the utterance is a genuine interruption.
//! Backchannels ("mm-hmm") repeat periodically and are explicitly marked
//! as non-interrupting.

use parley_env::{lock, HarnessContext, ResponseEvent, ResponseKind, ResponseStream, SystemState};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::audio::{AudioStreamSimulator, SpeechStyle};
use crate::error::LayerError;
use crate::layer::{SimulationLayer, RNG_STREAM_BARGE_IN};

pub const BACKCHANNEL_TEXTS: &[&str] = &["mm-hmm", "right", "OK", "yeah"];

/// Default time a pattern waits for its trigger before giving up.
pub const DEFAULT_TRIGGER_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BargeInPattern {
    /// Cut in as soon as the agent starts talking (or says a keyword)
    EagerInterrupt,
    /// Jump in to correct something the agent just said
    Correction,
    /// Agent has been talking too long
    Impatient,
    /// Acknowledgement tokens; not an interruption
    Backchannel,
}

impl BargeInPattern {
    pub fn name(&self) -> &'static str {
        match self {
            BargeInPattern::EagerInterrupt => "eager_interrupt",
            BargeInPattern::Correction => "correction",
            BargeInPattern::Impatient => "impatient",
            BargeInPattern::Backchannel => "backchannel",
        }
    }

    pub fn spec(&self) -> PatternSpec {
        match self {
            BargeInPattern::EagerInterrupt => PatternSpec {
                trigger: Trigger::SpeechOnset,
                delay_ms: (100, 300),
                utterance: "Sorry, wait",
                is_true_interrupt: true,
            },
            BargeInPattern::Correction => PatternSpec {
                trigger: Trigger::ResponseText,
                delay_ms: (200, 500),
                utterance: "No no, I meant {correction}",
                is_true_interrupt: true,
            },
            BargeInPattern::Impatient => PatternSpec {
                trigger: Trigger::SpeakingLongerThan(Duration::from_secs(5)),
                delay_ms: (0, 100),
                utterance: "OK OK I got it, just tell me {question}",
                is_true_interrupt: true,
            },
            BargeInPattern::Backchannel => PatternSpec {
                trigger: Trigger::Periodic {
                    min: Duration::from_secs(2),
                    max: Duration::from_secs(4),
                },
                delay_ms: (0, 0),
                utterance: "",
                is_true_interrupt: false,
            },
        }
    }
}

impl std::fmt::Display for BargeInPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for BargeInPattern {
    type Err = LayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "eager_interrupt" | "eager" => Ok(BargeInPattern::EagerInterrupt),
            "correction" => Ok(BargeInPattern::Correction),
            "impatient" => Ok(BargeInPattern::Impatient),
            "backchannel" => Ok(BargeInPattern::Backchannel),
            _ => Err(LayerError::UnknownBargeInPattern(s.to_string())),
        }
    }
}

/// When a pattern fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Agent starts speaking, or says the request keyword if one is set
    SpeechOnset,
    /// Agent emits reply text, containing the request keyword if one is set
    ResponseText,
    /// Agent has been speaking continuously for longer than this
    SpeakingLongerThan(Duration),
    /// Fires after a uniform draw from the range, regardless of the agent
    Periodic { min: Duration, max: Duration },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternSpec {
    pub trigger: Trigger,
    /// Human reaction delay range
    pub delay_ms: (u64, u64),
    /// Template; `{correction}` and `{question}` are substituted
    pub utterance: &'static str,
    pub is_true_interrupt: bool,
}

/// A `barge_in` request.
#[derive(Debug, Clone, PartialEq)]
pub struct BargeInRequest {
    pub pattern: BargeInPattern,
    pub keyword: Option<String>,
    pub correction: String,
    pub question: String,
    /// Replaces the pattern's utterance
    pub text: Option<String>,
    /// Number of events to emit (backchannels only)
    pub repeats: usize,
    pub trigger_timeout: Duration,
}

impl BargeInRequest {
    pub fn new(pattern: BargeInPattern) -> Self {
        Self {
            pattern,
            keyword: None,
            correction: String::new(),
            question: String::new(),
            text: None,
            repeats: 1,
            trigger_timeout: DEFAULT_TRIGGER_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BargeInPhase {
    Waiting,
    Triggered,
    Delayed,
    Emitted,
}

/// The user's interruption, ready for the microphone path.
#[derive(Debug, Clone, PartialEq)]
pub struct InterruptEvent {
    pub text: String,
    /// Mono PCM at the audio layer's sample rate
    pub audio: Vec<i16>,
    pub is_true_interrupt: bool,
    pub triggered_at: Duration,
    pub timestamp: Duration,
}

/// Produces interruption runs against a response stream.
pub struct BargeInSimulator<Ctx: HarnessContext> {
    ctx: Arc<Ctx>,
    audio: Arc<AudioStreamSimulator<Ctx>>,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl<Ctx: HarnessContext> BargeInSimulator<Ctx> {
    pub fn new(ctx: Arc<Ctx>, audio: Arc<AudioStreamSimulator<Ctx>>) -> Self {
        let rng = ctx.derive_rng(RNG_STREAM_BARGE_IN);
        Self {
            ctx,
            audio,
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    /// Starts a pattern. `initial` is the agent's state right now, since
    /// the stream only carries changes from this point on.
    pub fn start(&self, request: BargeInRequest, stream: ResponseStream, initial: SystemState) -> BargeInRun<Ctx> {
        let now = self.ctx.now();
        let spec = request.pattern.spec();
        tracing::debug!(pattern = %request.pattern, ?initial, "barge-in armed");
        BargeInRun {
            ctx: Arc::clone(&self.ctx),
            audio: Arc::clone(&self.audio),
            rng: Arc::clone(&self.rng),
            deadline: now + request.trigger_timeout,
            request,
            spec,
            stream,
            speaking_since: (initial == SystemState::Speaking).then_some(now),
            phase: BargeInPhase::Waiting,
            emitted: 0,
            done: false,
        }
    }
}

impl<Ctx: HarnessContext> SimulationLayer for BargeInSimulator<Ctx> {
    fn layer_name(&self) -> &'static str {
        "barge_in"
    }
}

enum Waited {
    Event(ResponseEvent),
    Elapsed,
    Closed,
}

/// One armed pattern; yields its interruption(s) then ends.
pub struct BargeInRun<Ctx: HarnessContext> {
    ctx: Arc<Ctx>,
    audio: Arc<AudioStreamSimulator<Ctx>>,
    rng: Arc<Mutex<ChaCha8Rng>>,
    request: BargeInRequest,
    spec: PatternSpec,
    stream: ResponseStream,
    deadline: Duration,
    speaking_since: Option<Duration>,
    phase: BargeInPhase,
    emitted: usize,
    done: bool,
}

impl<Ctx: HarnessContext> BargeInRun<Ctx> {
    pub fn phase(&self) -> BargeInPhase {
        self.phase
    }

    pub fn pattern(&self) -> BargeInPattern {
        self.request.pattern
    }

    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Drives the machine to its next emission; `None` once finished or
    /// when the trigger never fired.
    pub async fn next(&mut self) -> Option<InterruptEvent> {
        let limit = match self.spec.trigger {
            Trigger::Periodic { .. } => self.request.repeats.max(1),
            _ => 1,
        };
        if self.done || self.emitted >= limit {
            self.done = true;
            return None;
        }

        self.phase = BargeInPhase::Waiting;
        let Some(triggered_at) = self.wait_for_trigger().await else {
            tracing::debug!(pattern = %self.request.pattern, "barge-in trigger never fired");
            self.done = true;
            return None;
        };
        self.phase = BargeInPhase::Triggered;

        let (lo, hi) = self.spec.delay_ms;
        let delay = Duration::from_millis(lock(&self.rng).gen_range(lo..=hi));
        self.phase = BargeInPhase::Delayed;
        self.ctx.sleep(delay).await;

        let text = self.utterance();
        let style = SpeechStyle {
            interruption: self.spec.is_true_interrupt,
            ..SpeechStyle::default()
        };
        let audio = self.audio.synthesize(&text, &style);
        self.phase = BargeInPhase::Emitted;
        self.emitted += 1;

        let timestamp = self.ctx.now();
        tracing::debug!(
            pattern = %self.request.pattern,
            text = %text,
            reaction_ms = delay.as_millis() as u64,
            "barge-in emitted"
        );
        Some(InterruptEvent {
            text,
            audio,
            is_true_interrupt: self.spec.is_true_interrupt,
            triggered_at,
            timestamp,
        })
    }

    fn utterance(&self) -> String {
        if let Some(text) = &self.request.text {
            return text.clone();
        }
        if self.request.pattern == BargeInPattern::Backchannel {
            return BACKCHANNEL_TEXTS[self.emitted % BACKCHANNEL_TEXTS.len()].to_string();
        }
        self.spec
            .utterance
            .replace("{correction}", &self.request.correction)
            .replace("{question}", &self.request.question)
            .trim()
            .to_string()
    }

    async fn wait_for_trigger(&mut self) -> Option<Duration> {
        match self.spec.trigger {
            Trigger::Periodic { min, max } => {
                let wait = lock(&self.rng).gen_range(min..=max);
                self.ctx.sleep(wait).await;
                Some(self.ctx.now())
            }
            Trigger::SpeechOnset => {
                if self.request.keyword.is_none() && self.speaking_since.is_some() {
                    return Some(self.ctx.now());
                }
                loop {
                    match self.next_event(self.deadline).await {
                        Waited::Event(event) => {
                            self.track(&event);
                            if self.is_onset(&event) {
                                return Some(self.ctx.now());
                            }
                        }
                        Waited::Elapsed | Waited::Closed => return None,
                    }
                }
            }
            Trigger::ResponseText => loop {
                match self.next_event(self.deadline).await {
                    Waited::Event(event) => {
                        self.track(&event);
                        if let ResponseKind::Text(text) = &event.kind {
                            if self.keyword_matches(text) {
                                return Some(self.ctx.now());
                            }
                        }
                    }
                    Waited::Elapsed | Waited::Closed => return None,
                }
            },
            Trigger::SpeakingLongerThan(limit) => loop {
                let now = self.ctx.now();
                let wake = match self.speaking_since {
                    Some(since) if now >= since + limit => return Some(now),
                    Some(since) => (since + limit).min(self.deadline),
                    None => self.deadline,
                };
                if now >= self.deadline {
                    return None;
                }
                match self.next_event(wake).await {
                    Waited::Event(event) => self.track(&event),
                    Waited::Elapsed => {}
                    Waited::Closed => return None,
                }
            },
        }
    }

    async fn next_event(&mut self, until: Duration) -> Waited {
        tokio::select! {
            biased;
            event = self.stream.next() => match event {
                Some(event) => Waited::Event(event),
                None => Waited::Closed,
            },
            _ = self.ctx.sleep_until(until) => Waited::Elapsed,
        }
    }

    fn track(&mut self, event: &ResponseEvent) {
        match &event.kind {
            ResponseKind::StateChange(SystemState::Speaking) | ResponseKind::Audio(_) => {
                if self.speaking_since.is_none() {
                    self.speaking_since = Some(event.timestamp);
                }
            }
            ResponseKind::StateChange(_) => self.speaking_since = None,
            _ => {}
        }
    }

    fn is_onset(&self, event: &ResponseEvent) -> bool {
        match (&self.request.keyword, &event.kind) {
            (None, ResponseKind::StateChange(SystemState::Speaking)) | (None, ResponseKind::Audio(_)) => true,
            (Some(_), ResponseKind::Text(text)) => self.keyword_matches(text),
            _ => false,
        }
    }

    fn keyword_matches(&self, text: &str) -> bool {
        match &self.request.keyword {
            Some(keyword) => text.to_lowercase().contains(&keyword.to_lowercase()),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioConfig;
    use parley_env::TokioContext;
    use tokio::sync::broadcast;

    fn simulator(ctx: &Arc<TokioContext>) -> BargeInSimulator<TokioContext> {
        let audio = Arc::new(AudioStreamSimulator::new(Arc::clone(ctx), AudioConfig::default()));
        BargeInSimulator::new(Arc::clone(ctx), audio)
    }

    fn emit_at(tx: &broadcast::Sender<ResponseEvent>, at: Duration, kind: ResponseKind) {
        let tx = tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(at).await;
            let _ = tx.send(ResponseEvent::new(kind, at));
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_eager_interrupt_fires_after_speech_onset() {
        let ctx = Arc::new(TokioContext::with_seed(21));
        let (tx, rx) = broadcast::channel(64);
        emit_at(&tx, Duration::from_secs(1), ResponseKind::StateChange(SystemState::Speaking));

        let barge = simulator(&ctx);
        let mut run = barge.start(
            BargeInRequest::new(BargeInPattern::EagerInterrupt),
            ResponseStream::new(rx),
            SystemState::Listening,
        );
        assert_eq!(run.phase(), BargeInPhase::Waiting);

        let event = run.next().await.unwrap();
        assert_eq!(event.triggered_at, Duration::from_secs(1));
        assert!(event.timestamp >= Duration::from_millis(1100));
        assert!(event.timestamp <= Duration::from_millis(1300));
        assert!(event.is_true_interrupt);
        assert_eq!(event.text, "Sorry, wait");
        assert!(!event.audio.is_empty());
        assert_eq!(run.phase(), BargeInPhase::Emitted);

        assert!(run.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_timeout_ends_without_event() {
        let ctx = Arc::new(TokioContext::with_seed(2));
        let (_tx, rx) = broadcast::channel::<ResponseEvent>(8);
        let barge = simulator(&ctx);

        let mut request = BargeInRequest::new(BargeInPattern::Correction);
        request.trigger_timeout = Duration::from_secs(2);
        let mut run = barge.start(request, ResponseStream::new(rx), SystemState::Idle);

        assert!(run.next().await.is_none());
        assert_eq!(run.phase(), BargeInPhase::Waiting);
        assert_eq!(ctx.now(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_impatient_waits_for_long_response() {
        let ctx = Arc::new(TokioContext::with_seed(4));
        let (tx, rx) = broadcast::channel(64);
        emit_at(&tx, Duration::from_millis(500), ResponseKind::StateChange(SystemState::Speaking));
        emit_at(&tx, Duration::from_millis(700), ResponseKind::Audio(vec![0; 4]));

        let barge = simulator(&ctx);
        let mut request = BargeInRequest::new(BargeInPattern::Impatient);
        request.question = "the price".into();
        let mut run = barge.start(request, ResponseStream::new(rx), SystemState::Processing);

        let event = run.next().await.unwrap();
        assert_eq!(event.triggered_at, Duration::from_millis(5500));
        assert!(event.timestamp <= Duration::from_millis(5600));
        assert_eq!(event.text, "OK OK I got it, just tell me the price");
    }

    #[tokio::test(start_paused = true)]
    async fn test_speaking_reset_restarts_impatience() {
        let ctx = Arc::new(TokioContext::with_seed(4));
        let (tx, rx) = broadcast::channel(64);
        emit_at(&tx, Duration::from_secs(3), ResponseKind::StateChange(SystemState::Listening));
        emit_at(&tx, Duration::from_secs(4), ResponseKind::StateChange(SystemState::Speaking));

        let barge = simulator(&ctx);
        let mut run = barge.start(
            BargeInRequest::new(BargeInPattern::Impatient),
            ResponseStream::new(rx),
            SystemState::Speaking,
        );

        let event = run.next().await.unwrap();
        assert_eq!(event.triggered_at, Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_correction_matches_keyword() {
        let ctx = Arc::new(TokioContext::with_seed(5));
        let (tx, rx) = broadcast::channel(64);
        emit_at(&tx, Duration::from_secs(1), ResponseKind::Text("Booking for two guests".into()));
        emit_at(&tx, Duration::from_secs(2), ResponseKind::Text("Check-in on Thursday".into()));

        let barge = simulator(&ctx);
        let mut request = BargeInRequest::new(BargeInPattern::Correction);
        request.keyword = Some("thursday".into());
        request.correction = "Friday".into();
        let mut run = barge.start(request, ResponseStream::new(rx), SystemState::Speaking);

        let event = run.next().await.unwrap();
        assert_eq!(event.triggered_at, Duration::from_secs(2));
        assert_eq!(event.text, "No no, I meant Friday");
        let reaction = event.timestamp - event.triggered_at;
        assert!(reaction >= Duration::from_millis(200) && reaction <= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backchannel_repeats_without_interrupting() {
        let ctx = Arc::new(TokioContext::with_seed(6));
        let (_tx, rx) = broadcast::channel::<ResponseEvent>(8);
        let barge = simulator(&ctx);

        let mut request = BargeInRequest::new(BargeInPattern::Backchannel);
        request.repeats = 3;
        let mut run = barge.start(request, ResponseStream::new(rx), SystemState::Speaking);

        let mut texts = Vec::new();
        let mut last = Duration::ZERO;
        while let Some(event) = run.next().await {
            assert!(!event.is_true_interrupt);
            let gap = event.timestamp - last;
            assert!(gap >= Duration::from_secs(2) && gap <= Duration::from_secs(4));
            last = event.timestamp;
            texts.push(event.text);
        }
        assert_eq!(texts, vec!["mm-hmm", "right", "OK"]);
        assert_eq!(run.emitted(), 3);
    }

    #[test]
    fn test_unknown_pattern_rejected() {
        assert_eq!(
            "sneeze".parse::<BargeInPattern>(),
            Err(LayerError::UnknownBargeInPattern("sneeze".into()))
        );
        assert_eq!("backchannel".parse::<BargeInPattern>(), Ok(BargeInPattern::Backchannel));
    }
}
