//! Call orchestrator scenarios
//!
//! Every collaborator is scripted: completion replies and synthesized clips
//! come from queues, and both can be held back with a semaphore gate so a
//! test can observe the Thinking and Speaking states or end the call while
//! work is outstanding.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;

use phone_agent_agent::{CallHandle, CallOrchestrator, OrchestratorConfig, OrchestratorError};
use phone_agent_core::{
    AudioClip, AudioPlayer, CallSnapshot, CallState, CallStateCell, CompletionClient,
    CompletionError, ErrorKind, PlatformSignal, RecognitionBackend, RecognitionEvent,
    RecognitionFault, Speaker, SpeechError, SpeechSynthesizer, Turn, VoiceSynthesisConfig,
};
use phone_agent_pipeline::{AudioStore, CaptureChannel, CaptureEvent, CaptureSettings, SpeechOutput};

const WAIT: Duration = Duration::from_secs(2);

// ----------------------------------------------------------------------
// Scripted collaborators
// ----------------------------------------------------------------------

/// Counts remote calls that are running at the same time
#[derive(Default)]
struct FlightRecorder {
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FlightRecorder {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
struct CompletionCall {
    history: Vec<(Speaker, String)>,
    user_text: String,
    system_prompt: String,
}

struct ScriptedCompletion {
    replies: Mutex<VecDeque<Result<String, CompletionError>>>,
    calls: Mutex<Vec<CompletionCall>>,
    gate: Option<Arc<Semaphore>>,
    flights: Arc<FlightRecorder>,
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(
        &self,
        history: &[Turn],
        user_text: &str,
        system_prompt: &str,
    ) -> Result<String, CompletionError> {
        self.flights.enter();
        self.calls.lock().push(CompletionCall {
            history: history
                .iter()
                .map(|t| (t.speaker(), t.text().to_string()))
                .collect(),
            user_text: user_text.to_string(),
            system_prompt: system_prompt.to_string(),
        });
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok("Certainly.".to_string()));
        self.flights.exit();
        reply
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedSynth {
    failures: Mutex<VecDeque<SpeechError>>,
    calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    flights: Arc<FlightRecorder>,
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSynth {
    async fn synthesize(
        &self,
        _text: &str,
        _voice: &VoiceSynthesisConfig,
    ) -> Result<Vec<u8>, SpeechError> {
        self.flights.enter();
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        let result = match self.failures.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(short_wav()),
        };
        self.flights.exit();
        result
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

#[derive(Default)]
struct RecordingPlayer {
    plays: AtomicUsize,
}

#[async_trait]
impl AudioPlayer for RecordingPlayer {
    async fn play(&self, _clip: &AudioClip) -> Result<(), SpeechError> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingBackend {
    starts: AtomicUsize,
    stops: AtomicUsize,
    deny: Mutex<bool>,
}

impl RecognitionBackend for RecordingBackend {
    fn start(&self, _language: &str) -> Result<(), RecognitionFault> {
        if *self.deny.lock() {
            return Err(RecognitionFault::PermissionDenied("not-allowed".to_string()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

fn short_wav() -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut buf = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut buf, spec).unwrap();
        for _ in 0..80 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    buf.into_inner()
}

// ----------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------

#[derive(Default)]
struct Script {
    replies: Vec<Result<String, CompletionError>>,
    synth_failures: Vec<SpeechError>,
    gate_completion: bool,
    gate_synthesis: bool,
    completion_retries: u32,
    /// Feed recognition events straight to the orchestrator instead of
    /// going through the capture channel
    inject: bool,
}

struct Harness {
    handle: CallHandle,
    capture: Arc<CaptureChannel>,
    events: Option<mpsc::UnboundedSender<CaptureEvent>>,
    completion: Arc<ScriptedCompletion>,
    synth: Arc<ScriptedSynth>,
    player: Arc<RecordingPlayer>,
    backend: Arc<RecordingBackend>,
    speech: Arc<SpeechOutput>,
    flights: Arc<FlightRecorder>,
    completion_gate: Arc<Semaphore>,
    synth_gate: Arc<Semaphore>,
    next_seq: u64,
}

impl Harness {
    fn new(script: Script) -> Self {
        let flights = Arc::new(FlightRecorder::default());
        let completion_gate = Arc::new(Semaphore::new(0));
        let synth_gate = Arc::new(Semaphore::new(0));

        let completion = Arc::new(ScriptedCompletion {
            replies: Mutex::new(script.replies.into()),
            calls: Mutex::new(Vec::new()),
            gate: script.gate_completion.then(|| completion_gate.clone()),
            flights: flights.clone(),
        });
        let synth = Arc::new(ScriptedSynth {
            failures: Mutex::new(script.synth_failures.into()),
            calls: AtomicUsize::new(0),
            gate: script.gate_synthesis.then(|| synth_gate.clone()),
            flights: flights.clone(),
        });
        let player = Arc::new(RecordingPlayer::default());
        let backend = Arc::new(RecordingBackend::default());

        let speech = Arc::new(SpeechOutput::new(
            synth.clone(),
            player.clone(),
            Arc::new(AudioStore::new()),
            VoiceSynthesisConfig::default(),
        ));
        let (capture, capture_rx) = CaptureChannel::new(
            backend.clone(),
            CaptureSettings::default(),
            CallStateCell::new(),
        );

        let (events, rx) = if script.inject {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), rx)
        } else {
            (None, capture_rx)
        };

        let handle = CallOrchestrator::spawn(
            OrchestratorConfig {
                completion_retries: script.completion_retries,
            },
            capture.clone(),
            rx,
            completion.clone(),
            speech.clone(),
        );

        Self {
            handle,
            capture,
            events,
            completion,
            synth,
            player,
            backend,
            speech,
            flights,
            completion_gate,
            synth_gate,
            next_seq: 0,
        }
    }

    /// Deliver a recognition result the way the platform would
    fn say(&mut self, text: &str, is_final: bool) {
        match &self.events {
            Some(tx) => {
                self.next_seq += 1;
                tx.send(CaptureEvent::Recognition(RecognitionEvent {
                    text: text.to_string(),
                    is_final,
                    sequence_index: self.next_seq,
                }))
                .unwrap();
            }
            None => self.capture.handle_signal(PlatformSignal::Result {
                text: text.to_string(),
                is_final,
            }),
        }
    }

    /// Inject an event with an explicit sequence index
    fn inject(&self, event: CaptureEvent) {
        self.events
            .as_ref()
            .expect("harness built without injection")
            .send(event)
            .unwrap();
    }

    async fn wait_until(&self, pred: impl Fn(&CallSnapshot) -> bool) -> CallSnapshot {
        let mut rx = self.handle.subscribe();
        let snapshot = timeout(WAIT, rx.wait_for(|s| pred(s)))
            .await
            .expect("timed out waiting for call state")
            .expect("orchestrator stopped");
        snapshot.clone()
    }

    async fn wait_state(&self, state: CallState) -> CallSnapshot {
        self.wait_until(|s| s.state == state).await
    }

    /// Wait for a completed turn cycle with `turns` history entries
    async fn wait_turns(&self, turns: usize) -> CallSnapshot {
        self.wait_until(|s| {
            s.state == CallState::Listening
                && s.history.len() == turns
                && s.history.iter().all(|t| !t.is_pending())
        })
        .await
    }

    async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

// ----------------------------------------------------------------------
// Turn cycle
// ----------------------------------------------------------------------

/// A first utterance goes out as system prompt then user text, and the
/// reply shows up as exactly one pending assistant turn while speaking
#[tokio::test]
async fn test_first_turn_sends_prompt_and_utterance() {
    let mut h = Harness::new(Script {
        replies: vec![Ok("Good evening, sir.".to_string())],
        gate_synthesis: true,
        ..Default::default()
    });

    h.handle.start_call("You are a helpful butler").await.unwrap();
    assert_eq!(h.handle.snapshot().state, CallState::Listening);

    h.say("Hello", true);

    let speaking = h.wait_state(CallState::Speaking).await;
    assert_eq!(speaking.history.len(), 2);
    assert_eq!(speaking.history[0].speaker(), Speaker::User);
    assert_eq!(speaking.history[0].text(), "Hello");
    assert_eq!(speaking.history[1].speaker(), Speaker::Assistant);
    assert!(speaking.history[1].is_pending());

    let calls = h.completion.calls.lock().clone();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].history.is_empty());
    assert_eq!(calls[0].user_text, "Hello");
    assert_eq!(calls[0].system_prompt, "You are a helpful butler");

    h.synth_gate.add_permits(1);
    let done = h.wait_turns(2).await;
    assert!(done.history[1].audio_handle().is_some());
    assert!(done.last_error.is_none());
    assert_eq!(h.player.plays.load(Ordering::SeqCst), 1);
}

/// Capture is off while a turn is in flight and back on afterwards
#[tokio::test]
async fn test_capture_disarmed_during_turn() {
    let mut h = Harness::new(Script {
        gate_completion: true,
        ..Default::default()
    });

    h.handle.start_call("").await.unwrap();
    assert!(h.capture.is_armed());
    assert_eq!(h.backend.starts.load(Ordering::SeqCst), 1);

    h.say("Hello", true);
    h.wait_state(CallState::Thinking).await;
    assert!(!h.capture.is_armed());
    assert_eq!(h.capture.call_state().load(), CallState::Thinking);

    h.completion_gate.add_permits(1);
    h.wait_turns(2).await;
    assert!(h.capture.is_armed());
    assert_eq!(h.backend.starts.load(Ordering::SeqCst), 2);
    assert_eq!(h.capture.call_state().load(), CallState::Listening);
}

#[tokio::test]
async fn test_completion_failure_returns_to_listening() {
    let mut h = Harness::new(Script {
        replies: vec![Err(CompletionError::Network("connection refused".to_string()))],
        ..Default::default()
    });

    h.handle.start_call("You are a helpful butler").await.unwrap();
    h.say("Hello", true);

    let snapshot = h
        .wait_until(|s| s.state == CallState::Listening && s.last_error.is_some())
        .await;
    assert_eq!(snapshot.history.len(), 1);
    assert_eq!(snapshot.history[0].speaker(), Speaker::User);
    assert_eq!(
        snapshot.last_error.map(|e| e.kind),
        Some(ErrorKind::NetworkError)
    );
    assert_eq!(h.synth.calls.load(Ordering::SeqCst), 0);
    assert!(h.capture.is_armed());
}

#[tokio::test]
async fn test_upstream_failure_kind_is_reported() {
    let mut h = Harness::new(Script {
        replies: vec![Err(CompletionError::Upstream("HTTP 401".to_string()))],
        ..Default::default()
    });

    h.handle.start_call("").await.unwrap();
    h.say("Hello", true);

    let snapshot = h.wait_until(|s| s.last_error.is_some()).await;
    assert_eq!(
        snapshot.last_error.map(|e| e.kind),
        Some(ErrorKind::UpstreamError)
    );
}

#[tokio::test]
async fn test_completion_retry_when_configured() {
    let mut h = Harness::new(Script {
        replies: vec![
            Err(CompletionError::Network("timeout".to_string())),
            Ok("Second time lucky".to_string()),
        ],
        completion_retries: 1,
        ..Default::default()
    });

    h.handle.start_call("").await.unwrap();
    h.say("Hello", true);

    let snapshot = h.wait_turns(2).await;
    assert_eq!(snapshot.history[1].text(), "Second time lucky");
    assert!(snapshot.last_error.is_none());
    assert_eq!(h.completion.calls.lock().len(), 2);
}

#[tokio::test]
async fn test_synthesis_failure_completes_turn_without_audio() {
    let mut h = Harness::new(Script {
        synth_failures: vec![SpeechError::Synthesis("g2p failed".to_string())],
        ..Default::default()
    });

    h.handle.start_call("").await.unwrap();
    h.say("Hello", true);

    let snapshot = h.wait_turns(2).await;
    let reply = &snapshot.history[1];
    assert_eq!(reply.speaker(), Speaker::Assistant);
    assert!(!reply.is_pending());
    assert!(reply.audio_handle().is_none());
    assert_eq!(
        snapshot.last_error.map(|e| e.kind),
        Some(ErrorKind::SynthesisError)
    );
    assert_eq!(h.player.plays.load(Ordering::SeqCst), 0);
    assert!(h.capture.is_armed());
}

#[tokio::test]
async fn test_empty_final_is_ignored() {
    let mut h = Harness::new(Script::default());

    h.handle.start_call("").await.unwrap();
    h.say("   ", true);
    h.settle().await;

    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.state, CallState::Listening);
    assert!(snapshot.history.is_empty());
    assert!(h.completion.calls.lock().is_empty());
}

#[tokio::test]
async fn test_interim_results_update_transcript_only() {
    let mut h = Harness::new(Script {
        gate_completion: true,
        ..Default::default()
    });

    h.handle.start_call("").await.unwrap();
    h.say("Hel", false);
    let snapshot = h.wait_until(|s| s.transcript == "Hel").await;
    assert!(snapshot.history.is_empty());
    assert_eq!(snapshot.state, CallState::Listening);

    h.say("Hello", true);
    let thinking = h.wait_state(CallState::Thinking).await;
    assert!(thinking.transcript.is_empty());
}

// ----------------------------------------------------------------------
// Single flight and stale events
// ----------------------------------------------------------------------

/// A final arriving mid-turn is dropped and leaves history untouched
#[tokio::test]
async fn test_final_during_turn_is_dropped() {
    let mut h = Harness::new(Script {
        gate_completion: true,
        inject: true,
        ..Default::default()
    });

    h.handle.start_call("").await.unwrap();
    h.say("Hello", true);
    let thinking = h.wait_state(CallState::Thinking).await;
    assert_eq!(thinking.history.len(), 1);

    h.say("Hello again", true);
    h.settle().await;
    assert_eq!(h.handle.snapshot().history.len(), 1);

    h.completion_gate.add_permits(1);
    let done = h.wait_turns(2).await;
    assert_eq!(done.history[0].text(), "Hello");
    assert_eq!(h.completion.calls.lock().len(), 1);
}

#[tokio::test]
async fn test_duplicate_sequence_index_is_dropped() {
    let mut h = Harness::new(Script {
        inject: true,
        ..Default::default()
    });

    h.handle.start_call("").await.unwrap();
    h.say("Hello", true);
    h.wait_turns(2).await;

    // Same index as the final that started the turn
    h.inject(CaptureEvent::Recognition(RecognitionEvent {
        text: "Hello".to_string(),
        is_final: true,
        sequence_index: 1,
    }));
    h.settle().await;

    assert_eq!(h.handle.snapshot().history.len(), 2);
    assert_eq!(h.completion.calls.lock().len(), 1);
}

/// Bursts of finals never produce overlapping remote calls
#[tokio::test]
async fn test_remote_calls_never_overlap() {
    let mut h = Harness::new(Script {
        gate_completion: true,
        inject: true,
        ..Default::default()
    });

    h.handle.start_call("").await.unwrap();
    for round in 0..3 {
        for i in 0..4 {
            h.say(&format!("utterance {} {}", round, i), true);
        }
        h.wait_until(|s| s.state == CallState::Thinking && s.history.len() == 2 * round + 1)
            .await;
        h.settle().await;
        h.completion_gate.add_permits(1);
        h.wait_turns(2 * (round + 1)).await;
    }
    h.settle().await;

    assert_eq!(h.flights.max_active.load(Ordering::SeqCst), 1);
    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.history.len(), 6);
    for pair in snapshot.history.chunks(2) {
        assert_eq!(pair[0].speaker(), Speaker::User);
        assert_eq!(pair[1].speaker(), Speaker::Assistant);
    }
}

// ----------------------------------------------------------------------
// End call
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_round_trip_ends_idle_with_two_turns() {
    let mut h = Harness::new(Script::default());

    h.handle.start_call("You are a helpful butler").await.unwrap();
    h.say("Hello", true);
    h.wait_turns(2).await;

    let record = h.handle.end_call().await.unwrap().expect("call was active");
    assert_eq!(record.history.len(), 2);
    assert_eq!(record.history[0].speaker(), Speaker::User);
    assert_eq!(record.history[1].speaker(), Speaker::Assistant);

    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.state, CallState::Idle);
    assert!(snapshot.history.is_empty());
    assert!(!h.capture.is_armed());
    assert!(h.speech.store().is_empty());
}

/// Every clip a call produced, replays included, goes with the call
#[tokio::test]
async fn test_end_call_releases_call_audio() {
    let mut h = Harness::new(Script::default());

    h.handle.start_call("").await.unwrap();
    h.say("Hello", true);
    h.wait_turns(2).await;
    h.say("Again", true);
    let snapshot = h.wait_turns(4).await;
    assert_eq!(h.speech.store().len(), 2);

    let first = snapshot.history[1].audio_handle().unwrap();
    assert!(h.speech.store().invalidate(first));
    timeout(WAIT, h.handle.request_replay(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(h.speech.store().len(), 2);

    h.handle.end_call().await.unwrap().expect("call was active");
    assert!(h.speech.store().is_empty());
}

#[tokio::test]
async fn test_end_call_without_call() {
    let h = Harness::new(Script::default());
    assert!(h.handle.end_call().await.unwrap().is_none());
}

/// A completion that resolves after end-call never touches the reset session
#[tokio::test]
async fn test_late_completion_after_end_is_discarded() {
    let mut h = Harness::new(Script {
        gate_completion: true,
        ..Default::default()
    });

    h.handle.start_call("").await.unwrap();
    h.say("Hello", true);
    h.wait_state(CallState::Thinking).await;

    let record = h.handle.end_call().await.unwrap().expect("call was active");
    assert_eq!(record.history.len(), 1);

    h.completion_gate.add_permits(1);
    h.settle().await;

    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.state, CallState::Idle);
    assert!(snapshot.history.is_empty());
    assert_eq!(h.synth.calls.load(Ordering::SeqCst), 0);
    assert!(!h.capture.is_armed());
}

/// Speech finishing after the call was replaced leaves the new call alone
#[tokio::test]
async fn test_late_speech_does_not_touch_new_call() {
    let mut h = Harness::new(Script {
        gate_synthesis: true,
        ..Default::default()
    });

    h.handle.start_call("first").await.unwrap();
    h.say("Hello", true);
    h.wait_state(CallState::Speaking).await;

    h.handle.end_call().await.unwrap();
    h.handle.start_call("second").await.unwrap();

    h.synth_gate.add_permits(1);
    h.settle().await;

    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.state, CallState::Listening);
    assert!(snapshot.history.is_empty());
    assert!(snapshot.last_error.is_none());
    // The orphaned clip is not kept around
    assert!(h.speech.store().is_empty());
}

#[tokio::test]
async fn test_start_call_replaces_active_call() {
    let mut h = Harness::new(Script::default());

    h.handle.start_call("first").await.unwrap();
    h.say("Hello", true);
    h.wait_turns(2).await;

    h.handle.start_call("second").await.unwrap();
    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.state, CallState::Listening);
    assert!(snapshot.history.is_empty());

    h.say("Again", true);
    h.wait_turns(2).await;
    let calls = h.completion.calls.lock().clone();
    assert_eq!(calls.last().map(|c| c.system_prompt.as_str()), Some("second"));
}

// ----------------------------------------------------------------------
// Replay
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_replay_reuses_existing_audio() {
    let mut h = Harness::new(Script::default());

    h.handle.start_call("").await.unwrap();
    h.say("Hello", true);
    h.wait_turns(2).await;
    assert_eq!(h.synth.calls.load(Ordering::SeqCst), 1);

    timeout(WAIT, h.handle.request_replay(1))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(h.synth.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.player.plays.load(Ordering::SeqCst), 2);
    assert_eq!(h.handle.snapshot().state, CallState::Listening);
}

#[tokio::test]
async fn test_replay_resynthesizes_missing_audio_once() {
    let mut h = Harness::new(Script::default());

    h.handle.start_call("").await.unwrap();
    h.say("Hello", true);
    let snapshot = h.wait_turns(2).await;

    let handle = snapshot.history[1].audio_handle().unwrap();
    assert!(h.speech.store().invalidate(handle));

    timeout(WAIT, h.handle.request_replay(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(h.synth.calls.load(Ordering::SeqCst), 2);

    // The replacement clip is remembered
    timeout(WAIT, h.handle.request_replay(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(h.synth.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.player.plays.load(Ordering::SeqCst), 3);

    // History itself is untouched
    let after = h.handle.snapshot();
    assert_eq!(after.history.len(), 2);
    assert_eq!(after.history[1].audio_handle(), Some(handle));
}

#[tokio::test]
async fn test_replay_after_failed_synthesis() {
    let mut h = Harness::new(Script {
        synth_failures: vec![SpeechError::Synthesis("busy".to_string())],
        ..Default::default()
    });

    h.handle.start_call("").await.unwrap();
    h.say("Hello", true);
    let snapshot = h.wait_turns(2).await;
    assert!(snapshot.history[1].audio_handle().is_none());

    timeout(WAIT, h.handle.request_replay(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(h.synth.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.player.plays.load(Ordering::SeqCst), 1);
    assert_eq!(h.handle.snapshot().state, CallState::Listening);
}

#[tokio::test]
async fn test_replay_rejections() {
    let mut h = Harness::new(Script::default());

    assert_eq!(
        h.handle.request_replay(0).await,
        Err(OrchestratorError::NoActiveCall)
    );

    h.handle.start_call("").await.unwrap();
    h.say("Hello", true);
    h.wait_turns(2).await;

    assert_eq!(
        h.handle.request_replay(0).await,
        Err(OrchestratorError::NotReplayable(0))
    );
    assert_eq!(
        h.handle.request_replay(5).await,
        Err(OrchestratorError::TurnIndexOutOfRange { index: 5, len: 2 })
    );
}

#[tokio::test]
async fn test_replay_during_turn_keeps_state() {
    let mut h = Harness::new(Script {
        gate_completion: true,
        ..Default::default()
    });

    h.handle.start_call("").await.unwrap();
    h.say("Hello", true);
    h.completion_gate.add_permits(1);
    h.wait_turns(2).await;

    h.say("Next", true);
    h.wait_state(CallState::Thinking).await;

    timeout(WAIT, h.handle.request_replay(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(h.handle.snapshot().state, CallState::Thinking);
    assert_eq!(h.handle.snapshot().history.len(), 3);

    h.completion_gate.add_permits(1);
    h.wait_turns(4).await;
}

// ----------------------------------------------------------------------
// Capture faults
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_permission_denied_blocks_capture() {
    let mut h = Harness::new(Script {
        gate_completion: true,
        inject: true,
        ..Default::default()
    });

    h.handle.start_call("").await.unwrap();
    h.say("Hello", true);
    h.wait_state(CallState::Thinking).await;

    // The platform revokes the microphone mid-turn
    h.inject(CaptureEvent::Fatal(RecognitionFault::PermissionDenied(
        "not-allowed".to_string(),
    )));
    let snapshot = h.wait_until(|s| s.last_error.is_some()).await;
    assert_eq!(
        snapshot.last_error.map(|e| e.kind),
        Some(ErrorKind::PermissionDenied)
    );

    let starts = h.backend.starts.load(Ordering::SeqCst);
    h.completion_gate.add_permits(1);
    let done = h
        .wait_until(|s| s.state == CallState::Listening && s.history.len() == 2)
        .await;

    // The in-flight turn finished but capture stayed off
    assert!(!done.history[1].is_pending());
    assert!(!h.capture.is_armed());
    assert_eq!(h.backend.starts.load(Ordering::SeqCst), starts);
}

#[tokio::test]
async fn test_permission_denied_at_start() {
    let h = Harness::new(Script::default());
    *h.backend.deny.lock() = true;

    h.handle.start_call("").await.unwrap();
    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.state, CallState::Listening);
    assert_eq!(
        snapshot.last_error.map(|e| e.kind),
        Some(ErrorKind::PermissionDenied)
    );
    assert!(!h.capture.is_armed());
}

#[tokio::test]
async fn test_new_call_clears_last_error() {
    let mut h = Harness::new(Script {
        replies: vec![Err(CompletionError::Network("down".to_string()))],
        ..Default::default()
    });

    h.handle.start_call("").await.unwrap();
    h.say("Hello", true);
    h.wait_until(|s| s.last_error.is_some()).await;

    h.handle.end_call().await.unwrap();
    h.handle.start_call("").await.unwrap();
    assert!(h.handle.snapshot().last_error.is_none());
}

/// Auto-restart after a spontaneous end keeps listening between turns
#[tokio::test]
async fn test_spontaneous_end_restarts_only_while_listening() {
    let mut h = Harness::new(Script {
        gate_completion: true,
        ..Default::default()
    });

    h.handle.start_call("").await.unwrap();
    h.capture.handle_signal(PlatformSignal::End);
    assert_eq!(h.backend.starts.load(Ordering::SeqCst), 2);

    h.say("Hello", true);
    h.wait_state(CallState::Thinking).await;
    h.capture.handle_signal(PlatformSignal::End);
    assert_eq!(h.backend.starts.load(Ordering::SeqCst), 2);

    h.completion_gate.add_permits(1);
    h.wait_turns(2).await;
}
