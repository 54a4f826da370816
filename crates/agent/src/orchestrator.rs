//! Call orchestrator
//!
//! A single actor task owns the [`CallSession`] and applies every
//! transition, so no two transitions ever run concurrently. Remote work
//! (completion, synthesis, playback) runs in spawned tasks that post their
//! outcome back tagged with the epoch of the call that issued them. An
//! outcome whose epoch no longer matches the active call is discarded.
//!
//! ```text
//! Idle ──start──▶ Listening ──final──▶ Thinking ──ok──▶ Speaking ──done──▶ Listening
//!                     ▲                   │ err                              │
//!                     └───────────────────┴──────────────────────────────────┘
//! any ──end──▶ Idle
//! ```

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

use phone_agent_config::CallConfig;
use phone_agent_core::{
    AudioHandle, CallRecord, CallSnapshot, CallState, CompletionClient, CompletionError,
    ErrorInfo, RecognitionEvent, RecognitionFault, Speaker, SpeechError, Turn,
};
use phone_agent_pipeline::{CaptureChannel, CaptureEvent, SpeechOutput};

use crate::OrchestratorError;

const COMMAND_BUFFER: usize = 32;

/// Orchestrator configuration
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    /// Extra completion attempts for the same utterance before giving up
    pub completion_retries: u32,
}

impl From<&CallConfig> for OrchestratorConfig {
    fn from(config: &CallConfig) -> Self {
        Self {
            completion_retries: config.completion_retries,
        }
    }
}

enum Command {
    StartCall {
        system_prompt: String,
        reply: oneshot::Sender<()>,
    },
    EndCall {
        reply: oneshot::Sender<Option<CallRecord>>,
    },
    Replay {
        turn_index: usize,
        reply: oneshot::Sender<Result<(), OrchestratorError>>,
    },
}

enum TaskOutcome {
    Completion {
        epoch: u64,
        result: Result<String, CompletionError>,
    },
    Speech {
        epoch: u64,
        turn_index: usize,
        result: Result<AudioHandle, SpeechError>,
    },
    Replay {
        epoch: u64,
        turn_index: usize,
        result: Result<AudioHandle, SpeechError>,
        reply: oneshot::Sender<Result<(), OrchestratorError>>,
    },
}

/// State of one active call
struct CallSession {
    epoch: u64,
    started_at: DateTime<Utc>,
    system_prompt: String,
    state: CallState,
    transcript: String,
    history: Vec<Turn>,
    last_error: Option<ErrorInfo>,
    /// Recognition events at or below this index are stale
    last_sequence: u64,
    /// Permission was refused; capture stays off for the rest of the call
    capture_blocked: bool,
    completion_attempts: u32,
    /// Clips produced by manual replay, by turn index
    replay_cache: HashMap<usize, AudioHandle>,
}

impl CallSession {
    fn new(epoch: u64, system_prompt: String, last_sequence: u64) -> Self {
        Self {
            epoch,
            started_at: Utc::now(),
            system_prompt,
            state: CallState::Idle,
            transcript: String::new(),
            history: Vec::new(),
            last_error: None,
            last_sequence,
            capture_blocked: false,
            completion_attempts: 0,
            replay_cache: HashMap::new(),
        }
    }

    fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            state: self.state,
            transcript: self.transcript.clone(),
            history: self.history.clone(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Spawns the orchestrator actor
pub struct CallOrchestrator;

impl CallOrchestrator {
    /// Start the actor on the current tokio runtime.
    ///
    /// `capture_events` is the consumer end of `capture`. The actor stops
    /// once every [`CallHandle`] has been dropped.
    pub fn spawn(
        config: OrchestratorConfig,
        capture: Arc<CaptureChannel>,
        capture_events: mpsc::UnboundedReceiver<CaptureEvent>,
        completion: Arc<dyn CompletionClient>,
        speech: Arc<SpeechOutput>,
    ) -> CallHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(CallSnapshot::default());

        let actor = Actor {
            config,
            capture: capture.clone(),
            completion,
            speech,
            session: None,
            next_epoch: 0,
            snapshots: snapshot_tx,
            outcomes: outcome_tx,
        };

        tokio::spawn(actor.run(command_rx, capture_events, outcome_rx));

        CallHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
            capture,
        }
    }
}

/// Cloneable handle to a running orchestrator
#[derive(Clone)]
pub struct CallHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<CallSnapshot>,
    capture: Arc<CaptureChannel>,
}

impl CallHandle {
    /// Start a call with the given system prompt, replacing any active one
    pub async fn start_call(&self, system_prompt: impl Into<String>) -> Result<(), OrchestratorError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::StartCall {
            system_prompt: system_prompt.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| OrchestratorError::Stopped)
    }

    /// End the active call.
    ///
    /// Capture is stopped before this awaits anything. Returns the history
    /// of the call that was ended, or `None` if no call was active.
    pub async fn end_call(&self) -> Result<Option<CallRecord>, OrchestratorError> {
        self.capture.call_state().store(CallState::Idle);
        self.capture.disarm();

        let (reply, rx) = oneshot::channel();
        self.send(Command::EndCall { reply }).await?;
        rx.await.map_err(|_| OrchestratorError::Stopped)
    }

    /// Replay the audio of a completed assistant turn, resolving when
    /// playback has finished. Never changes the call state.
    pub async fn request_replay(&self, turn_index: usize) -> Result<(), OrchestratorError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Replay { turn_index, reply }).await?;
        rx.await.map_err(|_| OrchestratorError::Stopped)?
    }

    /// Current projection of the call
    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every change of the projection
    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshots.clone()
    }

    async fn send(&self, command: Command) -> Result<(), OrchestratorError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| OrchestratorError::Stopped)
    }
}

struct Actor {
    config: OrchestratorConfig,
    capture: Arc<CaptureChannel>,
    completion: Arc<dyn CompletionClient>,
    speech: Arc<SpeechOutput>,
    session: Option<CallSession>,
    next_epoch: u64,
    snapshots: watch::Sender<CallSnapshot>,
    outcomes: mpsc::UnboundedSender<TaskOutcome>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut capture_events: mpsc::UnboundedReceiver<CaptureEvent>,
        mut outcomes: mpsc::UnboundedReceiver<TaskOutcome>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = capture_events.recv() => self.handle_capture(event),
                Some(outcome) = outcomes.recv() => self.handle_outcome(outcome),
            }
        }

        self.end_session();
        tracing::debug!("Call orchestrator stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartCall {
                system_prompt,
                reply,
            } => {
                self.start_session(system_prompt);
                let _ = reply.send(());
            }
            Command::EndCall { reply } => {
                let record = self.end_session();
                self.publish();
                let _ = reply.send(record);
            }
            Command::Replay { turn_index, reply } => self.start_replay(turn_index, reply),
        }
    }

    fn handle_capture(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Recognition(event) => self.handle_recognition(event),
            CaptureEvent::Fatal(fault) => {
                self.handle_capture_fault(fault);
                self.publish();
            }
        }
    }

    fn handle_outcome(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Completion { epoch, result } => self.on_completion(epoch, result),
            TaskOutcome::Speech {
                epoch,
                turn_index,
                result,
            } => self.on_speech(epoch, turn_index, result),
            TaskOutcome::Replay {
                epoch,
                turn_index,
                result,
                reply,
            } => {
                let response = result.clone().map(|_| ()).map_err(OrchestratorError::from);
                self.on_replay(epoch, turn_index, result);
                let _ = reply.send(response);
            }
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    fn start_session(&mut self, system_prompt: String) {
        if self.session.is_some() {
            tracing::info!("Replacing active call");
            self.end_session();
        }

        self.next_epoch += 1;
        let epoch = self.next_epoch;
        self.session = Some(CallSession::new(
            epoch,
            system_prompt,
            self.capture.last_sequence_index(),
        ));
        metrics::counter!("phone_agent_calls_started_total").increment(1);
        tracing::info!(epoch, "Call started");

        self.transition(CallState::Listening);
        if let Err(fault) = self.capture.arm() {
            self.handle_capture_fault(fault);
        }
        self.publish();
    }

    fn end_session(&mut self) -> Option<CallRecord> {
        self.capture.call_state().store(CallState::Idle);
        self.capture.disarm();

        let session = self.session.take()?;
        let released = session
            .history
            .iter()
            .filter_map(Turn::audio_handle)
            .chain(session.replay_cache.values().copied())
            .filter(|handle| self.speech.store().invalidate(*handle))
            .count();
        tracing::info!(
            epoch = session.epoch,
            turns = session.history.len(),
            clips_released = released,
            state = %session.state,
            "Call ended"
        );
        Some(CallRecord {
            started_at: session.started_at,
            ended_at: Utc::now(),
            history: session.history,
        })
    }

    // ------------------------------------------------------------------
    // Turn cycle
    // ------------------------------------------------------------------

    fn handle_recognition(&mut self, event: RecognitionEvent) {
        let Some(session) = self.session.as_mut() else {
            tracing::debug!(seq = event.sequence_index, "Recognition event with no active call");
            return;
        };

        if event.sequence_index <= session.last_sequence {
            if event.is_final {
                metrics::counter!("phone_agent_finals_dropped_total", "reason" => "stale")
                    .increment(1);
            }
            tracing::debug!(
                seq = event.sequence_index,
                last = session.last_sequence,
                "Dropping stale recognition event"
            );
            return;
        }

        if !event.is_final {
            if session.state == CallState::Listening {
                session.transcript = event.text;
                self.publish();
            }
            return;
        }

        if session.state.is_in_flight() {
            metrics::counter!("phone_agent_finals_dropped_total", "reason" => "in_flight")
                .increment(1);
            tracing::info!(
                seq = event.sequence_index,
                state = %session.state,
                "Dropping final while a turn is in flight"
            );
            return;
        }

        session.last_sequence = event.sequence_index;
        if !event.is_actionable() {
            tracing::debug!(seq = event.sequence_index, "Ignoring empty final");
            return;
        }

        let text = event.text.trim().to_string();
        self.begin_turn(text);
    }

    fn begin_turn(&mut self, text: String) {
        self.transition(CallState::Thinking);
        self.capture.disarm();

        let Some(session) = self.session.as_mut() else {
            return;
        };
        tracing::info!(epoch = session.epoch, chars = text.chars().count(), "User turn");
        session.history.push(Turn::user(text));
        session.transcript.clear();
        session.completion_attempts = 0;

        self.request_completion();
        self.publish();
    }

    fn request_completion(&self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let Some((user_turn, prior)) = session.history.split_last() else {
            return;
        };

        let epoch = session.epoch;
        let history = prior.to_vec();
        let user_text = user_turn.text().to_string();
        let system_prompt = session.system_prompt.clone();
        let completion = Arc::clone(&self.completion);
        let outcomes = self.outcomes.clone();

        tracing::debug!(epoch, model = completion.model_name(), "Requesting completion");
        tokio::spawn(async move {
            let result = completion
                .complete(&history, &user_text, &system_prompt)
                .await;
            let _ = outcomes.send(TaskOutcome::Completion { epoch, result });
        });
    }

    fn on_completion(&mut self, epoch: u64, result: Result<String, CompletionError>) {
        let retries = self.config.completion_retries;
        let Some(session) = self.active_session(epoch, CallState::Thinking) else {
            tracing::info!(epoch, "Discarding late completion result");
            return;
        };

        match result {
            Ok(text) => {
                session.history.push(Turn::pending_assistant(text.clone()));
                let turn_index = session.history.len() - 1;
                self.transition(CallState::Speaking);
                self.request_speech(epoch, turn_index, text);
                self.publish();
            }
            Err(err) => {
                metrics::counter!(
                    "phone_agent_completion_failures_total",
                    "kind" => err.kind().as_str()
                )
                .increment(1);

                if session.completion_attempts < retries {
                    session.completion_attempts += 1;
                    tracing::warn!(
                        error = %err,
                        attempt = session.completion_attempts,
                        "Completion failed, retrying"
                    );
                    self.request_completion();
                    return;
                }

                tracing::warn!(error = %err, "Completion failed");
                session.last_error = Some(ErrorInfo::from(&err));
                self.resume_listening();
                self.publish();
            }
        }
    }

    fn request_speech(&self, epoch: u64, turn_index: usize, text: String) {
        let speech = Arc::clone(&self.speech);
        let outcomes = self.outcomes.clone();

        tokio::spawn(async move {
            let result = speech.synthesize_and_play(&text).await;
            let _ = outcomes.send(TaskOutcome::Speech {
                epoch,
                turn_index,
                result,
            });
        });
    }

    fn on_speech(&mut self, epoch: u64, turn_index: usize, result: Result<AudioHandle, SpeechError>) {
        let Some(session) = self.active_session(epoch, CallState::Speaking) else {
            tracing::info!(epoch, turn_index, "Discarding late speech result");
            if let Ok(handle) = result {
                self.speech.store().invalidate(handle);
            }
            return;
        };

        let handle = match &result {
            Ok(handle) => Some(*handle),
            Err(err) => {
                metrics::counter!(
                    "phone_agent_speech_failures_total",
                    "kind" => err.kind().as_str()
                )
                .increment(1);
                tracing::warn!(error = %err, turn_index, "Speech failed");
                session.last_error = Some(ErrorInfo::from(err));
                None
            }
        };

        match session.history.get_mut(turn_index) {
            Some(turn) => {
                turn.complete(handle);
            }
            None => tracing::error!(turn_index, "Speech result for missing turn"),
        }

        metrics::counter!("phone_agent_turns_completed_total").increment(1);
        self.resume_listening();
        self.publish();
    }

    /// Back to Listening after a turn, success or failure
    fn resume_listening(&mut self) {
        self.transition(CallState::Listening);

        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.capture_blocked {
            tracing::debug!("Capture blocked, not re-arming");
            return;
        }

        // Anything recognised before this point belongs to the finished turn
        session.last_sequence = session
            .last_sequence
            .max(self.capture.last_sequence_index());
        if let Err(fault) = self.capture.arm() {
            self.handle_capture_fault(fault);
        }
    }

    fn handle_capture_fault(&mut self, fault: RecognitionFault) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if fault.kind().is_fatal() {
            tracing::error!(error = %fault, "Capture blocked for this call");
            session.capture_blocked = true;
            session.last_error = Some(ErrorInfo::from(&fault));
        } else {
            tracing::warn!(error = %fault, "Transient capture fault");
        }
    }

    // ------------------------------------------------------------------
    // Replay
    // ------------------------------------------------------------------

    fn start_replay(
        &mut self,
        turn_index: usize,
        reply: oneshot::Sender<Result<(), OrchestratorError>>,
    ) {
        let Some(session) = self.session.as_ref() else {
            let _ = reply.send(Err(OrchestratorError::NoActiveCall));
            return;
        };
        let Some(turn) = session.history.get(turn_index) else {
            let _ = reply.send(Err(OrchestratorError::TurnIndexOutOfRange {
                index: turn_index,
                len: session.history.len(),
            }));
            return;
        };
        if turn.speaker() != Speaker::Assistant || turn.is_pending() {
            let _ = reply.send(Err(OrchestratorError::NotReplayable(turn_index)));
            return;
        }

        let cached = turn
            .audio_handle()
            .into_iter()
            .chain(session.replay_cache.get(&turn_index).copied())
            .find(|handle| self.speech.is_playable(*handle));
        let text = turn.text().to_string();
        let epoch = session.epoch;
        let speech = Arc::clone(&self.speech);
        let outcomes = self.outcomes.clone();

        tracing::info!(turn_index, cached = cached.is_some(), "Replaying turn audio");

        tokio::spawn(async move {
            let result = match cached {
                Some(handle) => speech.play(handle).await.map(|_| handle),
                None => speech.synthesize_and_play(&text).await,
            };
            let _ = outcomes.send(TaskOutcome::Replay {
                epoch,
                turn_index,
                result,
                reply,
            });
        });
    }

    fn on_replay(&mut self, epoch: u64, turn_index: usize, result: Result<AudioHandle, SpeechError>) {
        let Some(session) = self.session.as_mut().filter(|s| s.epoch == epoch) else {
            tracing::debug!(epoch, turn_index, "Replay finished after call ended");
            if let Ok(handle) = result {
                self.speech.store().invalidate(handle);
            }
            return;
        };

        match result {
            Ok(handle) => {
                let turn_handle = session
                    .history
                    .get(turn_index)
                    .and_then(Turn::audio_handle);
                if let Some(previous) = session.replay_cache.insert(turn_index, handle) {
                    if previous != handle && turn_handle != Some(previous) {
                        self.speech.store().invalidate(previous);
                    }
                }
            }
            Err(err) => {
                metrics::counter!(
                    "phone_agent_speech_failures_total",
                    "kind" => err.kind().as_str()
                )
                .increment(1);
                tracing::warn!(error = %err, turn_index, "Replay failed");
                session.last_error = Some(ErrorInfo::from(&err));
                self.publish();
            }
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// The active session, if it belongs to `epoch` and is in `state`
    fn active_session(&mut self, epoch: u64, state: CallState) -> Option<&mut CallSession> {
        self.session
            .as_mut()
            .filter(|s| s.epoch == epoch && s.state == state)
    }

    fn transition(&mut self, to: CallState) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let from = session.state;
        session.state = to;
        self.capture.call_state().store(to);

        if from != to {
            tracing::info!(epoch = session.epoch, from = %from, to = %to, "Call state changed");
        }
    }

    fn publish(&self) {
        let snapshot = self
            .session
            .as_ref()
            .map(CallSession::snapshot)
            .unwrap_or_default();
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }
}
