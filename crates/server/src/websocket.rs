//! WebSocket Handler
//!
//! One connection is one phone. The connected client hosts the platform
//! speech recognizer and the speaker: the server tells it when to capture
//! and what to play, and the client reports recognition signals and the end
//! of each playback back over the same socket.

use async_trait::async_trait;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::Response,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use phone_agent_agent::{CallHandle, CallOrchestrator, OrchestratorConfig};
use phone_agent_core::{
    AudioClip, AudioHandle, AudioPlayer, CallSnapshot, CallState, CallStateCell, PlatformSignal,
    RecognitionBackend, RecognitionFault, SpeechError, Turn,
};
use phone_agent_pipeline::{AudioStore, CaptureChannel, CaptureSettings, SpeechOutput};

use crate::state::AppState;

/// Messages sent by the phone client
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Recognizer produced a result
    RecognitionResult { text: String, is_final: bool },
    /// Recognizer session ended, on its own or after `capture_stop`
    RecognitionEnd,
    /// Recognizer error code, e.g. `no-speech` or `not-allowed`
    RecognitionError { error: String },
    PlaybackFinished { clip_id: AudioHandle },
    PlaybackFailed { clip_id: AudioHandle, reason: String },
    Dial { number: String },
    HangUp,
    Replay { turn_index: usize },
    Ping,
}

/// Messages pushed to the phone client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    CaptureStart { language: String },
    CaptureStop,
    PlayAudio { clip_id: AudioHandle, wav_base64: String },
    Snapshot(CallSnapshot),
    CallRejected { message: String },
    CallEnded { history: Vec<Turn> },
    Error { message: String },
    Pong,
}

type Outbox = mpsc::UnboundedSender<ServerMessage>;

/// Map a browser recognition error code onto a capture fault
pub fn classify_recognition_error(code: &str) -> RecognitionFault {
    match code {
        "not-allowed" | "service-not-allowed" => RecognitionFault::PermissionDenied(code.to_string()),
        _ => RecognitionFault::Transient(code.to_string()),
    }
}

/// Recognizer hosted by the client
pub struct WsRecognitionBackend {
    out: Outbox,
}

impl WsRecognitionBackend {
    pub fn new(out: Outbox) -> Self {
        Self { out }
    }
}

impl RecognitionBackend for WsRecognitionBackend {
    fn start(&self, language: &str) -> Result<(), RecognitionFault> {
        self.out
            .send(ServerMessage::CaptureStart {
                language: language.to_string(),
            })
            .map_err(|_| RecognitionFault::Transient("Connection closed".to_string()))
    }

    fn stop(&self) {
        if self.out.send(ServerMessage::CaptureStop).is_err() {
            tracing::debug!("Capture stop after connection closed");
        }
    }
}

type PlaybackResult = Result<(), String>;

/// Speaker hosted by the client.
///
/// Each play ships the WAV bytes and waits for the client to report the end
/// of playback for that clip.
pub struct WsAudioPlayer {
    out: Outbox,
    pending: Mutex<HashMap<AudioHandle, oneshot::Sender<PlaybackResult>>>,
}

impl WsAudioPlayer {
    pub fn new(out: Outbox) -> Self {
        Self {
            out,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Complete a pending play. Returns false if nothing was waiting.
    pub fn resolve(&self, clip_id: AudioHandle, result: PlaybackResult) -> bool {
        match self.pending.lock().remove(&clip_id) {
            Some(waiter) => waiter.send(result).is_ok(),
            None => false,
        }
    }

    /// Fail every pending play
    pub fn abandon_all(&self) {
        let abandoned = {
            let mut pending = self.pending.lock();
            let count = pending.len();
            pending.clear();
            count
        };
        if abandoned > 0 {
            tracing::debug!(abandoned, "Abandoned pending playback");
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[async_trait]
impl AudioPlayer for WsAudioPlayer {
    async fn play(&self, clip: &AudioClip) -> Result<(), SpeechError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(clip.handle, tx);

        let message = ServerMessage::PlayAudio {
            clip_id: clip.handle,
            wav_base64: BASE64.encode(&*clip.wav),
        };
        if self.out.send(message).is_err() {
            self.pending.lock().remove(&clip.handle);
            return Err(SpeechError::Playback("Connection closed".to_string()));
        }

        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(SpeechError::Playback(reason)),
            Err(_) => Err(SpeechError::Playback(
                "Playback abandoned before it finished".to_string(),
            )),
        }
    }
}

/// Per-connection call wiring
pub struct Connection {
    state: AppState,
    call: CallHandle,
    capture: Arc<CaptureChannel>,
    player: Arc<WsAudioPlayer>,
    /// Clips synthesized for this client only
    audio: Arc<AudioStore>,
    out: Outbox,
}

impl Connection {
    /// Build the capture channel, speech output and orchestrator for one client
    pub fn open(state: AppState, out: Outbox) -> Self {
        let backend = Arc::new(WsRecognitionBackend::new(out.clone()));
        let player = Arc::new(WsAudioPlayer::new(out.clone()));
        let audio = Arc::new(AudioStore::new());

        let (capture, capture_events) = CaptureChannel::new(
            backend,
            CaptureSettings::from(&state.config.capture),
            CallStateCell::new(),
        );
        let speech = Arc::new(SpeechOutput::new(
            state.synthesizer.clone(),
            player.clone(),
            audio.clone(),
            state.config.synthesis.voice.clone(),
        ));
        let call = CallOrchestrator::spawn(
            OrchestratorConfig::from(&state.config.call),
            capture.clone(),
            capture_events,
            state.completion.clone(),
            speech,
        );

        Self {
            state,
            call,
            capture,
            player,
            audio,
            out,
        }
    }

    pub fn call(&self) -> &CallHandle {
        &self.call
    }

    pub fn player(&self) -> &Arc<WsAudioPlayer> {
        &self.player
    }

    pub fn audio(&self) -> &Arc<AudioStore> {
        &self.audio
    }

    /// Push every snapshot change to the client until the orchestrator stops
    pub fn forward_snapshots(&self) -> JoinHandle<()> {
        let mut snapshots = self.call.subscribe();
        let out = self.out.clone();
        tokio::spawn(async move {
            let initial = snapshots.borrow_and_update().clone();
            if out.send(ServerMessage::Snapshot(initial)).is_err() {
                return;
            }
            while snapshots.changed().await.is_ok() {
                let snapshot = snapshots.borrow_and_update().clone();
                if out.send(ServerMessage::Snapshot(snapshot)).is_err() {
                    break;
                }
            }
        })
    }

    pub async fn handle(&self, message: ClientMessage) {
        match message {
            ClientMessage::RecognitionResult { text, is_final } => {
                self.capture
                    .handle_signal(PlatformSignal::Result { text, is_final });
            }
            ClientMessage::RecognitionEnd => self.capture.handle_signal(PlatformSignal::End),
            ClientMessage::RecognitionError { error } => {
                let fault = classify_recognition_error(&error);
                self.capture.handle_signal(PlatformSignal::Error(fault));
            }
            ClientMessage::PlaybackFinished { clip_id } => {
                if !self.player.resolve(clip_id, Ok(())) {
                    tracing::debug!(clip = %clip_id, "Playback finished for unknown clip");
                }
            }
            ClientMessage::PlaybackFailed { clip_id, reason } => {
                if !self.player.resolve(clip_id, Err(reason)) {
                    tracing::debug!(clip = %clip_id, "Playback failed for unknown clip");
                }
            }
            ClientMessage::Dial { number } => self.dial(&number).await,
            ClientMessage::HangUp => self.hang_up().await,
            ClientMessage::Replay { turn_index } => self.replay(turn_index),
            ClientMessage::Ping => self.send(ServerMessage::Pong),
        }
    }

    async fn dial(&self, number: &str) {
        let system_prompt = match self.state.phonebook.dial(number) {
            Ok(contact) => {
                tracing::info!(contact = %contact.id, "Dialling");
                self.state.system_prompt_for(&contact.system_prompt)
            }
            Err(e) => {
                tracing::info!(number, "Dialled number not in service");
                self.send(ServerMessage::CallRejected {
                    message: e.to_string(),
                });
                return;
            }
        };

        if self.call.snapshot().state != CallState::Idle {
            self.hang_up().await;
        }
        if let Err(e) = self.call.start_call(system_prompt).await {
            tracing::error!(error = %e, "Failed to start call");
            self.send(ServerMessage::Error {
                message: e.to_string(),
            });
        }
    }

    async fn hang_up(&self) {
        match self.call.end_call().await {
            Ok(Some(record)) => {
                // The ended call's playback can never be reported against it
                self.player.abandon_all();
                self.send(ServerMessage::CallEnded {
                    history: record.history,
                });
            }
            Ok(None) => tracing::debug!("Hang up without an active call"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to end call");
                self.send(ServerMessage::Error {
                    message: e.to_string(),
                });
            }
        }
    }

    fn replay(&self, turn_index: usize) {
        let call = self.call.clone();
        let out = self.out.clone();
        // Resolves only after the client reports playback, which arrives on
        // the same socket this connection is reading
        tokio::spawn(async move {
            if let Err(e) = call.request_replay(turn_index).await {
                tracing::warn!(turn_index, error = %e, "Replay failed");
                let _ = out.send(ServerMessage::Error {
                    message: e.to_string(),
                });
            }
        });
    }

    /// End the call when the client goes away
    pub async fn close(&self) {
        self.hang_up().await;
        self.player.abandon_all();
    }

    fn send(&self, message: ServerMessage) {
        if self.out.send(message).is_err() {
            tracing::debug!("Dropping message for closed connection");
        }
    }
}

/// WebSocket handler
pub struct WebSocketHandler;

impl WebSocketHandler {
    pub fn handle(ws: WebSocketUpgrade, state: AppState) -> Response {
        ws.on_upgrade(move |socket| Self::handle_socket(socket, state))
    }

    async fn handle_socket(socket: WebSocket, state: AppState) {
        let (mut sink, mut stream) = socket.split();
        let (out, mut outbox) = mpsc::unbounded_channel::<ServerMessage>();

        let writer = tokio::spawn(async move {
            while let Some(message) = outbox.recv().await {
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to encode message");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json)).await {
                    tracing::debug!(error = %e, "WebSocket send failed");
                    break;
                }
            }
        });

        let connection = Connection::open(state, out);
        let forwarder = connection.forward_snapshots();
        tracing::info!("Phone connected");

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => connection.handle(message).await,
                    Err(e) => {
                        tracing::warn!(error = %e, "Invalid client message");
                        connection.send(ServerMessage::Error {
                            message: format!("Invalid message: {}", e),
                        });
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "WebSocket receive failed");
                    break;
                }
            }
        }

        connection.close().await;
        forwarder.abort();
        writer.abort();
        tracing::info!("Phone disconnected");
    }
}
