//! Continuous capture channel
//!
//! Wraps the platform recognizer into a restartable event source with a
//! single consumer. The platform reports back through
//! [`CaptureChannel::handle_signal`]; the consumer reads [`CaptureEvent`]s
//! from the receiver returned by [`CaptureChannel::new`].
//!
//! Arm, disarm and the auto-restart decision all run under one lock, so a
//! restart can never slip in after a disarm. Every recognition session the
//! channel stops still reports its own `End` later, possibly after a new
//! session has started; those ends are counted off and never restart.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use phone_agent_config::CaptureConfig;
use phone_agent_core::{
    CallState, CallStateCell, PlatformSignal, RecognitionBackend, RecognitionEvent,
    RecognitionFault,
};

/// What the consumer receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Recognition(RecognitionEvent),
    /// Capture cannot continue for this call
    Fatal(RecognitionFault),
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Recognition language, fixed when the channel is built
    pub language: String,
    pub auto_restart: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            language: "ja-JP".to_string(),
            auto_restart: true,
        }
    }
}

impl From<&CaptureConfig> for CaptureSettings {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            language: config.language.clone(),
            auto_restart: config.auto_restart,
        }
    }
}

#[derive(Debug, Default)]
struct Session {
    /// Consumer wants to listen
    armed: bool,
    /// Platform recognizer has been started and not yet ended
    running: bool,
    /// Stopped sessions whose `End` has not arrived yet
    stopped_awaiting_end: u32,
}

impl Session {
    fn stop(&mut self) -> bool {
        let was_running = self.running;
        self.armed = false;
        self.running = false;
        if was_running {
            self.stopped_awaiting_end += 1;
        }
        was_running
    }
}

pub struct CaptureChannel {
    backend: Arc<dyn RecognitionBackend>,
    settings: CaptureSettings,
    session: Mutex<Session>,
    last_sequence: AtomicU64,
    call_state: Arc<CallStateCell>,
    events: mpsc::UnboundedSender<CaptureEvent>,
}

impl CaptureChannel {
    pub fn new(
        backend: Arc<dyn RecognitionBackend>,
        settings: CaptureSettings,
        call_state: Arc<CallStateCell>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<CaptureEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Self {
            backend,
            settings,
            session: Mutex::new(Session::default()),
            last_sequence: AtomicU64::new(0),
            call_state,
            events,
        });
        (channel, rx)
    }

    /// Begin continuous capture.
    ///
    /// Idempotent while a recognition session is running. A permission
    /// failure leaves the channel disarmed; a transient one leaves it armed
    /// so the next `arm` retries.
    pub fn arm(&self) -> Result<(), RecognitionFault> {
        let mut session = self.session.lock();
        session.armed = true;
        if session.running {
            return Ok(());
        }

        match self.backend.start(&self.settings.language) {
            Ok(()) => {
                session.running = true;
                tracing::debug!(language = %self.settings.language, "Capture armed");
                Ok(())
            }
            Err(fault) => {
                if matches!(fault, RecognitionFault::PermissionDenied(_)) {
                    session.armed = false;
                }
                tracing::warn!(error = %fault, "Failed to start recognition");
                Err(fault)
            }
        }
    }

    /// Stop capture immediately. Signals arriving afterwards are dropped.
    pub fn disarm(&self) {
        let mut session = self.session.lock();
        let was_running = session.stop();
        drop(session);

        if was_running {
            self.backend.stop();
            tracing::debug!("Capture disarmed");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.session.lock().armed
    }

    /// Shared call state consulted by the auto-restart decision
    pub fn call_state(&self) -> &Arc<CallStateCell> {
        &self.call_state
    }

    /// Sequence index of the most recently forwarded event, 0 if none.
    /// Events at or below this value are already in flight to the consumer.
    pub fn last_sequence_index(&self) -> u64 {
        self.last_sequence.load(Ordering::Relaxed)
    }

    /// Entry point for the platform recognizer
    pub fn handle_signal(&self, signal: PlatformSignal) {
        match signal {
            PlatformSignal::Result { text, is_final } => self.on_result(text, is_final),
            PlatformSignal::End => self.on_end(),
            PlatformSignal::Error(fault) => self.on_error(fault),
        }
    }

    fn on_result(&self, text: String, is_final: bool) {
        let session = self.session.lock();
        if !session.armed {
            tracing::debug!(is_final, "Dropping recognition result while disarmed");
            return;
        }

        let sequence_index = self.last_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let event = RecognitionEvent {
            text,
            is_final,
            sequence_index,
        };
        if self.events.send(CaptureEvent::Recognition(event)).is_err() {
            tracing::debug!("Capture consumer gone");
        }
    }

    fn on_end(&self) {
        let mut session = self.session.lock();
        if session.stopped_awaiting_end > 0 {
            session.stopped_awaiting_end -= 1;
            tracing::debug!(
                remaining = session.stopped_awaiting_end,
                "End of a stopped recognition session"
            );
            return;
        }
        session.running = false;

        let state = self.call_state.load();
        let restart = self.settings.auto_restart && session.armed && state == CallState::Listening;
        if !restart {
            tracing::debug!(
                armed = session.armed,
                state = %state,
                "Recognition ended, not restarting"
            );
            return;
        }

        match self.backend.start(&self.settings.language) {
            Ok(()) => {
                session.running = true;
                tracing::debug!("Recognition auto-restarted");
            }
            Err(RecognitionFault::PermissionDenied(msg)) => {
                session.armed = false;
                drop(session);
                self.forward_fatal(RecognitionFault::PermissionDenied(msg));
            }
            Err(fault) => {
                tracing::warn!(error = %fault, "Recognition restart failed");
            }
        }
    }

    fn on_error(&self, fault: RecognitionFault) {
        let mut session = self.session.lock();
        if !session.armed {
            tracing::debug!(error = %fault, "Dropping recognition error while disarmed");
            return;
        }

        match fault {
            RecognitionFault::Transient(ref msg) => {
                tracing::warn!(error = %msg, "Transient recognition error");
            }
            RecognitionFault::PermissionDenied(_) => {
                let was_running = session.stop();
                drop(session);
                if was_running {
                    self.backend.stop();
                }
                self.forward_fatal(fault);
            }
        }
    }

    fn forward_fatal(&self, fault: RecognitionFault) {
        tracing::error!(error = %fault, "Capture stopped");
        if self.events.send(CaptureEvent::Fatal(fault)).is_err() {
            tracing::debug!("Capture consumer gone");
        }
    }
}
