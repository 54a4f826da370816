//! Call lifecycle state and observer projections

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::{ErrorInfo, Turn};

/// Orchestrator state.
///
/// `Thinking` and `Speaking` are the in-flight states: while either holds,
/// no new turn may begin and capture stays disarmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CallState {
    /// No active call
    #[default]
    Idle = 0,
    /// Capture armed, waiting for a final utterance
    Listening = 1,
    /// Completion request outstanding
    Thinking = 2,
    /// Synthesis and playback outstanding
    Speaking = 3,
}

impl CallState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Listening,
            2 => Self::Thinking,
            3 => Self::Speaking,
            _ => Self::Idle,
        }
    }

    /// Whether a turn is currently in flight
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Thinking | Self::Speaking)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free mirror of the orchestrator state.
///
/// Written only by the orchestrator; read by the capture channel at the
/// moment it decides whether to auto-restart recognition.
#[derive(Debug)]
pub struct CallStateCell {
    state: AtomicU8,
}

impl CallStateCell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Current state
    pub fn load(&self) -> CallState {
        CallState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn store(&self, state: CallState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

impl Default for CallStateCell {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(CallState::Idle as u8),
        }
    }
}

/// Read-only projection of the call session published to observers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CallSnapshot {
    pub state: CallState,
    /// Latest interim recognition text, for display only
    pub transcript: String,
    pub history: Vec<Turn>,
    pub last_error: Option<ErrorInfo>,
}

/// History of a call that has been ended
#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub history: Vec<Turn>,
}
