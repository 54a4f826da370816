//! Conversation turns

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::AudioHandle;

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    /// Role name used by chat-completion APIs
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single entry in the call history.
///
/// Everything except the pending flag and the audio handle is fixed at
/// construction. An assistant turn starts pending and is completed exactly
/// once through [`Turn::complete`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    speaker: Speaker,
    text: String,
    audio_handle: Option<AudioHandle>,
    pending: bool,
    timestamp: DateTime<Utc>,
}

impl Turn {
    /// A finished user utterance
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::User,
            text: text.into(),
            audio_handle: None,
            pending: false,
            timestamp: Utc::now(),
        }
    }

    /// An assistant reply whose audio has not been produced yet
    pub fn pending_assistant(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Assistant,
            text: text.into(),
            audio_handle: None,
            pending: true,
            timestamp: Utc::now(),
        }
    }

    pub fn speaker(&self) -> Speaker {
        self.speaker
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn audio_handle(&self) -> Option<AudioHandle> {
        self.audio_handle
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Clear the pending flag, attaching the audio handle if synthesis
    /// succeeded. Returns false if the turn was already complete, in which
    /// case nothing changes.
    pub fn complete(&mut self, audio_handle: Option<AudioHandle>) -> bool {
        if !self.pending {
            return false;
        }
        self.pending = false;
        self.audio_handle = audio_handle;
        true
    }
}
