//! Error kinds surfaced to call observers and the seam error types

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Category of the most recent failure in a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Microphone access refused; capture cannot proceed for this call
    PermissionDenied,
    /// Recognition hiccup, recovered by auto-restart
    RecognitionTransient,
    /// Completion service unreachable or failed at the transport level
    NetworkError,
    /// Completion service answered with an error or a malformed body
    UpstreamError,
    /// A remote synthesis phase failed
    SynthesisError,
    /// The synthesized audio could not be decoded or played
    PlaybackError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::RecognitionTransient => "recognition_transient",
            Self::NetworkError => "network_error",
            Self::UpstreamError => "upstream_error",
            Self::SynthesisError => "synthesis_error",
            Self::PlaybackError => "playback_error",
        }
    }

    /// Whether this kind ends capture for the rest of the call
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PermissionDenied)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single-slot error shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Completion client failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompletionError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Upstream error: {0}")]
    Upstream(String),
}

impl CompletionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::NetworkError,
            Self::Upstream(_) => ErrorKind::UpstreamError,
        }
    }
}

impl From<&CompletionError> for ErrorInfo {
    fn from(err: &CompletionError) -> Self {
        ErrorInfo::new(err.kind(), err.to_string())
    }
}

/// Synthesis and playback failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpeechError {
    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Playback error: {0}")]
    Playback(String),
}

impl SpeechError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Synthesis(_) => ErrorKind::SynthesisError,
            Self::Playback(_) => ErrorKind::PlaybackError,
        }
    }
}

impl From<&SpeechError> for ErrorInfo {
    fn from(err: &SpeechError) -> Self {
        ErrorInfo::new(err.kind(), err.to_string())
    }
}

/// Faults reported by the platform recognition facility
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecognitionFault {
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("Recognition error: {0}")]
    Transient(String),
}

impl RecognitionFault {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::Transient(_) => ErrorKind::RecognitionTransient,
        }
    }
}

impl From<&RecognitionFault> for ErrorInfo {
    fn from(err: &RecognitionFault) -> Self {
        ErrorInfo::new(err.kind(), err.to_string())
    }
}
