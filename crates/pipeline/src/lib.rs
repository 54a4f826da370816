//! Speech capture and speech output
//!
//! Features:
//! - Restartable continuous capture channel over the platform recognizer
//! - Two-phase HTTP synthesizer (g2p, then waveform synthesis)
//! - WAV clip decoding and an in-memory clip store
//! - Serialised playback through a pluggable audio player

pub mod capture;
pub mod clip;
pub mod output;
pub mod store;
pub mod synthesizer;

pub use capture::{CaptureChannel, CaptureEvent, CaptureSettings};
pub use clip::decode_wav;
pub use output::SpeechOutput;
pub use store::AudioStore;
pub use synthesizer::{HttpSpeechSynthesizer, SynthesizerConfig};

use phone_agent_core::SpeechError;
use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("{phase} failed: HTTP {status}: {body}")]
    Remote {
        phase: &'static str,
        status: u16,
        body: String,
    },

    #[error("Empty audio payload")]
    EmptyAudio,

    #[error("Audio error: {0}")]
    Audio(String),
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Http(err.to_string())
    }
}

impl From<PipelineError> for SpeechError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Audio(_) => SpeechError::Playback(err.to_string()),
            other => SpeechError::Synthesis(other.to_string()),
        }
    }
}
