//! Core traits and types for the phone call agent
//!
//! This crate provides foundational types used across all other crates:
//! - Call lifecycle state and the shared state cell read by the capture channel
//! - Conversation turns and opaque audio handles
//! - Recognition events produced by the capture channel
//! - Error kinds surfaced to observers
//! - Seam traits for the remote collaborators (completion, synthesis,
//!   playback, platform speech recognition)

pub mod audio;
pub mod call;
pub mod error;
pub mod recognition;
pub mod traits;
pub mod turn;
pub mod voice_config;

pub use audio::{AudioClip, AudioHandle};
pub use call::{CallRecord, CallSnapshot, CallState, CallStateCell};
pub use error::{CompletionError, ErrorInfo, ErrorKind, RecognitionFault, SpeechError};
pub use recognition::{PlatformSignal, RecognitionEvent};
pub use traits::{AudioPlayer, CompletionClient, RecognitionBackend, SpeechSynthesizer};
pub use turn::{Speaker, Turn};
pub use voice_config::VoiceSynthesisConfig;
