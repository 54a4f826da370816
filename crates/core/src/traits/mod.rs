//! Seam traits for the call agent
//!
//! Every remote or platform dependency of the orchestrator sits behind one
//! of these traits so it can be swapped for a mock in tests:
//!
//! ```text
//! Completion:
//!   - CompletionClient: history + utterance → assistant reply
//!
//! Speech output:
//!   - SpeechSynthesizer: text → WAV payload (two remote phases)
//!   - AudioPlayer: clip → resolves when playback ends
//!
//! Capture:
//!   - RecognitionBackend: start/stop the platform recognizer
//! ```

mod completion;
mod speech;

pub use completion::CompletionClient;
pub use speech::{AudioPlayer, RecognitionBackend, SpeechSynthesizer};
