//! Speech output and capture traits

use async_trait::async_trait;

use crate::{AudioClip, RecognitionFault, SpeechError, VoiceSynthesisConfig};

/// Remote text-to-speech.
///
/// Runs both remote phases (phoneme/prosody analysis, then waveform
/// synthesis) and returns the raw audio payload.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync + 'static {
    /// Synthesize `text` into a WAV payload
    ///
    /// # Errors
    /// `SpeechError::Synthesis` if either remote phase fails or the payload
    /// is empty.
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceSynthesisConfig,
    ) -> Result<Vec<u8>, SpeechError>;

    /// Get model name for logging
    fn model_name(&self) -> &str;
}

/// Local audio sink
#[async_trait]
pub trait AudioPlayer: Send + Sync + 'static {
    /// Play a clip, resolving only once playback has finished
    async fn play(&self, clip: &AudioClip) -> Result<(), SpeechError>;
}

/// Platform continuous speech recognizer.
///
/// Both calls must return immediately; results are reported back
/// asynchronously through the capture channel.
pub trait RecognitionBackend: Send + Sync + 'static {
    /// Begin a recognition session in `language`
    fn start(&self, language: &str) -> Result<(), RecognitionFault>;

    /// Stop the current recognition session, if any
    fn stop(&self);
}
