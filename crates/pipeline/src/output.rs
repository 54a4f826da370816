//! Synthesis and playback client
//!
//! Turns assistant text into a stored clip and plays it, resolving only when
//! the player reports the end of playback. All playback goes through one
//! lock, so turn audio and manual replays never overlap. None of this needs
//! an active call.

use std::sync::Arc;
use tokio::sync::Mutex;

use phone_agent_core::{
    AudioHandle, AudioPlayer, SpeechError, SpeechSynthesizer, VoiceSynthesisConfig,
};

use crate::clip::decode_wav;
use crate::store::AudioStore;

pub struct SpeechOutput {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    player: Arc<dyn AudioPlayer>,
    store: Arc<AudioStore>,
    voice: VoiceSynthesisConfig,
    playback: Mutex<()>,
}

impl SpeechOutput {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        player: Arc<dyn AudioPlayer>,
        store: Arc<AudioStore>,
        voice: VoiceSynthesisConfig,
    ) -> Self {
        Self {
            synthesizer,
            player,
            store,
            voice,
            playback: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<AudioStore> {
        &self.store
    }

    /// Whether `handle` still resolves to a playable clip
    pub fn is_playable(&self, handle: AudioHandle) -> bool {
        self.store.contains(handle)
    }

    /// Synthesize and register a clip without playing it
    pub async fn synthesize(&self, text: &str) -> Result<AudioHandle, SpeechError> {
        tracing::debug!(
            model = self.synthesizer.model_name(),
            chars = text.chars().count(),
            "Synthesizing"
        );
        let wav = self.synthesizer.synthesize(text, &self.voice).await?;
        if wav.is_empty() {
            return Err(SpeechError::Synthesis("Empty audio payload".to_string()));
        }

        let clip = decode_wav(AudioHandle::new(), wav)?;
        Ok(self.store.insert(clip))
    }

    /// Play a stored clip, resolving when playback has finished
    pub async fn play(&self, handle: AudioHandle) -> Result<(), SpeechError> {
        let clip = self
            .store
            .get(handle)
            .ok_or_else(|| SpeechError::Playback(format!("Unknown audio handle {}", handle)))?;

        let _guard = self.playback.lock().await;
        tracing::debug!(
            clip = %handle,
            duration_ms = clip.duration.as_millis() as u64,
            "Playback started"
        );
        self.player.play(&clip).await?;
        tracing::debug!(clip = %handle, "Playback finished");
        Ok(())
    }

    /// Full speak phase: synthesize, register, play.
    ///
    /// A clip whose playback fails is dropped from the store, since no one
    /// else holds its handle.
    pub async fn synthesize_and_play(&self, text: &str) -> Result<AudioHandle, SpeechError> {
        let handle = self.synthesize(text).await?;
        if let Err(err) = self.play(handle).await {
            self.store.invalidate(handle);
            return Err(err);
        }
        Ok(handle)
    }
}
