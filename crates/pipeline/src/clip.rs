//! WAV clip decoding

use std::io::Cursor;

use phone_agent_core::{AudioClip, AudioHandle};

use crate::PipelineError;

/// Parse a WAV payload into a playable clip.
///
/// The bytes are kept as-is for the player; only the header is read here to
/// reject payloads that are not playable audio.
pub fn decode_wav(handle: AudioHandle, wav: Vec<u8>) -> Result<AudioClip, PipelineError> {
    if wav.is_empty() {
        return Err(PipelineError::EmptyAudio);
    }

    let reader = hound::WavReader::new(Cursor::new(wav.as_slice()))
        .map_err(|e| PipelineError::Audio(format!("Failed to decode WAV: {}", e)))?;

    let spec = reader.spec();
    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(PipelineError::Audio(format!(
            "Unplayable WAV format: {} channels at {} Hz",
            spec.channels, spec.sample_rate
        )));
    }
    let frames = reader.duration();
    drop(reader);

    tracing::debug!(
        sample_rate = spec.sample_rate,
        channels = spec.channels,
        frames,
        "Decoded clip"
    );

    Ok(AudioClip::new(
        handle,
        wav,
        spec.sample_rate,
        spec.channels,
        frames,
    ))
}
