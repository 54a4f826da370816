//! Synthesized audio clips and the opaque handles that refer to them

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Opaque reference to a synthesized clip held by the audio store.
///
/// A handle is only meaningful to the store that issued it; resolving it
/// elsewhere yields nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AudioHandle(Uuid);

impl AudioHandle {
    /// Allocate a fresh handle
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AudioHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AudioHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A decoded, locally playable audio clip
#[derive(Debug, Clone)]
pub struct AudioClip {
    /// Handle under which the clip is registered
    pub handle: AudioHandle,
    /// Raw WAV container bytes as returned by the synthesis service
    pub wav: Arc<[u8]>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: u16,
    /// Playback length
    pub duration: Duration,
}

impl AudioClip {
    pub fn new(
        handle: AudioHandle,
        wav: impl Into<Arc<[u8]>>,
        sample_rate: u32,
        channels: u16,
        frames: u32,
    ) -> Self {
        let duration = if sample_rate == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(frames as f64 / sample_rate as f64)
        };
        Self {
            handle,
            wav: wav.into(),
            sample_rate,
            channels,
            duration,
        }
    }

    /// Size of the WAV payload in bytes
    pub fn len_bytes(&self) -> usize {
        self.wav.len()
    }
}
