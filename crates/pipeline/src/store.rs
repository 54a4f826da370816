//! In-memory clip store
//!
//! Handles stay resolvable until explicitly invalidated.

use parking_lot::RwLock;
use std::collections::HashMap;

use phone_agent_core::{AudioClip, AudioHandle};

#[derive(Debug, Default)]
pub struct AudioStore {
    clips: RwLock<HashMap<AudioHandle, AudioClip>>,
}

impl AudioStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a clip under its own handle
    pub fn insert(&self, clip: AudioClip) -> AudioHandle {
        let handle = clip.handle;
        self.clips.write().insert(handle, clip);
        handle
    }

    pub fn get(&self, handle: AudioHandle) -> Option<AudioClip> {
        self.clips.read().get(&handle).cloned()
    }

    pub fn contains(&self, handle: AudioHandle) -> bool {
        self.clips.read().contains_key(&handle)
    }

    /// Drop a clip; later lookups of `handle` fail
    pub fn invalidate(&self, handle: AudioHandle) -> bool {
        self.clips.write().remove(&handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.clips.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.read().is_empty()
    }
}
