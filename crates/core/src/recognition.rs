//! Recognition events and raw platform signals

use serde::{Deserialize, Serialize};

use crate::RecognitionFault;

/// An interim or final utterance fragment forwarded by the capture channel.
/// Consumed once by the orchestrator and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionEvent {
    pub text: String,
    pub is_final: bool,
    /// Strictly increasing across the lifetime of the channel
    pub sequence_index: u64,
}

impl RecognitionEvent {
    /// Final with non-blank text
    pub fn is_actionable(&self) -> bool {
        self.is_final && !self.text.trim().is_empty()
    }
}

/// What the platform recognition facility reports back to the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformSignal {
    /// A recognition result, interim or final
    Result { text: String, is_final: bool },
    /// The recognition session ended on its own
    End,
    /// The recognition session failed
    Error(RecognitionFault),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actionable_requires_final_and_text() {
        let ev = |text: &str, is_final| RecognitionEvent {
            text: text.to_string(),
            is_final,
            sequence_index: 1,
        };
        assert!(ev("hello", true).is_actionable());
        assert!(!ev("hello", false).is_actionable());
        assert!(!ev("   ", true).is_actionable());
        assert!(!ev("", true).is_actionable());
    }
}
