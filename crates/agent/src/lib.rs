//! Turn orchestration for voice calls
//!
//! Features:
//! - One actor task per orchestrator owning the call session
//! - Strictly serialised turn cycle: listen, think, speak, listen
//! - Late results from ended or replaced calls are discarded
//! - Manual replay of assistant audio outside the turn cycle

pub mod orchestrator;

pub use orchestrator::{CallHandle, CallOrchestrator, OrchestratorConfig};

use phone_agent_core::SpeechError;
use thiserror::Error;

/// Errors returned from the public call actions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("No active call")]
    NoActiveCall,

    #[error("Turn {index} out of range (history has {len} turns)")]
    TurnIndexOutOfRange { index: usize, len: usize },

    #[error("Turn {0} has no replayable audio")]
    NotReplayable(usize),

    #[error("Orchestrator stopped")]
    Stopped,

    #[error("Replay failed: {0}")]
    Replay(#[from] SpeechError),
}
