//! Chat completion client
//!
//! Features:
//! - OpenAI-compatible `/chat/completions` backend
//! - Ordered message assembly (system, history, new user text)
//! - Error mapping onto the network/upstream split the call agent reports

pub mod backend;

pub use backend::{build_messages, ChatMessage, OpenAiCompletionClient, OpenAiConfig};

use phone_agent_core::CompletionError;
use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error: HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            LlmError::InvalidResponse(err.to_string())
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for CompletionError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Network(msg) => CompletionError::Network(msg),
            LlmError::Api { status, .. } if status >= 500 => {
                CompletionError::Network(err.to_string())
            }
            other => CompletionError::Upstream(other.to_string()),
        }
    }
}
