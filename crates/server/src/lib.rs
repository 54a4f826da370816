//! Phone Agent Server
//!
//! HTTP and WebSocket endpoints for the phone call agent. The browser-side
//! phone UI connected over `/ws` acts as the speech recognizer and the
//! speaker for its call.

pub mod http;
pub mod metrics;
pub mod state;
pub mod websocket;

pub use http::create_router;
pub use metrics::{init_metrics, metrics_handler};
pub use state::AppState;
pub use websocket::{ClientMessage, ServerMessage, WebSocketHandler};

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] phone_agent_config::ConfigError),

    #[error("Completion backend error: {0}")]
    Completion(#[from] phone_agent_llm::LlmError),

    #[error("Synthesis backend error: {0}")]
    Synthesis(#[from] phone_agent_pipeline::PipelineError),
}
