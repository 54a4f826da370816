//! Application State
//!
//! Shared across all handlers. Each WebSocket connection builds its own
//! orchestrator from the clients held here.

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use phone_agent_config::{Phonebook, Settings};
use phone_agent_core::{CompletionClient, SpeechSynthesizer};
use phone_agent_llm::{OpenAiCompletionClient, OpenAiConfig};
use phone_agent_pipeline::{HttpSpeechSynthesizer, SynthesizerConfig};

use crate::ServerError;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub phonebook: Arc<Phonebook>,
    pub completion: Arc<dyn CompletionClient>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Build state with the HTTP completion and synthesis backends
    pub fn new(config: Settings) -> Result<Self, ServerError> {
        let completion = OpenAiCompletionClient::new(OpenAiConfig::from(&config.completion))?;
        let synthesizer = HttpSpeechSynthesizer::new(SynthesizerConfig::from(&config.synthesis))?;
        Ok(Self::with_clients(
            config,
            Arc::new(completion),
            Arc::new(synthesizer),
        ))
    }

    /// Build state around caller-supplied backends
    pub fn with_clients(
        config: Settings,
        completion: Arc<dyn CompletionClient>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        let phonebook = Phonebook::new(config.contacts.clone());
        Self {
            config: Arc::new(config),
            phonebook: Arc::new(phonebook),
            completion,
            synthesizer,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.metrics = handle;
        self
    }

    /// System prompt for a call to the given contact prompt
    pub fn system_prompt_for(&self, contact_prompt: &str) -> String {
        if contact_prompt.is_empty() {
            self.config.call.default_system_prompt.clone()
        } else {
            contact_prompt.to_string()
        }
    }
}
