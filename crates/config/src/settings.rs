//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use phone_agent_core::VoiceSynthesisConfig;

use crate::phonebook::{normalize_number, Contact};
use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation
    #[default]
    Development,
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// HTTP/WebSocket server
    #[serde(default)]
    pub server: ServerConfig,

    /// Chat completion backend
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Speech synthesis backend and voice
    #[serde(default)]
    pub synthesis: SynthesisConfig,

    /// Speech capture
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Turn-cycle behaviour
    #[serde(default)]
    pub call: CallConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Dialable contacts
    #[serde(default)]
    pub contacts: Vec<Contact>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_completion()?;
        self.validate_synthesis()?;
        self.validate_capture()?;
        self.validate_contacts()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port cannot be 0".to_string(),
            });
        }
        Ok(())
    }

    fn validate_completion(&self) -> Result<(), ConfigError> {
        let completion = &self.completion;

        if completion.endpoint.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "completion.endpoint".to_string(),
                message: "Endpoint cannot be empty".to_string(),
            });
        }

        if completion.model.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "completion.model".to_string(),
                message: "Model cannot be empty".to_string(),
            });
        }

        if completion.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "completion.timeout_secs".to_string(),
                message: "Timeout must be at least 1 second".to_string(),
            });
        }

        if let Some(temperature) = completion.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ConfigError::InvalidValue {
                    field: "completion.temperature".to_string(),
                    message: format!("Must be between 0.0 and 2.0, got {}", temperature),
                });
            }
        }

        let missing_key = completion
            .api_key
            .as_deref()
            .map(|k| k.trim().is_empty())
            .unwrap_or(true);
        if missing_key {
            if self.environment.is_production() {
                return Err(ConfigError::MissingField("completion.api_key".to_string()));
            }
            tracing::warn!("No completion API key configured; requests will be unauthenticated");
        }

        Ok(())
    }

    fn validate_synthesis(&self) -> Result<(), ConfigError> {
        let synthesis = &self.synthesis;

        if synthesis.base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "synthesis.base_url".to_string(),
                message: "Base URL cannot be empty".to_string(),
            });
        }

        if synthesis.voice.speed <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "synthesis.voice.speed".to_string(),
                message: format!("Speed must be positive, got {}", synthesis.voice.speed),
            });
        }

        if synthesis.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "synthesis.timeout_secs".to_string(),
                message: "Timeout must be at least 1 second".to_string(),
            });
        }

        Ok(())
    }

    fn validate_capture(&self) -> Result<(), ConfigError> {
        if self.capture.language.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "capture.language".to_string(),
                message: "Recognition language cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    fn validate_contacts(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for contact in &self.contacts {
            let number = normalize_number(&contact.number);
            if number.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "contacts.number".to_string(),
                    message: format!("Contact '{}' has no number", contact.name),
                });
            }
            if !seen.insert(number) {
                return Err(ConfigError::InvalidValue {
                    field: "contacts.number".to_string(),
                    message: format!("Duplicate number {}", contact.number),
                });
            }
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Enable permissive CORS for the browser phone UI
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: true,
        }
    }
}

/// Chat completion backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_completion_endpoint")]
    pub endpoint: String,

    /// Bearer credential
    #[serde(default = "default_api_key")]
    pub api_key: Option<String>,

    #[serde(default = "default_completion_model")]
    pub model: String,

    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_completion_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key() -> Option<String> {
    std::env::var("OPENAI_API_KEY").ok()
}

fn default_completion_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_completion_timeout() -> u64 {
    30
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_completion_endpoint(),
            api_key: default_api_key(),
            model: default_completion_model(),
            timeout_secs: default_completion_timeout(),
            max_tokens: None,
            temperature: None,
        }
    }
}

/// Speech synthesis backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Base URL of the Style-BERT-VITS2 editor API
    #[serde(default = "default_synthesis_base_url")]
    pub base_url: String,

    #[serde(default = "default_synthesis_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub voice: VoiceSynthesisConfig,
}

fn default_synthesis_base_url() -> String {
    "https://matsuap-style-bert-vits2-editor-demo.hf.space".to_string()
}

fn default_synthesis_timeout() -> u64 {
    60
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            base_url: default_synthesis_base_url(),
            timeout_secs: default_synthesis_timeout(),
            voice: VoiceSynthesisConfig::default(),
        }
    }
}

/// Speech capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// BCP-47 recognition language, fixed for the whole call
    #[serde(default = "default_capture_language")]
    pub language: String,

    /// Restart recognition when the platform ends a session on its own
    #[serde(default = "default_true")]
    pub auto_restart: bool,
}

fn default_capture_language() -> String {
    "ja-JP".to_string()
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            language: default_capture_language(),
            auto_restart: true,
        }
    }
}

/// Turn-cycle configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CallConfig {
    /// Extra attempts for a failed completion before giving up on the
    /// utterance. 0 means the caller has to speak again.
    #[serde(default)]
    pub completion_retries: u32,

    /// System prompt for calls placed without a contact
    #[serde(default)]
    pub default_system_prompt: String,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

/// Load settings from `config/` relative to the working directory
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    load_settings_from(Path::new("config"), env)
}

/// Load settings from files in `dir`, then environment variables
pub fn load_settings_from(dir: &Path, env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    // Load default config
    let default_path = dir.join("default");
    builder = builder.add_source(File::with_name(&default_path.to_string_lossy()).required(false));

    // Load environment-specific config
    if let Some(env_name) = env {
        let env_path = dir.join(env_name);
        builder = builder.add_source(File::with_name(&env_path.to_string_lossy()).required(false));
    }

    // Load from environment variables
    builder = builder.add_source(
        Environment::with_prefix("PHONE_AGENT")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
