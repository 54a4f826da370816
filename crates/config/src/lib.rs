//! Configuration management for the phone call agent
//!
//! Supports loading configuration from:
//! - TOML/YAML files under `config/`
//! - Environment variables (PHONE_AGENT_ prefix, `__` separator)
//!
//! The contact directory is read-only and built from the `contacts` section.

pub mod phonebook;
pub mod settings;

pub use phonebook::{normalize_number, Contact, DialError, Phonebook, NOT_IN_SERVICE_MESSAGE};
pub use settings::{
    load_settings, load_settings_from, CallConfig, CaptureConfig, CompletionConfig,
    ObservabilityConfig, RuntimeEnvironment, ServerConfig, Settings, SynthesisConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
