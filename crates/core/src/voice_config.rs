//! Voice synthesis tuning parameters
//!
//! A fixed, named set of parameters sent verbatim to the synthesis service.
//! Field names are camelCase on the wire; snake_case aliases let the
//! same fields be set from config files and environment variables.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSynthesisConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_model_file", alias = "model_file")]
    pub model_file: String,
    #[serde(default = "default_style")]
    pub style: String,
    #[serde(default = "default_one", alias = "style_weight")]
    pub style_weight: f32,
    #[serde(default = "default_one", alias = "assist_text_weight")]
    pub assist_text_weight: f32,
    #[serde(default = "default_one")]
    pub speed: f32,
    #[serde(default = "default_noise")]
    pub noise: f32,
    #[serde(default = "default_noisew")]
    pub noisew: f32,
    #[serde(default = "default_sdp_ratio", alias = "sdp_ratio")]
    pub sdp_ratio: f32,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_silence_after", alias = "silence_after")]
    pub silence_after: f32,
    #[serde(default = "default_one", alias = "pitch_scale")]
    pub pitch_scale: f32,
    #[serde(default = "default_one", alias = "intonation_scale")]
    pub intonation_scale: f32,
    #[serde(default = "default_model")]
    pub speaker: String,
}

fn default_model() -> String {
    "Matsumura_v1".to_string()
}

fn default_model_file() -> String {
    "model_assets/Matsumura_v1/Matsumura_v1_e100_s1400.safetensors".to_string()
}

fn default_style() -> String {
    "Neutral".to_string()
}

fn default_one() -> f32 {
    1.0
}

fn default_noise() -> f32 {
    0.6
}

fn default_noisew() -> f32 {
    0.8
}

fn default_sdp_ratio() -> f32 {
    0.2
}

fn default_language() -> String {
    "JP".to_string()
}

fn default_silence_after() -> f32 {
    0.5
}

impl Default for VoiceSynthesisConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            model_file: default_model_file(),
            style: default_style(),
            style_weight: default_one(),
            assist_text_weight: default_one(),
            speed: default_one(),
            noise: default_noise(),
            noisew: default_noisew(),
            sdp_ratio: default_sdp_ratio(),
            language: default_language(),
            silence_after: default_silence_after(),
            pitch_scale: default_one(),
            intonation_scale: default_one(),
            speaker: default_model(),
        }
    }
}
