//! Two-phase HTTP speech synthesizer
//!
//! Talks to a Style-BERT-VITS2 editor API:
//! 1. `POST /api/g2p` turns text into a mora/tone descriptor
//! 2. `POST /api/synthesis` turns descriptor + text + voice into WAV bytes
//!
//! The descriptor is passed through untouched.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};

use phone_agent_config::SynthesisConfig;
use phone_agent_core::{SpeechError, SpeechSynthesizer, VoiceSynthesisConfig};

use crate::PipelineError;

#[derive(Debug, Clone)]
pub struct SynthesizerConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://matsuap-style-bert-vits2-editor-demo.hf.space".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl From<&SynthesisConfig> for SynthesizerConfig {
    fn from(config: &SynthesisConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

pub struct HttpSpeechSynthesizer {
    config: SynthesizerConfig,
    client: Client,
}

#[derive(Serialize)]
struct G2pRequest<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SynthesisRequest<'a> {
    #[serde(flatten)]
    voice: &'a VoiceSynthesisConfig,
    text: &'a str,
    mora_tone_list: &'a Value,
    assist_text: &'a str,
}

impl HttpSpeechSynthesizer {
    pub fn new(config: SynthesizerConfig) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PipelineError::Http(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn g2p(&self, text: &str) -> Result<Value, PipelineError> {
        let response = self
            .client
            .post(self.url("/api/g2p"))
            .json(&G2pRequest { text })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Remote {
                phase: "g2p",
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        Ok(response.json().await?)
    }

    async fn waveform(
        &self,
        text: &str,
        mora_tone_list: &Value,
        voice: &VoiceSynthesisConfig,
    ) -> Result<Vec<u8>, PipelineError> {
        let request = SynthesisRequest {
            voice,
            text,
            mora_tone_list,
            assist_text: "",
        };

        let response = self
            .client
            .post(self.url("/api/synthesis"))
            .header(reqwest::header::ACCEPT, "audio/wav")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Remote {
                phase: "synthesis",
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(PipelineError::EmptyAudio);
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceSynthesisConfig,
    ) -> Result<Vec<u8>, SpeechError> {
        let start = Instant::now();

        let descriptor = self.g2p(text).await.map_err(|e| {
            tracing::warn!(error = %e, "g2p phase failed");
            SpeechError::Synthesis(e.to_string())
        })?;

        let wav = self
            .waveform(text, &descriptor, voice)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Synthesis phase failed");
                SpeechError::Synthesis(e.to_string())
            })?;

        tracing::info!(
            model = %voice.model,
            bytes = wav.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Speech synthesized"
        );
        Ok(wav)
    }

    fn model_name(&self) -> &str {
        "style-bert-vits2"
    }
}
