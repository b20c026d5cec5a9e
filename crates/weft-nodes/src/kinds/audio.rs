use std::path::Path;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::info;

use weft_core::error::{Result, WeftError};
use weft_core::state::State;
use weft_core::traits::{NodeContext, NodeKind};
use weft_engine::graph::options_map;
use weft_llm::OpenAiClient;

use super::http::client;
use crate::services::{Provider, Services};

/// Transcription price in USD per minute of audio.
pub const WHISPER_PRICE_PER_MINUTE: f64 = 0.006;

/// Speech synthesis overage price in USD per 1000 characters.
pub const ELEVENLABS_PRICE_PER_1K_CHARS: f64 = 0.30;

/// Environment variable holding the ElevenLabs key.
pub const ELEVENLABS_KEY_VAR: &str = "ELEVENLABS_API_KEY";

/// Duration in seconds of a RIFF/WAVE file, from its `fmt ` byte rate and
/// `data` chunk size.
pub fn wav_duration(bytes: &[u8]) -> Option<f64> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return None;
    }
    let u32_at = |at: usize| -> Option<u32> {
        let b = bytes.get(at..at + 4)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    };

    let mut byte_rate = None;
    let mut pos = 12;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = u32_at(pos + 4)? as usize;
        let body = pos + 8;
        match id {
            b"fmt " => byte_rate = u32_at(body + 8),
            b"data" => {
                let rate = byte_rate.filter(|r| *r > 0)?;
                // Truncated files report the bytes actually present
                let available = bytes.len().saturating_sub(body).min(size);
                return Some(available as f64 / rate as f64);
            }
            _ => {}
        }
        // Chunks are padded to even sizes
        pos = body + size + (size & 1);
    }
    None
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WhispersOptions {
    /// WAV file to transcribe. Packaged with the flowchart on save.
    pub filename: String,
}

/// Speech-to-text through the OpenAI-compatible transcription endpoint.
pub struct WhispersKind {
    options: WhispersOptions,
    services: Arc<Services>,
}

impl WhispersKind {
    pub fn new(options: WhispersOptions, services: Arc<Services>) -> Self {
        Self { options, services }
    }
}

impl NodeKind for WhispersKind {
    fn kind(&self) -> &'static str {
        "WhispersNode"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, _state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let config = self.services.model_config(Provider::OpenAi, None, None, None);
            info!(node = %ctx.label, file = %self.options.filename, "Transcribing audio");
            let text = OpenAiClient::new()
                .transcribe(&config, Path::new(&self.options.filename))
                .await?;
            Ok(Some(text))
        })
    }

    fn cost(&self, _state: &mut State) -> Result<f64> {
        let bytes = std::fs::read(&self.options.filename)?;
        let seconds = wav_duration(&bytes)
            .ok_or_else(|| WeftError::MalformedFile(format!("{} is not a WAV file", self.options.filename)))?;
        Ok(seconds / 60.0 * WHISPER_PRICE_PER_MINUTE)
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElevenLabsOptions {
    /// Voice id. The default is the stock "Bella" voice.
    pub voice: String,
    pub model: String,
    /// Where the synthesized MP3 is written.
    pub filename: String,
    pub base_url: String,
}

impl Default for ElevenLabsOptions {
    fn default() -> Self {
        Self {
            voice: "EXAVITQu4vr4xnSDxMaL".to_string(),
            model: "eleven_monolingual_v1".to_string(),
            filename: "speech.mp3".to_string(),
            base_url: "https://api.elevenlabs.io".to_string(),
        }
    }
}

/// Text-to-speech. Writes the audio for the working result to `filename`
/// and passes the result through.
pub struct ElevenLabsKind {
    options: ElevenLabsOptions,
}

impl ElevenLabsKind {
    pub fn new(options: ElevenLabsOptions) -> Self {
        Self { options }
    }

    async fn synthesize(&self, label: &str, text: &str) -> Result<Vec<u8>> {
        let api_key = std::env::var(ELEVENLABS_KEY_VAR)
            .map_err(|_| WeftError::node(label, format!("{ELEVENLABS_KEY_VAR} is not set")))?;
        let url = format!(
            "{}/v1/text-to-speech/{}",
            self.options.base_url.trim_end_matches('/'),
            self.options.voice
        );
        let resp = client(label)?
            .post(&url)
            .header("xi-api-key", api_key)
            .header(reqwest::header::ACCEPT, "audio/mpeg")
            .json(&serde_json::json!({"text": text, "model_id": self.options.model}))
            .send()
            .await
            .map_err(|e| WeftError::Http(format!("{label}: speech request failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(WeftError::Http(format!("{label}: HTTP {status}: {body}")));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| WeftError::Http(format!("{label}: failed to read audio: {e}")))?;
        Ok(bytes.to_vec())
    }
}

impl NodeKind for ElevenLabsKind {
    fn kind(&self) -> &'static str {
        "ElevenLabsNode"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let audio = self.synthesize(ctx.label, &state.result).await?;
            tokio::fs::write(&self.options.filename, &audio)
                .await
                .map_err(|e| WeftError::node(ctx.label, format!("cannot write {}: {e}", self.options.filename)))?;
            info!(node = %ctx.label, file = %self.options.filename, bytes = audio.len(), "Speech written");
            Ok(Some(state.result.clone()))
        })
    }

    fn cost(&self, state: &mut State) -> Result<f64> {
        Ok(ELEVENLABS_PRICE_PER_1K_CHARS * state.result.chars().count() as f64 / 1000.0)
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}
