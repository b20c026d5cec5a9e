use std::path::Path;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use weft_core::config::ModelConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::LlmClient;
use weft_core::types::{ChatMessage, Completion};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
/// `base_url` is the API root (`.../v1`).
pub struct OpenAiClient {
    http: Client,
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }

    /// Speech-to-text through the `/audio/transcriptions` endpoint.
    pub async fn transcribe(&self, config: &ModelConfig, audio: &Path) -> Result<String> {
        let base = config.base_url.as_deref().unwrap_or(OPENAI_API_BASE);
        let url = format!("{}/audio/transcriptions", base.trim_end_matches('/'));
        let bytes = tokio::fs::read(audio).await?;
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.wav".to_string());

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new()
            .text("model", "whisper-1")
            .part("file", part);

        let mut req = self.http.post(&url).multipart(form);
        if let Some(api_key) = &config.api_key {
            req = req.bearer_auth(api_key);
        }
        let response = req
            .send()
            .await
            .map_err(|e| WeftError::LlmRequest(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(WeftError::LlmRequest(format!("HTTP {}: {}", status, body)));
        }
        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| WeftError::LlmRequest(format!("bad transcription response: {e}")))?;
        Ok(body.text)
    }

    /// Text-to-image through `/images/generations`. Returns the URL of the
    /// single generated image.
    pub async fn generate_image(&self, config: &ModelConfig, prompt: &str, size: &str) -> Result<String> {
        let base = config.base_url.as_deref().unwrap_or(OPENAI_API_BASE);
        let url = format!("{}/images/generations", base.trim_end_matches('/'));
        let request = ImageRequest {
            model: &config.model_id,
            prompt,
            n: 1,
            size,
        };
        debug!(model = %config.model_id, size, "Sending image request");

        let mut req = self.http.post(&url).json(&request);
        if let Some(api_key) = &config.api_key {
            req = req.bearer_auth(api_key);
        }
        let response = req
            .send()
            .await
            .map_err(|e| WeftError::LlmRequest(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(WeftError::LlmRequest(format!("HTTP {}: {}", status, body)));
        }
        let body: ImageResponse = response
            .json()
            .await
            .map_err(|e| WeftError::LlmRequest(format!("bad image response: {e}")))?;
        body.data
            .into_iter()
            .find_map(|image| image.url)
            .ok_or_else(|| WeftError::LlmRequest("image response carried no URL".into()))
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

// Request types
#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'a str,
}

#[derive(Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    url: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
pub(crate) struct OaiMessage {
    role: &'static str,
    content: String,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Deserialize, Debug)]
struct TranscriptionResponse {
    text: String,
}

pub(crate) fn build_request(config: &ModelConfig, messages: Vec<ChatMessage>) -> ChatRequest {
    // o-series models reject temperature
    let is_o_series = config.model_id.starts_with("o1")
        || config.model_id.starts_with("o3")
        || config.model_id.starts_with("o4");
    ChatRequest {
        model: config.model_id.clone(),
        messages: messages
            .into_iter()
            .map(|m| OaiMessage {
                role: m.role.as_str(),
                content: m.content,
            })
            .collect(),
        max_tokens: config.max_tokens,
        temperature: if is_o_series { None } else { Some(config.temperature) },
    }
}

fn parse_response(body: ChatResponse) -> Result<Completion> {
    let text = body
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| WeftError::LlmRequest("response has no choices".into()))?;
    let (input_tokens, output_tokens) = body
        .usage
        .map(|u| (u.prompt_tokens, u.completion_tokens))
        .unwrap_or_default();
    Ok(Completion {
        text,
        input_tokens,
        output_tokens,
    })
}

impl LlmClient for OpenAiClient {
    fn complete(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<Completion>> {
        let config = config.clone();

        Box::pin(async move {
            let base = config.base_url.as_deref().unwrap_or(OPENAI_API_BASE);
            let url = format!("{}/chat/completions", base.trim_end_matches('/'));
            let body = build_request(&config, messages);

            let mut req = self.http.post(&url).json(&body);
            if let Some(api_key) = &config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            debug!(model = %config.model_id, url = %url, "Sending chat completion");
            let response = req
                .send()
                .await
                .map_err(|e| WeftError::LlmRequest(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown error".to_string());
                return Err(WeftError::LlmRequest(format!("HTTP {}: {}", status, body)));
            }

            let body: ChatResponse = response
                .json()
                .await
                .map_err(|e| WeftError::LlmRequest(format!("bad response: {e}")))?;
            parse_response(body)
        })
    }
}
