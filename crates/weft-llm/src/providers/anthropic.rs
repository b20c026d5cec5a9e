use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use weft_core::config::ModelConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::LlmClient;
use weft_core::types::{ChatMessage, Completion, Role};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API client.
pub struct AnthropicClient {
    http: Client,
}

impl AnthropicClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for AnthropicClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
pub(crate) struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize, Debug)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    usage: Option<ResponseUsage>,
}

#[derive(Deserialize, Debug)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ResponseUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// System messages are lifted into the top-level `system` field.
fn convert_messages(messages: Vec<ChatMessage>) -> (Option<String>, Vec<ApiMessage>) {
    let mut system: Option<String> = None;
    let mut api_messages = Vec::new();
    for msg in messages {
        match msg.role {
            Role::System => {
                system = Some(match system {
                    Some(prev) => format!("{prev}\n\n{}", msg.content),
                    None => msg.content,
                });
            }
            role => api_messages.push(ApiMessage {
                role: role.as_str(),
                content: msg.content,
            }),
        }
    }
    (system, api_messages)
}

pub(crate) fn build_request(config: &ModelConfig, messages: Vec<ChatMessage>) -> AnthropicRequest {
    let (system, messages) = convert_messages(messages);
    AnthropicRequest {
        model: config.model_id.clone(),
        max_tokens: config.max_tokens,
        temperature: if config.temperature > 0.0 {
            Some(config.temperature)
        } else {
            None
        },
        messages,
        system,
    }
}

fn parse_response(body: AnthropicResponse) -> Completion {
    let text = body
        .content
        .into_iter()
        .filter(|b| b.kind == "text")
        .filter_map(|b| b.text)
        .collect::<Vec<_>>()
        .join("");
    let (input_tokens, output_tokens) = body
        .usage
        .map(|u| (u.input_tokens, u.output_tokens))
        .unwrap_or_default();
    Completion {
        text,
        input_tokens,
        output_tokens,
    }
}

impl LlmClient for AnthropicClient {
    fn complete(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<Completion>> {
        let config = config.clone();

        Box::pin(async move {
            let api_key = config
                .api_key
                .as_deref()
                .ok_or_else(|| WeftError::Config("Anthropic API key not set".into()))?;
            let url = config.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL);
            let body = build_request(&config, messages);

            debug!(model = %config.model_id, "Sending Anthropic message");
            let response = self
                .http
                .post(url)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&body)
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

            let body: AnthropicResponse = response
                .json()
                .await
                .map_err(|e| WeftError::LlmRequest(format!("bad response: {e}")))?;
            Ok(parse_response(body))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_lifted() {
        let config = ModelConfig {
            model_id: "claude-3-haiku-20240307".into(),
            temperature: 0.0,
            ..ModelConfig::default()
        };
        let req = build_request(
            &config,
            vec![ChatMessage::system("rules"), ChatMessage::user("hi")],
        );
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["system"], "rules");
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_parse_joins_text_blocks() {
        let body: AnthropicResponse = serde_json::from_value(serde_json::json!({
            "content": [{"type": "text", "text": "Hel"}, {"type": "text", "text": "lo"}],
            "usage": {"input_tokens": 5, "output_tokens": 2}
        }))
        .unwrap();
        let out = parse_response(body);
        assert_eq!(out.text, "Hello");
        assert_eq!(out.output_tokens, 2);
    }
}
