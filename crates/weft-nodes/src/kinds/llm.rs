use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use weft_core::config::ModelConfig;
use weft_core::error::Result;
use weft_core::state::State;
use weft_core::traits::{NodeContext, NodeKind};
use weft_core::types::ChatMessage;
use weft_engine::graph::options_map;
use weft_llm::{estimate_tokens, price_for};

use crate::services::{Provider, Services};

/// Request overrides. Unset fields fall back to the `[model]` section, or
/// to the provider's defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Chat completion over the working result, with the state's history as
/// prior turns.
pub struct LlmKind {
    provider: Provider,
    options: LlmOptions,
    services: Arc<Services>,
}

impl LlmKind {
    pub fn new(provider: Provider, options: LlmOptions, services: Arc<Services>) -> Self {
        Self {
            provider,
            options,
            services,
        }
    }

    fn model_config(&self) -> ModelConfig {
        self.services.model_config(
            self.provider,
            self.options.model.as_deref(),
            self.options.max_tokens,
            self.options.temperature,
        )
    }
}

/// History records plus the result as the final user turn. Records with
/// an unknown role are skipped.
pub fn build_messages(state: &State) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = state
        .history
        .iter()
        .filter_map(|entry| {
            let content = entry.get("content")?.clone();
            match entry.get("role").map(String::as_str) {
                Some("system") => Some(ChatMessage::system(content)),
                Some("user") => Some(ChatMessage::user(content)),
                Some("assistant") => Some(ChatMessage::assistant(content)),
                _ => None,
            }
        })
        .collect();
    messages.push(ChatMessage::user(state.result.clone()));
    messages
}

impl NodeKind for LlmKind {
    fn kind(&self) -> &'static str {
        match self.provider {
            Provider::OpenAi => "OpenAINode",
            Provider::Anthropic => "ClaudeNode",
        }
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let config = self.model_config();
            let client = self.services.llm(self.provider, &config);
            info!(node = %ctx.label, model = %config.model_id, "Requesting completion");
            let completion = client.complete(&config, build_messages(state)).await?;
            debug!(
                node = %ctx.label,
                input_tokens = completion.input_tokens,
                output_tokens = completion.output_tokens,
                "Completion received"
            );
            Ok(Some(completion.text))
        })
    }

    /// Prompt tokens at the input price plus `max_tokens` at the output
    /// price. Unknown models cost nothing.
    fn cost(&self, state: &mut State) -> Result<f64> {
        let config = self.model_config();
        let prompt_tokens: usize = build_messages(state)
            .iter()
            .map(|m| estimate_tokens(&m.content))
            .sum();
        Ok(price_for(&config.model_id)
            .map(|price| price.estimate(prompt_tokens, config.max_tokens as usize))
            .unwrap_or(0.0))
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::types::Role;
    use weft_test_utils::{run_kind, MockLlm};

    #[tokio::test]
    async fn test_completion_with_history() {
        let mock = Arc::new(MockLlm::new().with_response("Bonjour"));
        let services = Arc::new(Services::default().with_llm(mock.clone()));
        let kind = LlmKind::new(
            Provider::OpenAi,
            LlmOptions {
                model: Some("gpt-4o".into()),
                ..LlmOptions::default()
            },
            services,
        );

        let mut state = State::with_result("Translate: hello");
        state.push_message("system", "You translate to French.");
        let out = run_kind(&kind, "LLM", &mut state).await.unwrap();
        assert_eq!(out.as_deref(), Some("Bonjour"));

        let requests = mock.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, "gpt-4o");
        let roles: Vec<Role> = requests[0].1.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User]);
        assert_eq!(requests[0].1[1].content, "Translate: hello");
    }

    #[tokio::test]
    async fn test_client_error_fails_node() {
        let services = Arc::new(Services::default().with_llm(Arc::new(MockLlm::new())));
        let kind = LlmKind::new(Provider::Anthropic, LlmOptions::default(), services);
        assert!(run_kind(&kind, "Claude", &mut State::with_result("hi")).await.is_err());
    }

    #[test]
    fn test_cost_uses_price_table() {
        let services = Arc::new(Services::default());
        let kind = LlmKind::new(
            Provider::OpenAi,
            LlmOptions {
                model: Some("gpt-4".into()),
                max_tokens: Some(1000),
                ..LlmOptions::default()
            },
            services.clone(),
        );
        let mut state = State::with_result("hello");
        let cost = kind.cost(&mut state).unwrap();
        // 1000 output tokens at 0.06 per 1K dominate; the prompt adds a little
        assert!(cost > 0.06 && cost < 0.061, "cost was {cost}");

        let unknown = LlmKind::new(
            Provider::OpenAi,
            LlmOptions {
                model: Some("local-llama".into()),
                ..LlmOptions::default()
            },
            services,
        );
        assert_eq!(unknown.cost(&mut state).unwrap(), 0.0);
    }

    #[test]
    fn test_options_skip_unset() {
        let kind = LlmKind::new(Provider::OpenAi, LlmOptions::default(), Arc::new(Services::default()));
        assert!(kind.options().is_empty());
        assert_eq!(kind.kind(), "OpenAINode");
    }
}
