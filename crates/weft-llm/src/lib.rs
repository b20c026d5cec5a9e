pub mod pricing;
pub mod providers;
pub mod retry;
pub mod tokens;

use std::sync::Arc;

use weft_core::config::ModelConfig;
use weft_core::traits::LlmClient;

pub use pricing::{price_for, ModelPrice};
pub use providers::anthropic::AnthropicClient;
pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;
pub use tokens::estimate_tokens;

/// Create an LLM client based on the provider name, wrapped in retries
/// when the config asks for them.
pub fn create_client(config: &ModelConfig) -> Arc<dyn LlmClient> {
    let base: Box<dyn LlmClient> = match config.provider.as_str() {
        "anthropic" | "claude" => Box::new(AnthropicClient::new()),
        // Everything else uses the OpenAI-compatible client
        _ => Box::new(OpenAiClient::new()),
    };
    match &config.retry {
        Some(retry) => Arc::new(RetryingClient::new(base, retry.clone())),
        None => Arc::from(base),
    }
}
