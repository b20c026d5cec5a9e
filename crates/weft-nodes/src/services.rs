use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use weft_core::config::{AppConfig, EmbeddingConfig, ModelConfig};
use weft_core::traits::{EmbeddingProvider, LlmClient};
use weft_memory::{DbPool, EmbeddingIndex, HttpEmbeddingProvider};

/// LLM backend a node talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-4o-mini",
            Provider::Anthropic => "claude-3-haiku-20240307",
        }
    }

    /// Environment variable read for the API key when config has none.
    pub fn key_var(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    fn matches(&self, name: &str) -> bool {
        let anthropic = matches!(name, "anthropic" | "claude");
        match self {
            Provider::Anthropic => anthropic,
            Provider::OpenAi => !anthropic,
        }
    }
}

/// Collaborators shared by every node built from one registry: the
/// database pool, the embedding index and the LLM/embedding clients.
pub struct Services {
    pub config: AppConfig,
    pub db: Arc<DbPool>,
    pub embeddings: Arc<EmbeddingIndex>,
    llm_override: Option<Arc<dyn LlmClient>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    clients: RwLock<HashMap<&'static str, Arc<dyn LlmClient>>>,
}

impl Services {
    pub fn new(config: AppConfig) -> Self {
        let db = Arc::new(DbPool::new(config.database.path.clone()));
        Self {
            config,
            db,
            embeddings: Arc::new(EmbeddingIndex::new()),
            llm_override: None,
            embedder: None,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Route every LLM request through `client`, whatever the provider.
    pub fn with_llm(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.llm_override = Some(client);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Request settings for `provider`. The `[model]` section applies when
    /// it names the same provider; node options override it.
    pub fn model_config(
        &self,
        provider: Provider,
        model: Option<&str>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> ModelConfig {
        let mut config = match &self.config.model {
            Some(m) if provider.matches(&m.provider) => m.clone(),
            _ => ModelConfig {
                provider: provider.as_str().to_string(),
                model_id: provider.default_model().to_string(),
                ..ModelConfig::default()
            },
        };
        if let Some(model) = model {
            config.model_id = model.to_string();
        }
        if let Some(max_tokens) = max_tokens {
            config.max_tokens = max_tokens;
        }
        if let Some(temperature) = temperature {
            config.temperature = temperature;
        }
        // Read at request time so an EnvNode earlier in the run can supply it
        if config.api_key.is_none() {
            config.api_key = std::env::var(provider.key_var()).ok();
        }
        config
    }

    /// Client for `provider`, created on first use.
    pub fn llm(&self, provider: Provider, config: &ModelConfig) -> Arc<dyn LlmClient> {
        if let Some(client) = &self.llm_override {
            return client.clone();
        }
        if let Some(client) = self
            .clients
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(provider.as_str())
        {
            return client.clone();
        }
        debug!(provider = provider.as_str(), "Creating LLM client");
        let client = weft_llm::create_client(config);
        self.clients
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(provider.as_str(), client.clone());
        client
    }

    fn embedding_config(&self) -> EmbeddingConfig {
        let mut config = self.config.embedding.clone().unwrap_or_default();
        if config.api_key.is_none() {
            config.api_key = std::env::var(Provider::OpenAi.key_var()).ok();
        }
        config
    }

    pub fn embedder(&self) -> Arc<dyn EmbeddingProvider> {
        match &self.embedder {
            Some(embedder) => embedder.clone(),
            None => Arc::new(HttpEmbeddingProvider::from_config(&self.embedding_config())),
        }
    }

    /// Model id used for embedding price estimates.
    pub fn embedding_model(&self) -> String {
        self.config.embedding.clone().unwrap_or_default().model
    }
}

impl Default for Services {
    fn default() -> Self {
        Self::new(AppConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_test_utils::MockLlm;

    #[test]
    fn test_model_config_uses_matching_section() {
        let mut config = AppConfig::default();
        config.model = Some(ModelConfig {
            provider: "anthropic".into(),
            model_id: "claude-3-5-sonnet-latest".into(),
            api_key: Some("k".into()),
            ..ModelConfig::default()
        });
        let services = Services::new(config);

        let claude = services.model_config(Provider::Anthropic, None, Some(64), None);
        assert_eq!(claude.model_id, "claude-3-5-sonnet-latest");
        assert_eq!(claude.max_tokens, 64);

        let openai = services.model_config(Provider::OpenAi, Some("gpt-4o"), None, None);
        assert_eq!(openai.provider, "openai");
        assert_eq!(openai.model_id, "gpt-4o");
    }

    #[test]
    fn test_llm_override_wins() {
        let mock: Arc<dyn LlmClient> = Arc::new(MockLlm::new());
        let services = Services::default().with_llm(mock.clone());
        let config = services.model_config(Provider::OpenAi, None, None, None);
        assert!(Arc::ptr_eq(&services.llm(Provider::OpenAi, &config), &mock));
    }

    #[test]
    fn test_clients_are_cached() {
        let services = Services::default();
        let config = services.model_config(Provider::OpenAi, None, None, None);
        let a = services.llm(Provider::OpenAi, &config);
        let b = services.llm(Provider::OpenAi, &config);
        assert!(Arc::ptr_eq(&a, &b));
    }
}
