use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::BoxFuture;

use weft_core::config::ModelConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::{EmbeddingProvider, LlmClient};
use weft_core::types::{ChatMessage, Completion};

/// LLM client that replays canned completions and records every request.
#[derive(Debug, Default)]
pub struct MockLlm {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<(String, Vec<ChatMessage>)>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(text.into());
        self
    }

    /// `(model_id, messages)` for each request, in order.
    pub fn requests(&self) -> Vec<(String, Vec<ChatMessage>)> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl LlmClient for MockLlm {
    fn complete(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<Completion>> {
        let model = config.model_id.clone();
        Box::pin(async move {
            let input_tokens = messages.iter().map(|m| m.content.split_whitespace().count() as u64).sum();
            self.requests
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((model, messages));
            let text = self
                .responses
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front()
                .ok_or_else(|| WeftError::LlmRequest("mock has no responses left".into()))?;
            Ok(Completion {
                output_tokens: text.split_whitespace().count() as u64,
                text,
                input_tokens,
            })
        })
    }
}

/// Deterministic embedder: a letter-frequency vector over a-z.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockEmbedder;

impl MockEmbedder {
    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; 26];
        for c in text.to_lowercase().chars() {
            if c.is_ascii_lowercase() {
                v[(c as u8 - b'a') as usize] += 1.0;
            }
        }
        v
    }
}

impl EmbeddingProvider for MockEmbedder {
    fn embed(&self, texts: &[String]) -> BoxFuture<'_, Result<Vec<Vec<f32>>>> {
        let vectors = texts.iter().map(|t| Self::vector(t)).collect();
        Box::pin(async move { Ok(vectors) })
    }

    fn dimensions(&self) -> usize {
        26
    }
}
