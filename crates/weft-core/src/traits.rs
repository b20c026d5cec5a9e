use futures::future::BoxFuture;

use crate::config::ModelConfig;
use crate::console::Console;
use crate::error::Result;
use crate::state::State;
use crate::text::SharedText;
use crate::types::{ChatMessage, Completion, StopHandle};

/// What a node body sees of the engine while it runs.
#[derive(Clone, Copy)]
pub struct NodeContext<'a> {
    /// Display label of the node being run.
    pub label: &'a str,
    pub console: &'a dyn Console,
    /// The running flowchart's cancellation flag.
    pub stop: &'a StopHandle,
}

/// Per-variant behaviour of a node. Identity, position and edges live on
/// the engine's `Node`; a kind only carries its own configuration.
pub trait NodeKind: Send + Sync + 'static {
    /// Registry discriminator, written as `classname` in saved files.
    fn kind(&self) -> &'static str;

    /// Execute the node body. `Ok(None)` is the termination signal: the
    /// run ends normally without following this node's connectors.
    fn run<'a>(
        &'a self,
        ctx: NodeContext<'a>,
        state: &'a mut State,
    ) -> BoxFuture<'a, Result<Option<String>>>;

    /// Estimated monetary cost (USD) of running the node against `state`.
    /// Must not perform the node's side effect.
    fn cost(&self, state: &mut State) -> Result<f64> {
        let _ = state;
        Ok(0.0)
    }

    /// Kind-specific fields, stored alongside the common node record.
    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        serde_json::Map::new()
    }

    /// Text fragments owned by this node, registered with the flowchart.
    fn text_data(&self) -> Vec<SharedText> {
        Vec::new()
    }

    /// True once a one-shot kind has run and will only signal termination.
    fn spent(&self) -> bool {
        false
    }
}

/// LLM client, non-streaming.
pub trait LlmClient: Send + Sync + 'static {
    fn complete(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<Completion>>;
}

/// Embedding providers (OpenAI-compatible APIs).
pub trait EmbeddingProvider: Send + Sync + 'static {
    /// Embed a batch of texts into vectors.
    fn embed(&self, texts: &[String]) -> BoxFuture<'_, Result<Vec<Vec<f32>>>>;
    /// Number of dimensions in the embedding vectors.
    fn dimensions(&self) -> usize;
}
