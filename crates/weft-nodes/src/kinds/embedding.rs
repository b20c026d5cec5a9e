use std::path::Path;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use weft_core::error::{Result, WeftError};
use weft_core::state::State;
use weft_core::traits::{NodeContext, NodeKind};
use weft_engine::graph::options_map;
use weft_llm::{estimate_tokens, price_for};

use crate::services::Services;

fn embedding_cost(services: &Services, text: &str) -> f64 {
    price_for(&services.embedding_model())
        .map(|price| price.estimate(estimate_tokens(text), 0))
        .unwrap_or(0.0)
}

/// Embed `texts` in one provider call. Provider failures fail the node.
async fn embed_all(services: &Services, label: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let vectors = services
        .embedder()
        .embed(texts)
        .await
        .map_err(|e| WeftError::node(label, e))?;
    if vectors.len() != texts.len() {
        return Err(WeftError::node(
            label,
            format!("embedded {} texts but got {} vectors", texts.len(), vectors.len()),
        ));
    }
    Ok(vectors)
}

async fn embed_one(services: &Services, label: &str, text: &str) -> Result<Vec<f32>> {
    let mut vectors = embed_all(services, label, &[text.to_string()]).await?;
    vectors
        .pop()
        .ok_or_else(|| WeftError::node(label, "embedding provider returned no vectors"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestOptions {
    /// JSON file of vectors.
    pub filename: String,
    /// One label per line, parallel to `filename`.
    pub label_file: String,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            filename: "index.json".to_string(),
            label_file: "labels.txt".to_string(),
        }
    }
}

/// Replaces the shared index with a saved one.
pub struct EmbeddingsIngestKind {
    options: IngestOptions,
    services: Arc<Services>,
}

impl EmbeddingsIngestKind {
    pub fn new(options: IngestOptions, services: Arc<Services>) -> Self {
        Self { options, services }
    }
}

impl NodeKind for EmbeddingsIngestKind {
    fn kind(&self) -> &'static str {
        "EmbeddingsIngestNode"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let count = self
                .services
                .embeddings
                .load(Path::new(&self.options.filename), Path::new(&self.options.label_file))
                .map_err(|e| WeftError::node(ctx.label, e))?;
            info!(node = %ctx.label, entries = count, "Embeddings ingested");
            Ok(Some(state.result.clone()))
        })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingInOptions {
    /// Split the result on this text and index every non-blank piece.
    /// Empty indexes the whole result as one entry.
    pub separator: String,
}

/// Embeds the working result and adds it to the shared index.
pub struct EmbeddingInKind {
    options: EmbeddingInOptions,
    services: Arc<Services>,
}

impl EmbeddingInKind {
    pub fn new(options: EmbeddingInOptions, services: Arc<Services>) -> Self {
        Self { options, services }
    }

    fn pieces(&self, result: &str) -> Vec<String> {
        if self.options.separator.is_empty() {
            return vec![result.to_string()];
        }
        result
            .split(self.options.separator.as_str())
            .map(str::trim)
            .filter(|piece| !piece.is_empty())
            .map(String::from)
            .collect()
    }
}

impl NodeKind for EmbeddingInKind {
    fn kind(&self) -> &'static str {
        "EmbeddingInNode"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let pieces = self.pieces(&state.result);
            if pieces.is_empty() {
                return Ok(Some(state.result.clone()));
            }
            let vectors = embed_all(&self.services, ctx.label, &pieces).await?;
            for (piece, vector) in pieces.into_iter().zip(vectors) {
                self.services.embeddings.insert(piece, vector);
            }
            debug!(node = %ctx.label, size = self.services.embeddings.len(), "Embeddings inserted");
            Ok(Some(state.result.clone()))
        })
    }

    fn cost(&self, state: &mut State) -> Result<f64> {
        Ok(embedding_cost(&self.services, &state.result))
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingQueryOptions {
    pub n_results: usize,
}

impl Default for EmbeddingQueryOptions {
    fn default() -> Self {
        Self { n_results: 1 }
    }
}

/// Outputs the labels nearest to the working result, one per line.
pub struct EmbeddingQueryKind {
    options: EmbeddingQueryOptions,
    services: Arc<Services>,
}

impl EmbeddingQueryKind {
    pub fn new(options: EmbeddingQueryOptions, services: Arc<Services>) -> Self {
        Self { options, services }
    }
}

impl NodeKind for EmbeddingQueryKind {
    fn kind(&self) -> &'static str {
        "EmbeddingQueryNode"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let query = embed_one(&self.services, ctx.label, &state.result).await?;
            let hits = self.services.embeddings.search(&query, self.options.n_results);
            let labels: Vec<String> = hits.into_iter().map(|(label, _)| label).collect();
            Ok(Some(labels.join("\n")))
        })
    }

    fn cost(&self, state: &mut State) -> Result<f64> {
        Ok(embedding_cost(&self.services, &state.result))
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}
