//! Client for OpenAI-compatible `/embeddings` endpoints (OpenAI, Ollama,
//! vLLM). Inputs are sent in batches of `batch_size` and every vector is
//! checked against the configured dimensions.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::debug;

use weft_core::config::EmbeddingConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::EmbeddingProvider;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    /// Position of the input this vector belongs to. Some servers omit it
    /// and answer in input order.
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    config: EmbeddingConfig,
}

impl HttpEmbeddingProvider {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let mut config = config.clone();
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        config.batch_size = config.batch_size.max(1);
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.config.base_url);
        let mut req = self.client.post(&url).json(&EmbeddingRequest {
            model: &self.config.model,
            input: batch,
        });
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| WeftError::Http(format!("embedding request to {url} failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(WeftError::Http(format!("embedding endpoint returned {status}: {body}")));
        }
        let body: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| WeftError::Http(format!("unreadable embedding response: {e}")))?;

        self.check(batch.len(), body.data)
    }

    /// Put vectors back in input order and enforce count and dimensions.
    fn check(&self, expected: usize, mut data: Vec<EmbeddingData>) -> Result<Vec<Vec<f32>>> {
        if data.len() != expected {
            return Err(WeftError::Http(format!(
                "sent {expected} texts but received {} embeddings",
                data.len()
            )));
        }
        if data.iter().all(|d| d.index.is_some()) {
            data.sort_by_key(|d| d.index);
        }
        let dims = self.config.dims;
        if let Some(bad) = data.iter().find(|d| dims > 0 && d.embedding.len() != dims) {
            return Err(WeftError::Http(format!(
                "{} returned {}-dimensional vectors, expected {dims}",
                self.config.model,
                bad.embedding.len()
            )));
        }
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

impl EmbeddingProvider for HttpEmbeddingProvider {
    fn embed(&self, texts: &[String]) -> BoxFuture<'_, Result<Vec<Vec<f32>>>> {
        let texts = texts.to_vec();
        Box::pin(async move {
            let mut vectors = Vec::with_capacity(texts.len());
            for batch in texts.chunks(self.config.batch_size) {
                debug!(model = %self.config.model, size = batch.len(), "Embedding batch");
                vectors.extend(self.embed_batch(batch).await?);
            }
            Ok(vectors)
        })
    }

    fn dimensions(&self) -> usize {
        self.config.dims
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};

    use super::*;

    /// Answers each input with `[len, position]`, listed in reverse order.
    async fn serve(dims: usize) -> (String, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/embeddings",
                post(
                    move |State(calls): State<Arc<AtomicUsize>>, Json(body): Json<serde_json::Value>| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let inputs = body["input"].as_array().cloned().unwrap_or_default();
                        let data: Vec<serde_json::Value> = inputs
                            .iter()
                            .enumerate()
                            .rev()
                            .map(|(i, text)| {
                                let len = text.as_str().unwrap_or_default().len() as f32;
                                let mut vector = vec![len, i as f32];
                                vector.resize(dims, 0.0);
                                serde_json::json!({"index": i, "embedding": vector})
                            })
                            .collect();
                        Json(serde_json::json!({"data": data}))
                    },
                ),
            )
            .with_state(calls.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        (format!("http://{addr}/"), calls)
    }

    fn config(base_url: String, dims: usize, batch_size: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            base_url,
            model: "test-embed".into(),
            dims,
            batch_size,
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_batches_keep_input_order() {
        let (url, calls) = serve(2).await;
        let provider = HttpEmbeddingProvider::from_config(&config(url, 2, 2));
        let texts: Vec<String> = ["a", "bb", "ccc", "dddd", "eeeee"].iter().map(|s| s.to_string()).collect();

        let vectors = provider.embed(&texts).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let lengths: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
        assert_eq!(lengths, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dimension_mismatch_is_error() {
        let (url, _) = serve(3).await;
        let provider = HttpEmbeddingProvider::from_config(&config(url, 8, 16));
        let err = provider.embed(&["x".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("3-dimensional vectors, expected 8"), "{err}");
    }

    #[test]
    fn test_from_config_normalises() {
        let provider = HttpEmbeddingProvider::from_config(&config("http://localhost:11434/v1/".into(), 768, 0));
        assert_eq!(provider.config.base_url, "http://localhost:11434/v1");
        assert_eq!(provider.config.batch_size, 1);
        assert_eq!(provider.model(), "test-embed");
        assert_eq!(provider.dimensions(), 768);
    }

    #[test]
    fn test_unindexed_data_keeps_server_order() {
        let provider = HttpEmbeddingProvider::from_config(&config("http://unused".into(), 0, 4));
        let data = vec![
            EmbeddingData { index: None, embedding: vec![1.0] },
            EmbeddingData { index: None, embedding: vec![2.0, 2.0] },
        ];
        assert_eq!(provider.check(2, data).unwrap(), vec![vec![1.0], vec![2.0, 2.0]]);
        assert!(provider.check(3, Vec::new()).is_err());
    }
}
