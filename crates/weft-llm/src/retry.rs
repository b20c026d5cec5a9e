use std::time::Duration;

use futures::future::BoxFuture;
use tracing::warn;

use weft_core::config::{ModelConfig, RetryConfig};
use weft_core::error::{Result, WeftError};
use weft_core::traits::LlmClient;
use weft_core::types::{ChatMessage, Completion};

/// An LLM client that retries transient failures with jittered backoff.
pub struct RetryingClient {
    inner: Box<dyn LlmClient>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(inner: Box<dyn LlmClient>, retry_config: RetryConfig) -> Self {
        Self {
            inner,
            retry_config,
        }
    }
}

fn is_retryable(e: &WeftError) -> bool {
    match e {
        WeftError::LlmRequest(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl LlmClient for RetryingClient {
    fn complete(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<Completion>> {
        let config = config.clone();

        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;
            let mut attempt = 0;
            loop {
                match self.inner.complete(&config, messages.clone()).await {
                    Ok(completion) => return Ok(completion),
                    Err(e) if is_retryable(&e) && attempt < max_retries => {
                        let backoff = calculate_backoff(attempt, &self.retry_config);
                        warn!(
                            attempt = attempt + 1,
                            max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying LLM request"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct Flaky {
        failures: u32,
        calls: Arc<AtomicU32>,
        message: &'static str,
    }

    impl LlmClient for Flaky {
        fn complete(&self, _config: &ModelConfig, _messages: Vec<ChatMessage>) -> BoxFuture<'_, Result<Completion>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n < self.failures {
                    Err(WeftError::LlmRequest(self.message.to_string()))
                } else {
                    Ok(Completion {
                        text: "ok".into(),
                        ..Completion::default()
                    })
                }
            })
        }
    }

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let client = RetryingClient::new(
            Box::new(Flaky {
                failures: 2,
                calls: calls.clone(),
                message: "HTTP 503: overloaded",
            }),
            fast(),
        );
        let out = client.complete(&ModelConfig::default(), vec![]).await.unwrap();
        assert_eq!(out.text, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let client = RetryingClient::new(
            Box::new(Flaky {
                failures: 5,
                calls: calls.clone(),
                message: "HTTP 401: bad key",
            }),
            fast(),
        );
        assert!(client.complete(&ModelConfig::default(), vec![]).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_capped() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 4000,
        };
        let d = calculate_backoff(8, &config);
        assert!(d <= Duration::from_millis(4800));
        assert!(d >= Duration::from_millis(3200));
    }
}
