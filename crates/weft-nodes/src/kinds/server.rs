//! Network input: wait for one HTTP request and use its body as the result.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::Router;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info};

use weft_core::error::{Result, WeftError};
use weft_core::state::State;
use weft_core::traits::{NodeContext, NodeKind};
use weft_engine::graph::options_map;

type Slot = Arc<Mutex<Option<oneshot::Sender<String>>>>;

/// Hands the first body to the waiting node. Later requests are refused.
async fn accept(axum::extract::State(slot): axum::extract::State<Slot>, body: String) -> StatusCode {
    match slot.lock().await.take() {
        Some(tx) => {
            let _ = tx.send(body);
            StatusCode::OK
        }
        None => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Serve on `listener` until one request body arrives, then shut down.
/// Any method and path is accepted.
pub async fn receive_one(label: &str, listener: TcpListener) -> Result<String> {
    let (tx, rx) = oneshot::channel();
    let app = Router::new()
        .fallback(accept)
        .with_state(Arc::new(Mutex::new(Some(tx))));

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .await
    });

    let received = rx.await;
    let _ = stop_tx.send(());
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(WeftError::node(label, format!("server failed: {e}"))),
        Err(e) => return Err(WeftError::node(label, format!("server task failed: {e}"))),
    }
    received.map_err(|_| WeftError::node(label, "server closed before any input arrived"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInputOptions {
    pub host: String,
    pub port: u16,
}

impl Default for ServerInputOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// Blocks the run until a client sends input over HTTP.
pub struct ServerInputKind {
    options: ServerInputOptions,
}

impl ServerInputKind {
    pub fn new(options: ServerInputOptions) -> Self {
        Self { options }
    }
}

impl NodeKind for ServerInputKind {
    fn kind(&self) -> &'static str {
        "ServerInputNode"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, _state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let bind = format!("{}:{}", self.options.host, self.options.port);
            let listener = TcpListener::bind(&bind)
                .await
                .map_err(|e| WeftError::node(ctx.label, format!("cannot listen on {bind}: {e}")))?;
            info!(node = ctx.label, bind = %bind, "Waiting for input");
            ctx.console.info(ctx.label, &format!("listening on {bind}"));

            let body = receive_one(ctx.label, listener).await?;
            debug!(node = ctx.label, bytes = body.len(), "Input received");
            Ok(Some(body))
        })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_first_request_body_becomes_result() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/anything", listener.local_addr().unwrap());

        let waiting = tokio::spawn(async move { receive_one("Server", listener).await });
        let resp = reqwest::Client::new()
            .post(&url)
            .body("hello from outside")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        let body = waiting.await.unwrap().unwrap();
        assert_eq!(body, "hello from outside");
    }

    #[test]
    fn test_default_bind() {
        let kind = ServerInputKind::new(ServerInputOptions::default());
        assert_eq!(kind.options()["host"], "127.0.0.1");
        assert_eq!(kind.options()["port"], 8000);
    }
}
