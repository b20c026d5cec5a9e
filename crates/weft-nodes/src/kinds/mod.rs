pub mod audio;
pub mod database;
pub mod embedding;
pub mod history;
pub mod http;
pub mod image;
pub mod io;
pub mod llm;
pub mod server;
pub mod testing;
pub mod text;

use weft_core::error::{Result, WeftError};

/// Parse the working result as JSON, failing the node when it is not.
pub(crate) fn parse_json(label: &str, text: &str) -> Result<serde_json::Value> {
    serde_json::from_str(text).map_err(|e| WeftError::node(label, format!("invalid JSON: {e}")))
}

/// Look up `key` in a JSON object. Strings come back unquoted.
pub(crate) fn json_field(label: &str, data: &serde_json::Value, key: &str) -> Result<String> {
    match data.get(key) {
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err(WeftError::node(label, format!("missing key `{key}`"))),
    }
}

/// Serve `app` on an ephemeral local port and return its base URL.
#[cfg(test)]
pub(crate) async fn serve_stub(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    format!("http://{addr}")
}
