//! HTTP request, page scraping and web search kinds.

use std::time::Duration;

use futures::future::BoxFuture;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::state::State;
use weft_core::traits::{NodeContext, NodeKind};
use weft_engine::graph::options_map;

use super::{json_field, parse_json};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl RequestType {
    fn method(&self) -> reqwest::Method {
        match self {
            RequestType::Get => reqwest::Method::GET,
            RequestType::Post => reqwest::Method::POST,
            RequestType::Put => reqwest::Method::PUT,
            RequestType::Delete => reqwest::Method::DELETE,
        }
    }
}

pub(crate) fn client(label: &str) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(concat!("weft/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| WeftError::node(label, format!("Failed to create HTTP client: {}", e)))
}

/// Send `body` as JSON and return the response text, whatever the status.
async fn send_json(label: &str, method: RequestType, url: &str, body: &serde_json::Value) -> Result<String> {
    debug!(node = %label, url, method = ?method, "Sending request");
    let resp = client(label)?
        .request(method.method(), url)
        .json(body)
        .send()
        .await
        .map_err(|e| WeftError::Http(format!("{label}: request to {url} failed: {e}")))?;
    debug!(node = %label, status = resp.status().as_u16(), "Response received");
    resp.text()
        .await
        .map_err(|e| WeftError::Http(format!("{label}: failed to read response body: {e}")))
}

/// Prefix `https://` when the URL has no scheme.
fn with_scheme(url: &str) -> String {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

// ── HttpNode ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpOptions {
    pub url: String,
    pub request_type: RequestType,
}

/// Sends the JSON working result to a fixed URL.
pub struct HttpKind {
    options: HttpOptions,
}

impl HttpKind {
    pub fn new(options: HttpOptions) -> Self {
        Self { options }
    }
}

impl NodeKind for HttpKind {
    fn kind(&self) -> &'static str {
        "HttpNode"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let data = parse_json(ctx.label, &state.result)?;
            let body = send_json(ctx.label, self.options.request_type, &self.options.url, &data).await?;
            Ok(Some(body))
        })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}

// ── JSONRequestNode ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonRequestOptions {
    pub key: String,
    pub request_type: RequestType,
}

impl Default for JsonRequestOptions {
    fn default() -> Self {
        Self {
            key: "url".to_string(),
            request_type: RequestType::Get,
        }
    }
}

/// Like `HttpNode`, with the URL read from `key` of the JSON result.
pub struct JsonRequestKind {
    options: JsonRequestOptions,
}

impl JsonRequestKind {
    pub fn new(options: JsonRequestOptions) -> Self {
        Self { options }
    }
}

impl NodeKind for JsonRequestKind {
    fn kind(&self) -> &'static str {
        "JSONRequestNode"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let data = parse_json(ctx.label, &state.result)?;
            let url = with_scheme(&json_field(ctx.label, &data, &self.options.key)?);
            let body = send_json(ctx.label, self.options.request_type, &url, &data).await?;
            Ok(Some(body))
        })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}

// ── ScrapeNode ──────────────────────────────────────────────────

/// Reduce HTML to readable text. Links become `[text](href)`; script and
/// style blocks are dropped.
fn html_to_text(html: &str) -> std::result::Result<String, regex::Error> {
    let re_blocks = Regex::new(r"(?is)<(script|style|head)[^>]*>.*?</(script|style|head)>")?;
    let cleaned = re_blocks.replace_all(html, "");
    let re_links = Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a>"#)?;
    let linked = re_links.replace_all(&cleaned, "[$2]($1)");
    let re_breaks = Regex::new(r"(?i)<(br|/p|/div|/li|/h[1-6]|/tr)\s*/?>")?;
    let broken = re_breaks.replace_all(&linked, "\n");
    let re_tags = Regex::new(r"<[^>]+>")?;
    let text = re_tags.replace_all(&broken, "");

    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    let lines: Vec<String> = text
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect();
    Ok(lines.join("\n"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeOptions {
    pub key: String,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            key: "url".to_string(),
        }
    }
}

/// Fetches a page and outputs its text. The URL is `key` of a JSON
/// result, or the result itself when it is not JSON.
pub struct ScrapeKind {
    options: ScrapeOptions,
}

impl ScrapeKind {
    pub fn new(options: ScrapeOptions) -> Self {
        Self { options }
    }

    fn target(&self, label: &str, result: &str) -> Result<String> {
        match serde_json::from_str::<serde_json::Value>(result) {
            Ok(data @ serde_json::Value::Object(_)) => Ok(with_scheme(&json_field(label, &data, &self.options.key)?)),
            _ => Ok(with_scheme(result)),
        }
    }
}

impl NodeKind for ScrapeKind {
    fn kind(&self) -> &'static str {
        "ScrapeNode"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let url = self.target(ctx.label, &state.result)?;
            debug!(node = %ctx.label, url = %url, "Scraping page");
            let html = client(ctx.label)?
                .get(&url)
                .send()
                .await
                .map_err(|e| WeftError::Http(format!("{}: request to {url} failed: {e}", ctx.label)))?
                .text()
                .await
                .map_err(|e| WeftError::Http(format!("{}: failed to read page: {e}", ctx.label)))?;
            let text = html_to_text(&html).map_err(|e| WeftError::node(ctx.label, e))?;
            Ok(Some(text))
        })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}

// ── SerpApiNode ────────────────────────────────────────────────

/// Environment variable holding the SerpAPI key.
pub const SERPAPI_KEY_VAR: &str = "SERPAPI_API_KEY";

/// Keep the first `n` organic results as `{title, link, snippet}`.
fn organic_results(data: &serde_json::Value, n: usize) -> serde_json::Value {
    let results = data
        .get("organic_results")
        .and_then(|r| r.as_array())
        .map(|r| r.as_slice())
        .unwrap_or_default();
    results
        .iter()
        .take(n)
        .map(|r| {
            serde_json::json!({
                "title": r.get("title").cloned().unwrap_or_default(),
                "link": r.get("link").cloned().unwrap_or_default(),
                "snippet": r.get("snippet").cloned().unwrap_or_default(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerpApiOptions {
    pub engine: String,
    pub n_results: usize,
    pub base_url: String,
}

impl Default for SerpApiOptions {
    fn default() -> Self {
        Self {
            engine: "google".to_string(),
            n_results: 5,
            base_url: "https://serpapi.com".to_string(),
        }
    }
}

/// Searches the web for the working result and outputs the top organic
/// results as a JSON array.
pub struct SerpApiKind {
    options: SerpApiOptions,
}

impl SerpApiKind {
    pub fn new(options: SerpApiOptions) -> Self {
        Self { options }
    }
}

impl NodeKind for SerpApiKind {
    fn kind(&self) -> &'static str {
        "SerpApiNode"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let api_key = std::env::var(SERPAPI_KEY_VAR)
                .map_err(|_| WeftError::node(ctx.label, format!("{SERPAPI_KEY_VAR} is not set")))?;
            let url = format!("{}/search.json", self.options.base_url.trim_end_matches('/'));
            debug!(node = %ctx.label, engine = %self.options.engine, "Searching");

            let resp = client(ctx.label)?
                .get(&url)
                .query(&[
                    ("q", state.result.as_str()),
                    ("engine", self.options.engine.as_str()),
                    ("api_key", api_key.as_str()),
                ])
                .send()
                .await
                .map_err(|e| WeftError::Http(format!("{}: search request failed: {e}", ctx.label)))?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(WeftError::Http(format!("{}: HTTP {status}: {body}", ctx.label)));
            }
            let data: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| WeftError::Http(format!("{}: bad search response: {e}", ctx.label)))?;
            Ok(Some(organic_results(&data, self.options.n_results).to_string()))
        })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_test_utils::run_kind;

    #[test]
    fn test_with_scheme() {
        assert_eq!(with_scheme("example.com"), "https://example.com");
        assert_eq!(with_scheme("http://a.b"), "http://a.b");
        assert_eq!(with_scheme(" https://a.b "), "https://a.b");
    }

    #[test]
    fn test_html_to_text() {
        let html = r#"<html><head><title>T</title></head><body>
            <script>var x = 1;</script>
            <p>Hello &amp; welcome</p><p>See <a href="/docs">the docs</a> now</p>
        </body></html>"#;
        assert_eq!(html_to_text(html).unwrap(), "Hello & welcome\nSee [the docs](/docs) now");
    }

    #[test]
    fn test_scrape_target() {
        let kind = ScrapeKind::new(ScrapeOptions::default());
        assert_eq!(kind.target("S", r#"{"url": "example.com/a"}"#).unwrap(), "https://example.com/a");
        assert_eq!(kind.target("S", "example.com").unwrap(), "https://example.com");
        assert!(kind.target("S", r#"{"href": "x"}"#).is_err());
    }

    #[test]
    fn test_request_type_serde() {
        let opts: HttpOptions = serde_json::from_value(serde_json::json!({"url": "u", "request_type": "post"})).unwrap();
        assert_eq!(opts.request_type, RequestType::Post);
        assert_eq!(options_map(&HttpOptions::default())["request_type"], "get");
    }

    #[test]
    fn test_organic_results_trimmed() {
        let data = serde_json::json!({
            "search_metadata": {"id": "x"},
            "organic_results": [
                {"position": 1, "title": "Rust", "link": "https://rust-lang.org", "snippet": "A language"},
                {"position": 2, "title": "Crates", "link": "https://crates.io"},
                {"position": 3, "title": "Docs", "link": "https://docs.rs", "snippet": "API docs"}
            ]
        });
        let top = organic_results(&data, 2);
        assert_eq!(top.as_array().unwrap().len(), 2);
        assert_eq!(top[0]["title"], "Rust");
        assert_eq!(top[1]["snippet"], serde_json::Value::Null);
        assert_eq!(organic_results(&serde_json::json!({}), 5), serde_json::json!([]));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_serpapi_queries_result() {
        use axum::extract::Query;
        use axum::routing::get;
        use axum::{Json, Router};
        use std::collections::HashMap;

        let app = Router::new().route(
            "/search.json",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                Json(serde_json::json!({
                    "organic_results": [{
                        "title": params.get("q").cloned().unwrap_or_default(),
                        "link": "https://example.com",
                        "snippet": params.get("api_key").cloned().unwrap_or_default(),
                    }]
                }))
            }),
        );
        let base = crate::kinds::serve_stub(app).await;
        std::env::set_var(SERPAPI_KEY_VAR, "serp-test");

        let kind = SerpApiKind::new(SerpApiOptions {
            base_url: base,
            ..SerpApiOptions::default()
        });
        let out = run_kind(&kind, "Search", &mut State::with_result("weft flowcharts")).await.unwrap().unwrap();
        let results: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(results[0]["title"], "weft flowcharts");
        assert_eq!(results[0]["snippet"], "serp-test");
    }

    #[tokio::test]
    async fn test_http_rejects_non_json_result() {
        let kind = HttpKind::new(HttpOptions {
            url: "http://127.0.0.1:9/unused".into(),
            request_type: RequestType::Post,
        });
        let err = run_kind(&kind, "Http", &mut State::with_result("plain text")).await.unwrap_err();
        assert!(err.to_string().starts_with("Http: invalid JSON"));
    }
}
