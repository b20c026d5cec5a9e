//! Kinds that compute their output from the working state alone.

use std::fmt::Write as _;

use futures::future::BoxFuture;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};

use weft_core::error::{Result, WeftError};
use weft_core::state::State;
use weft_core::text::{SharedText, TextData};
use weft_core::traits::{NodeContext, NodeKind};
use weft_engine::graph::{options_map, NodeRecord};
use weft_engine::Expression;

use super::{json_field, parse_json};

// ── Prompt ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptOptions {
    pub prompt: TextData,
}

impl Default for PromptOptions {
    fn default() -> Self {
        Self {
            prompt: TextData::new("Prompt", ""),
        }
    }
}

/// Formats its template against the state.
pub struct PromptKind {
    prompt: SharedText,
}

impl PromptKind {
    /// Build from a saved record. A fresh node's text is labelled after
    /// the node.
    pub fn from_record(record: &NodeRecord) -> Result<Self> {
        let mut options: PromptOptions = record.options()?;
        if !record.fields.contains_key("prompt") {
            options.prompt.label = record.label.clone();
        }
        Ok(Self::new(options))
    }

    pub fn new(options: PromptOptions) -> Self {
        Self {
            prompt: options.prompt.into(),
        }
    }
}

impl NodeKind for PromptKind {
    fn kind(&self) -> &'static str {
        "PromptNode"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let text = self
                .prompt
                .format(state)
                .map_err(|e| WeftError::node(ctx.label, e))?;
            Ok(Some(text))
        })
    }

    /// Later nodes are priced against the unformatted template.
    fn cost(&self, state: &mut State) -> Result<f64> {
        state.result = self.prompt.text();
        Ok(0.0)
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&PromptOptions {
            prompt: self.prompt.snapshot(),
        })
    }

    fn text_data(&self) -> Vec<SharedText> {
        vec![self.prompt.clone()]
    }
}

// ── Function ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FuncOptions {
    pub function: TextData,
}

impl Default for FuncOptions {
    fn default() -> Self {
        Self {
            function: TextData::new("Function", "result"),
        }
    }
}

/// Evaluates an expression over the state and outputs its value.
pub struct FuncKind {
    function: SharedText,
}

impl FuncKind {
    /// Build from a saved record. A fresh node's text is labelled after
    /// the node.
    pub fn from_record(record: &NodeRecord) -> Result<Self> {
        let mut options: FuncOptions = record.options()?;
        if !record.fields.contains_key("function") {
            options.function.label = record.label.clone();
        }
        Ok(Self::new(options))
    }

    pub fn new(options: FuncOptions) -> Self {
        Self {
            function: options.function.into(),
        }
    }
}

impl NodeKind for FuncKind {
    fn kind(&self) -> &'static str {
        "FuncNode"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let value = Expression::parse(&self.function.text())
                .and_then(|expr| expr.eval(state))
                .map_err(|e| WeftError::node(ctx.label, e))?;
            Ok(Some(value.to_string()))
        })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&FuncOptions {
            function: self.function.snapshot(),
        })
    }

    fn text_data(&self) -> Vec<SharedText> {
        vec![self.function.clone()]
    }
}

// ── Dummy LLM ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DummyOptions {
    pub dummy_response: String,
}

impl Default for DummyOptions {
    fn default() -> Self {
        Self {
            dummy_response: "dummy response".to_string(),
        }
    }
}

/// Stands in for an LLM call with a canned reply.
pub struct DummyKind {
    options: DummyOptions,
}

impl DummyKind {
    pub fn new(options: DummyOptions) -> Self {
        Self { options }
    }
}

impl NodeKind for DummyKind {
    fn kind(&self) -> &'static str {
        "DummyNode"
    }

    fn run<'a>(&'a self, _ctx: NodeContext<'a>, _state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move { Ok(Some(self.options.dummy_response.clone())) })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}

// ── Regex / Tag / Json ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegexOptions {
    pub regex: String,
}

/// Outputs every match of a pattern in the result, one per line.
pub struct RegexKind {
    options: RegexOptions,
}

impl RegexKind {
    pub fn new(options: RegexOptions) -> Self {
        Self { options }
    }
}

impl NodeKind for RegexKind {
    fn kind(&self) -> &'static str {
        "RegexNode"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let re = Regex::new(&self.options.regex).map_err(|e| WeftError::node(ctx.label, e))?;
            let matches: Vec<&str> = re.find_iter(&state.result).map(|m| m.as_str()).collect();
            Ok(Some(matches.join("\n")))
        })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TagOptions {
    pub start_tag: String,
    pub end_tag: String,
}

impl Default for TagOptions {
    fn default() -> Self {
        Self {
            start_tag: "<start>".to_string(),
            end_tag: "<end>".to_string(),
        }
    }
}

/// Outputs the text enclosed by each start/end tag pair, one per line.
pub struct TagKind {
    options: TagOptions,
}

impl TagKind {
    pub fn new(options: TagOptions) -> Self {
        Self { options }
    }
}

fn between_tags<'t>(text: &'t str, start: &str, end: &str) -> Vec<&'t str> {
    let mut found = Vec::new();
    if start.is_empty() || end.is_empty() {
        return found;
    }
    let mut rest = text;
    while let Some(open) = rest.find(start) {
        let after = &rest[open + start.len()..];
        match after.find(end) {
            Some(close) => {
                found.push(&after[..close]);
                rest = &after[close + end.len()..];
            }
            None => break,
        }
    }
    found
}

impl NodeKind for TagKind {
    fn kind(&self) -> &'static str {
        "TagNode"
    }

    fn run<'a>(&'a self, _ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let found = between_tags(&state.result, &self.options.start_tag, &self.options.end_tag);
            Ok(Some(found.join("\n")))
        })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonOptions {
    pub key: String,
}

impl Default for JsonOptions {
    fn default() -> Self {
        Self {
            key: "text".to_string(),
        }
    }
}

/// Extracts one key from a JSON result.
pub struct JsonKind {
    options: JsonOptions,
}

impl JsonKind {
    pub fn new(options: JsonOptions) -> Self {
        Self { options }
    }
}

impl NodeKind for JsonKind {
    fn kind(&self) -> &'static str {
        "JsonNode"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let data = parse_json(ctx.label, &state.result)?;
            Ok(Some(json_field(ctx.label, &data, &self.options.key)?))
        })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}

/// First JSON object or array embedded in `text`, ignoring any prose or
/// code fences around it.
pub fn find_json(text: &str) -> Option<serde_json::Value> {
    text.char_indices()
        .filter(|(_, c)| matches!(c, '{' | '['))
        .find_map(|(i, _)| {
            serde_json::Deserializer::from_str(&text[i..])
                .into_iter::<serde_json::Value>()
                .next()?
                .ok()
        })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonerizerOptions {
    pub pretty: bool,
}

/// Pulls the JSON out of free text (usually a model reply) and re-emits it
/// as clean JSON.
pub struct JsonerizerKind {
    options: JsonerizerOptions,
}

impl JsonerizerKind {
    pub fn new(options: JsonerizerOptions) -> Self {
        Self { options }
    }
}

impl NodeKind for JsonerizerKind {
    fn kind(&self) -> &'static str {
        "JsonerizerNode"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let value = find_json(&state.result)
                .ok_or_else(|| WeftError::node(ctx.label, "no JSON object or array in result"))?;
            let text = if self.options.pretty {
                serde_json::to_string_pretty(&value)
            } else {
                serde_json::to_string(&value)
            };
            Ok(Some(text.map_err(|e| WeftError::node(ctx.label, e.to_string()))?))
        })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}

// ── Random / Date ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomOptions {
    pub min: i64,
    pub max: i64,
}

impl Default for RandomOptions {
    fn default() -> Self {
        Self { min: 0, max: 100 }
    }
}

/// Outputs a random integer in `[min, max]`.
pub struct RandomKind {
    options: RandomOptions,
}

impl RandomKind {
    pub fn new(options: RandomOptions) -> Self {
        Self { options }
    }
}

impl NodeKind for RandomKind {
    fn kind(&self) -> &'static str {
        "RandomNode"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, _state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let RandomOptions { min, max } = self.options;
            if min > max {
                return Err(WeftError::node(ctx.label, format!("min {min} exceeds max {max}")));
            }
            let n = rand::thread_rng().gen_range(min..=max);
            Ok(Some(n.to_string()))
        })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DateOptions {
    /// strftime-style pattern.
    pub format: String,
}

impl Default for DateOptions {
    fn default() -> Self {
        Self {
            format: "%Y-%m-%d %H:%M:%S".to_string(),
        }
    }
}

/// Outputs the current local time.
pub struct DateKind {
    options: DateOptions,
}

impl DateKind {
    pub fn new(options: DateOptions) -> Self {
        Self { options }
    }
}

impl NodeKind for DateKind {
    fn kind(&self) -> &'static str {
        "DateNode"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, _state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let now = chrono::Local::now();
            let mut out = String::new();
            write!(out, "{}", now.format(&self.options.format)).map_err(|_| {
                WeftError::node(ctx.label, format!("bad date format `{}`", self.options.format))
            })?;
            Ok(Some(out))
        })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}
