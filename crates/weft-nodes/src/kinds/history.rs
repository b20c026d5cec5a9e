use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use weft_core::error::Result;
use weft_core::state::{HistoryEntry, State};
use weft_core::traits::{NodeContext, NodeKind};
use weft_core::types::{ChatMessage, Role};
use weft_engine::graph::options_map;
use weft_llm::estimate_tokens;

fn render_entry(entry: &HistoryEntry) -> String {
    match (entry.get("role"), entry.get("content")) {
        (Some(role), Some(content)) => format!("{role}: {content}"),
        _ => entry
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join(", "),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryOptions {
    pub role: Role,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self { role: Role::User }
    }
}

/// Records the working result as a chat turn.
pub struct HistoryKind {
    options: HistoryOptions,
}

impl HistoryKind {
    pub fn new(options: HistoryOptions) -> Self {
        Self { options }
    }
}

impl NodeKind for HistoryKind {
    fn kind(&self) -> &'static str {
        "HistoryNode"
    }

    fn run<'a>(&'a self, _ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let result = state.result.clone();
            state.push_message(self.options.role.as_str(), result.clone());
            Ok(Some(result))
        })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManualHistoryOptions {
    pub history: Vec<ChatMessage>,
}

/// Replaces the chat history with a fixed, hand-written conversation.
pub struct ManualHistoryKind {
    options: ManualHistoryOptions,
}

impl ManualHistoryKind {
    pub fn new(options: ManualHistoryOptions) -> Self {
        Self { options }
    }
}

impl NodeKind for ManualHistoryKind {
    fn kind(&self) -> &'static str {
        "ManualHistoryNode"
    }

    fn run<'a>(&'a self, _ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            state.history.clear();
            for message in &self.options.history {
                state.push_message(message.role.as_str(), message.content.clone());
            }
            Ok(Some(state.result.clone()))
        })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowedHistoryOptions {
    pub window: usize,
}

impl Default for WindowedHistoryOptions {
    fn default() -> Self {
        Self { window: 3 }
    }
}

/// Renders the last `window` history records, oldest first.
pub struct WindowedHistoryKind {
    options: WindowedHistoryOptions,
}

impl WindowedHistoryKind {
    pub fn new(options: WindowedHistoryOptions) -> Self {
        Self { options }
    }
}

impl NodeKind for WindowedHistoryKind {
    fn kind(&self) -> &'static str {
        "WindowedHistoryNode"
    }

    fn run<'a>(&'a self, _ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let skip = state.history.len().saturating_sub(self.options.window);
            let lines: Vec<String> = state.history[skip..].iter().map(render_entry).collect();
            Ok(Some(lines.join("\n")))
        })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicWindowedHistoryOptions {
    pub max_tokens: usize,
}

impl Default for DynamicWindowedHistoryOptions {
    fn default() -> Self {
        Self { max_tokens: 1000 }
    }
}

/// Renders as many of the newest history records as fit in `max_tokens`.
pub struct DynamicWindowedHistoryKind {
    options: DynamicWindowedHistoryOptions,
}

impl DynamicWindowedHistoryKind {
    pub fn new(options: DynamicWindowedHistoryOptions) -> Self {
        Self { options }
    }
}

impl NodeKind for DynamicWindowedHistoryKind {
    fn kind(&self) -> &'static str {
        "DynamicWindowedHistoryNode"
    }

    fn run<'a>(&'a self, _ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let mut budget = self.options.max_tokens;
            let mut lines = Vec::new();
            for entry in state.history.iter().rev() {
                let line = render_entry(entry);
                let tokens = estimate_tokens(&line);
                if tokens > budget {
                    break;
                }
                budget -= tokens;
                lines.push(line);
            }
            lines.reverse();
            Ok(Some(lines.join("\n")))
        })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&self.options)
    }
}
