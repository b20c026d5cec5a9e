use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;

use weft_core::error::{Result, WeftError};
use weft_core::state::State;
use weft_core::traits::{NodeContext, NodeKind};

/// Always outputs the same text.
#[derive(Debug, Clone)]
pub struct FixedKind {
    pub output: String,
}

impl FixedKind {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
        }
    }
}

impl NodeKind for FixedKind {
    fn kind(&self) -> &'static str {
        "FixedNode"
    }

    fn run<'a>(&'a self, _ctx: NodeContext<'a>, _state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move { Ok(Some(self.output.clone())) })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        map.insert("output".into(), self.output.clone().into());
        map
    }
}

/// Outputs the working result with a suffix appended.
#[derive(Debug, Clone)]
pub struct AppendKind {
    pub suffix: String,
}

impl AppendKind {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }
}

impl NodeKind for AppendKind {
    fn kind(&self) -> &'static str {
        "AppendNode"
    }

    fn run<'a>(&'a self, _ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move { Ok(Some(format!("{}{}", state.result, self.suffix))) })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        map.insert("suffix".into(), self.suffix.clone().into());
        map
    }
}

/// Fails every run.
#[derive(Debug, Clone)]
pub struct FailKind {
    pub message: String,
}

impl FailKind {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl NodeKind for FailKind {
    fn kind(&self) -> &'static str {
        "FailNode"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, _state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move { Err(WeftError::node(ctx.label, &self.message)) })
    }
}

/// Returns the termination signal.
#[derive(Debug, Clone, Default)]
pub struct HaltKind;

impl NodeKind for HaltKind {
    fn kind(&self) -> &'static str {
        "HaltNode"
    }

    fn run<'a>(&'a self, _ctx: NodeContext<'a>, _state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async { Ok(None) })
    }
}

/// Requests a stop on the running flowchart, then finishes normally.
#[derive(Debug, Clone, Default)]
pub struct StopKind;

impl NodeKind for StopKind {
    fn kind(&self) -> &'static str {
        "StopNode"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, _state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            ctx.stop.stop();
            Ok(Some("stopping".to_string()))
        })
    }
}

/// Counts its runs and reports a fixed cost. `cost` never counts as a run.
#[derive(Debug, Clone)]
pub struct CountingKind {
    pub calls: Arc<AtomicUsize>,
    pub price: f64,
}

impl CountingKind {
    pub fn new(price: f64) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            price,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl NodeKind for CountingKind {
    fn kind(&self) -> &'static str {
        "CountingNode"
    }

    fn run<'a>(&'a self, _ctx: NodeContext<'a>, _state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Some(n.to_string()))
        })
    }

    fn cost(&self, _state: &mut State) -> Result<f64> {
        Ok(self.price)
    }
}
