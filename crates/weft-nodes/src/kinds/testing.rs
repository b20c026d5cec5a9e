use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::info;

use weft_core::error::{Result, WeftError};
use weft_core::state::State;
use weft_core::text::{SharedText, TextData};
use weft_core::traits::{NodeContext, NodeKind};
use weft_engine::graph::{options_map, NodeRecord};
use weft_engine::Expression;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssertOptions {
    pub assertion: TextData,
}

impl Default for AssertOptions {
    fn default() -> Self {
        Self {
            assertion: TextData::new("Assertion", "true"),
        }
    }
}

/// Fails the run when its expression is false. Passes the result on.
pub struct AssertKind {
    assertion: SharedText,
}

impl AssertKind {
    /// Build from a saved record. A fresh node's text is labelled after
    /// the node.
    pub fn from_record(record: &NodeRecord) -> Result<Self> {
        let mut options: AssertOptions = record.options()?;
        if !record.fields.contains_key("assertion") {
            options.assertion.label = record.label.clone();
        }
        Ok(Self::new(options))
    }

    pub fn new(options: AssertOptions) -> Self {
        Self {
            assertion: options.assertion.into(),
        }
    }
}

impl NodeKind for AssertKind {
    fn kind(&self) -> &'static str {
        "AssertNode"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let source = self.assertion.text();
            let holds = Expression::parse(&source)
                .and_then(|expr| expr.is_true(state))
                .map_err(|e| WeftError::node(ctx.label, e))?;
            if !holds {
                return Err(WeftError::Assertion(format!("`{source}` does not hold")));
            }
            Ok(Some(state.result.clone()))
        })
    }

    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&AssertOptions {
            assertion: self.assertion.snapshot(),
        })
    }

    fn text_data(&self) -> Vec<SharedText> {
        vec![self.assertion.clone()]
    }
}

/// Writes the working result to the log and passes it on.
pub struct LoggingKind;

impl NodeKind for LoggingKind {
    fn kind(&self) -> &'static str {
        "LoggingNode"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            info!(node = %ctx.label, result = %state.result, "Logging node");
            Ok(Some(state.result.clone()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_test_utils::run_kind;

    fn assert_kind(expr: &str) -> AssertKind {
        AssertKind::new(AssertOptions {
            assertion: TextData::new("Assertion", expr),
        })
    }

    #[tokio::test]
    async fn test_assert_passes_result() {
        let mut state = State::with_result("42");
        let out = run_kind(&assert_kind("int(result) > 40"), "Check", &mut state).await.unwrap();
        assert_eq!(out.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_assert_failure_is_execution_error() {
        let mut state = State::with_result("7");
        let err = run_kind(&assert_kind("result == \"8\""), "Check", &mut state).await.unwrap_err();
        assert!(matches!(err, WeftError::Assertion(_)));
        assert_eq!(err.category(), weft_core::error::ErrorCategory::Execution);
    }

    #[tokio::test]
    async fn test_logging_passes_through() {
        let mut state = State::with_result("note");
        assert_eq!(run_kind(&LoggingKind, "Log", &mut state).await.unwrap().as_deref(), Some("note"));
    }
}
