use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use weft_core::console::Console;
use weft_core::error::{Result, WeftError};
use weft_core::state::State;
use weft_core::traits::{NodeContext, NodeKind};
use weft_core::types::{ConnectorId, NodeId, StopHandle};

/// A node in a flowchart: identity, layout and edges, plus the boxed
/// kind that does the work.
pub struct Node {
    pub id: NodeId,
    pub label: String,
    pub center_x: f64,
    pub center_y: f64,
    pub input_connectors: Vec<ConnectorId>,
    pub output_connectors: Vec<ConnectorId>,
    kind: Box<dyn NodeKind>,
}

impl Node {
    pub fn new(label: impl Into<String>, center_x: f64, center_y: f64, kind: Box<dyn NodeKind>) -> Self {
        Self::with_id(NodeId::new(), label, center_x, center_y, kind)
    }

    pub fn with_id(
        id: NodeId,
        label: impl Into<String>,
        center_x: f64,
        center_y: f64,
        kind: Box<dyn NodeKind>,
    ) -> Self {
        Self {
            id,
            label: label.into(),
            center_x,
            center_y,
            input_connectors: Vec::new(),
            output_connectors: Vec::new(),
            kind,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind.kind()
    }

    pub fn body(&self) -> &dyn NodeKind {
        self.kind.as_ref()
    }

    /// Run the node body and record its output.
    ///
    /// `state.variables[label]` exists for the duration of the body, and on
    /// output both it and `state.result` hold the output.
    pub async fn run(
        &self,
        console: &dyn Console,
        stop: &StopHandle,
        state: &mut State,
    ) -> Result<Option<String>> {
        state.variables.entry(self.label.clone()).or_default();
        let ctx = NodeContext {
            label: &self.label,
            console,
            stop,
        };
        let output = self.kind.run(ctx, state).await?;
        if let Some(ref output) = output {
            state.set(self.label.clone(), output.clone());
            state.result = output.clone();
        }
        Ok(output)
    }

    /// Estimate cost. Leaves a placeholder under this node's label so later
    /// templates that reference it still format.
    pub fn cost(&self, state: &mut State) -> Result<f64> {
        state.variables.entry(self.label.clone()).or_default();
        let cost = self.kind.cost(state)?;
        debug!(node = %self.label, cost, "Estimated node cost");
        Ok(cost)
    }

    pub fn to_record(&self) -> NodeRecord {
        NodeRecord {
            id: self.id.clone(),
            label: self.label.clone(),
            center_x: self.center_x,
            center_y: self.center_y,
            classname: self.kind().to_string(),
            fields: self.kind.options(),
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("kind", &self.kind())
            .field("center", &(self.center_x, self.center_y))
            .field("inputs", &self.input_connectors.len())
            .field("outputs", &self.output_connectors.len())
            .finish()
    }
}

/// Saved form of a node. Kind-specific fields sit beside the common ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub label: String,
    pub center_x: f64,
    pub center_y: f64,
    pub classname: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl NodeRecord {
    pub fn new(classname: impl Into<String>, label: impl Into<String>, center_x: f64, center_y: f64) -> Self {
        Self {
            id: NodeId::new(),
            label: label.into(),
            center_x,
            center_y,
            classname: classname.into(),
            fields: serde_json::Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Decode the kind-specific fields into an options struct.
    pub fn options<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(serde_json::Value::Object(self.fields.clone())).map_err(|e| {
            WeftError::MalformedFile(format!("{} `{}`: {}", self.classname, self.label, e))
        })
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(|v| v.as_str())
    }
}

/// Encode an options struct as kind-specific record fields.
pub fn options_map<T: Serialize>(options: &T) -> serde_json::Map<String, serde_json::Value> {
    match serde_json::to_value(options) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    }
}
