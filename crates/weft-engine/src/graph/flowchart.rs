use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use weft_core::console::Console;
use weft_core::error::{ErrorCategory, Result, WeftError};
use weft_core::state::State;
use weft_core::text::SharedText;
use weft_core::types::{ConnectorId, NodeId, StopHandle};

use super::connector::{Connector, ConnectorRecord, DEFAULT_CONDITION_LABEL};
use super::node::{Node, NodeRecord};
use super::registry::NodeRegistry;
use crate::builtin::{INIT_KIND, START_KIND};

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    /// Queue drained or a node signalled termination.
    Completed,
    /// `stop()` was observed at a loop check.
    Stopped,
    /// A node body or connector condition failed.
    Errored {
        node: String,
        category: ErrorCategory,
        message: String,
    },
}

/// Outcome of `run` / `initialize`. The state is whatever had accumulated
/// when the loop exited, including on error.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: State,
    pub status: RunStatus,
    /// Nodes whose body ran to completion, in execution order.
    pub executed: Vec<NodeId>,
}

impl RunReport {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Saved form of a flowchart (`flowchart.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowchartRecord {
    pub nodes: Vec<NodeRecord>,
    pub connectors: Vec<ConnectorRecord>,
}

/// A user-authored graph of nodes and conditional connectors, plus the
/// scheduler that walks it.
pub struct Flowchart {
    nodes: Vec<Node>,
    connectors: Vec<Connector>,
    text_data: HashMap<String, SharedText>,
    registry: Arc<NodeRegistry>,
    stop: StopHandle,
    dirty: bool,
    max_steps: usize,
}

impl Flowchart {
    /// A flowchart holding a default Init and Start node. Not dirty.
    pub fn new(registry: Arc<NodeRegistry>) -> Result<Self> {
        let mut chart = Self::empty(registry);
        chart.create_node(INIT_KIND, "Init", 10.0, 10.0)?;
        chart.create_node(START_KIND, "Start", 10.0, 210.0)?;
        chart.dirty = false;
        Ok(chart)
    }

    /// A flowchart with no nodes at all.
    pub fn empty(registry: Arc<NodeRegistry>) -> Self {
        Self {
            nodes: Vec::new(),
            connectors: Vec::new(),
            text_data: HashMap::new(),
            registry,
            stop: StopHandle::new(),
            dirty: false,
            max_steps: 0,
        }
    }

    /// Bound the number of node executions per run. 0 means unbounded.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn connectors(&self) -> &[Connector] {
        &self.connectors
    }

    pub fn find_node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn find_node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| &n.id == id)
    }

    pub fn node_by_label(&self, label: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.label == label)
    }

    pub fn find_connector(&self, id: &ConnectorId) -> Option<&Connector> {
        self.connectors.iter().find(|c| &c.id == id)
    }

    fn index_of(&self, id: &NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| &n.id == id)
    }

    fn require(&self, id: &NodeId) -> Result<&Node> {
        self.find_node(id)
            .ok_or_else(|| WeftError::MissingNode(id.to_string()))
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear the dirty flag after the chart has been persisted.
    pub fn mark_saved(&mut self) {
        self.dirty = false;
    }

    pub fn is_running(&self) -> bool {
        self.stop.is_running()
    }

    /// Cooperative cancellation, observed before the next node executes.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Handle for stopping the chart from another task.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// The main entry node. With several Start nodes, the one with the
    /// fewest incoming connectors wins.
    pub fn start_node(&self) -> Option<&Node> {
        self.nodes
            .iter()
            .filter(|n| n.kind() == START_KIND)
            .min_by_key(|n| n.input_connectors.len())
    }

    pub fn init_node(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.kind() == INIT_KIND)
    }

    /// Direct successors of a node, in connector attachment order.
    pub fn children(&self, id: &NodeId) -> Vec<NodeId> {
        self.find_node(id)
            .map(|n| {
                n.output_connectors
                    .iter()
                    .filter_map(|cid| self.find_connector(cid))
                    .map(|c| c.node2.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    // ── Text registry ───────────────────────────────────────────

    pub fn text_data(&self, label: &str) -> Option<&SharedText> {
        self.text_data.get(label)
    }

    pub fn text_labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self.text_data.keys().map(String::as_str).collect();
        labels.sort_unstable();
        labels
    }

    /// Replace the text of a registered fragment. The owning node or
    /// connector sees the change immediately.
    pub fn edit_text(&mut self, label: &str, text: &str) -> Result<()> {
        let handle = self
            .text_data
            .get(label)
            .ok_or_else(|| WeftError::MissingNode(format!("text `{label}`")))?;
        handle.set_text(text);
        self.dirty = true;
        Ok(())
    }

    fn register_text(&mut self, text: SharedText) {
        let label = text.label();
        if label.is_empty() {
            return;
        }
        debug!(label = %label, "Registered text data");
        self.text_data.insert(label, text);
    }

    fn unregister_text(&mut self, text: &SharedText) {
        self.text_data.retain(|_, t| !t.same_as(text));
    }

    // ── Structure ───────────────────────────────────────────────

    /// Create a node of a registered kind and add it.
    pub fn create_node(&mut self, kind: &str, label: &str, center_x: f64, center_y: f64) -> Result<NodeId> {
        let node = self.registry.create(kind, label, center_x, center_y)?;
        self.add_node(node)
    }

    /// Add a node. A colliding label gets " (copy)" appended until unique.
    pub fn add_node(&mut self, mut node: Node) -> Result<NodeId> {
        if self.find_node(&node.id).is_some() {
            return Err(WeftError::DuplicateNode(node.id.to_string()));
        }
        let kind = node.kind();
        if (kind == START_KIND && self.start_node().is_some())
            || (kind == INIT_KIND && self.init_node().is_some())
        {
            return Err(WeftError::SingletonViolation(kind.to_string()));
        }

        let original = node.label.clone();
        while self.node_by_label(&node.label).is_some() {
            node.label.push_str(" (copy)");
        }
        for text in node.body().text_data() {
            if node.label != original && text.label() == original {
                text.set_label(node.label.clone());
            }
            self.register_text(text);
        }

        node.input_connectors.clear();
        node.output_connectors.clear();
        let id = node.id.clone();
        debug!(node = %node.label, kind, id = %id, "Added node");
        self.nodes.push(node);
        self.dirty = true;
        Ok(id)
    }

    /// Remove a node and every connector touching it.
    pub fn remove_node(&mut self, id: &NodeId) -> Result<Node> {
        let idx = self
            .index_of(id)
            .ok_or_else(|| WeftError::MissingNode(id.to_string()))?;
        let touching: Vec<ConnectorId> = self
            .connectors
            .iter()
            .filter(|c| &c.node1 == id || &c.node2 == id)
            .map(|c| c.id.clone())
            .collect();
        for cid in &touching {
            self.remove_connector(cid)?;
        }

        let node = self.nodes.remove(idx);
        for text in node.body().text_data() {
            self.unregister_text(&text);
        }
        debug!(node = %node.label, removed_connectors = touching.len(), "Removed node");
        self.dirty = true;
        Ok(node)
    }

    /// Rename a node, disambiguating against the other labels. Texts
    /// labelled after the node follow the new label.
    pub fn rename_node(&mut self, id: &NodeId, label: &str) -> Result<String> {
        let previous = self.require(id)?.label.clone();
        let mut label = label.to_string();
        while self.nodes.iter().any(|n| n.label == label && &n.id != id) {
            label.push_str(" (copy)");
        }
        let mut owned = Vec::new();
        if let Some(node) = self.find_node_mut(id) {
            node.label = label.clone();
            owned = node.body().text_data();
        }
        for text in owned.into_iter().filter(|t| t.label() == previous) {
            self.unregister_text(&text);
            text.set_label(label.clone());
            self.register_text(text);
        }
        debug!(from = %previous, to = %label, "Renamed node");
        self.dirty = true;
        Ok(label)
    }

    /// Connect two nodes unconditionally.
    pub fn connect(&mut self, from: &NodeId, to: &NodeId) -> Result<ConnectorId> {
        self.add_connector(Connector::new(from.clone(), to.clone()))
    }

    /// Connect two nodes behind a named condition.
    pub fn connect_if(&mut self, from: &NodeId, to: &NodeId, label: &str, condition: &str) -> Result<ConnectorId> {
        let text = SharedText::new(label, condition);
        self.add_connector(Connector::with_condition(from.clone(), to.clone(), text))
    }

    /// Add a connector, rejecting self-loops and edges that close a cycle.
    pub fn add_connector(&mut self, connector: Connector) -> Result<ConnectorId> {
        self.require(&connector.node1)?;
        self.require(&connector.node2)?;
        if self.find_connector(&connector.id).is_some() {
            return Err(WeftError::DuplicateNode(connector.id.to_string()));
        }
        if connector.node1 == connector.node2 || self.reachable(&connector.node2, &connector.node1) {
            let label = |id: &NodeId| {
                self.find_node(id)
                    .map(|n| n.label.clone())
                    .unwrap_or_else(|| id.to_string())
            };
            let err = WeftError::CycleRejected {
                from: label(&connector.node1),
                to: label(&connector.node2),
            };
            warn!(error = %err, "Rejected connector");
            return Err(err);
        }

        let id = connector.id.clone();
        if let Some(n) = self.find_node_mut(&connector.node1) {
            n.output_connectors.push(id.clone());
        }
        if let Some(n) = self.find_node_mut(&connector.node2) {
            n.input_connectors.push(id.clone());
        }
        let condition = connector.condition().clone();
        if condition.label() != DEFAULT_CONDITION_LABEL {
            self.register_text(condition);
        }
        debug!(id = %id, from = %connector.node1, to = %connector.node2, "Added connector");
        self.connectors.push(connector);
        self.dirty = true;
        Ok(id)
    }

    /// Remove a connector from both endpoints and the global list.
    pub fn remove_connector(&mut self, id: &ConnectorId) -> Result<Connector> {
        let idx = self
            .connectors
            .iter()
            .position(|c| &c.id == id)
            .ok_or_else(|| WeftError::MissingNode(format!("connector {id}")))?;
        let connector = self.connectors.remove(idx);
        for node in &mut self.nodes {
            node.output_connectors.retain(|c| c != id);
            node.input_connectors.retain(|c| c != id);
        }
        self.unregister_text(connector.condition());
        self.dirty = true;
        Ok(connector)
    }

    /// True if `target` can be reached from `from` along output edges.
    fn reachable(&self, from: &NodeId, target: &NodeId) -> bool {
        let mut seen: HashSet<&NodeId> = HashSet::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            stack.extend(
                self.connectors
                    .iter()
                    .filter(|c| &c.node1 == id)
                    .map(|c| &c.node2),
            );
        }
        false
    }

    /// Duplicate a node with a fresh id and no connectors.
    pub fn copy_node(&mut self, id: &NodeId) -> Result<NodeId> {
        let mut record = self.require(id)?.to_record();
        record.id = NodeId::new();
        record.label = format!("{} copy", record.label);
        record.center_x += 20.0;
        record.center_y += 20.0;
        let node = self.registry.deserialize(&record)?;
        self.add_node(node)
    }

    /// Remove every node and connector.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.connectors.clear();
        self.text_data.clear();
        self.dirty = true;
    }

    // ── Execution ───────────────────────────────────────────────

    /// Run the Init node once. Its successors are not traversed.
    pub async fn initialize(&mut self, state: State, console: &dyn Console) -> Result<RunReport> {
        let init = self
            .init_node()
            .ok_or_else(|| WeftError::MissingNode(INIT_KIND.to_string()))?;
        if init.body().spent() {
            info!("Flowchart already initialized");
            console.system("Already initialized");
            return Ok(RunReport {
                state,
                status: RunStatus::Completed,
                executed: Vec::new(),
            });
        }
        let id = init.id.clone();
        Ok(self.drive(state, vec![id], console, false).await)
    }

    /// Run the main loop from the Start node.
    pub async fn run(&mut self, state: State, console: &dyn Console) -> Result<RunReport> {
        let start = self
            .start_node()
            .ok_or_else(|| WeftError::MissingNode(START_KIND.to_string()))?
            .id
            .clone();
        Ok(self.drive(state, vec![start], console, true).await)
    }

    /// Run the main loop from an explicit queue.
    pub async fn run_from(
        &mut self,
        state: State,
        queue: Vec<NodeId>,
        console: &dyn Console,
    ) -> Result<RunReport> {
        for id in &queue {
            self.require(id)?;
        }
        Ok(self.drive(state, queue, console, true).await)
    }

    async fn drive(
        &mut self,
        mut state: State,
        queue: Vec<NodeId>,
        console: &dyn Console,
        follow_connectors: bool,
    ) -> RunReport {
        let mut queue: VecDeque<NodeId> = queue.into();
        let mut executed = Vec::new();
        self.stop.start();
        info!(queued = queue.len(), "Flowchart run started");

        let status = loop {
            // A stop raised by the last node still ends the run as completed
            let Some(id) = queue.pop_front() else {
                break RunStatus::Completed;
            };
            if !self.stop.is_running() {
                info!(executed = executed.len(), pending = queue.len() + 1, "Flowchart run stopped");
                console.system("Stopped");
                break RunStatus::Stopped;
            }
            if self.max_steps > 0 && executed.len() >= self.max_steps {
                let message = format!("exceeded {} steps", self.max_steps);
                error!(max_steps = self.max_steps, "Flowchart run exceeded step bound");
                console.error("System", &message);
                break RunStatus::Errored {
                    node: String::new(),
                    category: ErrorCategory::Execution,
                    message,
                };
            }
            let Some(idx) = self.index_of(&id) else {
                continue;
            };

            let node = &self.nodes[idx];
            let label = node.label.clone();
            debug!(node = %label, kind = node.kind(), "Running node");

            let result = node.run(console, &self.stop, &mut state).await;
            let output = match result {
                Ok(output) => output,
                Err(e) => {
                    error!(node = %label, error = %e, "Node failed");
                    console.error(&label, &e.console_message());
                    break RunStatus::Errored {
                        node: label,
                        category: e.category(),
                        message: e.console_message(),
                    };
                }
            };

            let Some(output) = output else {
                info!(node = %label, "Node signalled termination");
                break RunStatus::Completed;
            };
            executed.push(id);
            console.info(&label, &output);
            info!(node = %label, output_len = output.len(), "Node finished");

            if !follow_connectors {
                continue;
            }
            match self.next_node(idx, &state) {
                Ok(Some(next)) => {
                    if !queue.contains(&next) {
                        queue.push_back(next);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!(node = %label, error = %e, "Condition failed");
                    console.error(&label, &e.console_message());
                    break RunStatus::Errored {
                        node: label,
                        category: e.category(),
                        message: e.console_message(),
                    };
                }
            }
        };

        if status == RunStatus::Completed {
            console.system("Done");
        }
        info!(status = ?status, executed = executed.len(), "Flowchart run finished");
        self.stop.stop();
        RunReport {
            state,
            status,
            executed,
        }
    }

    /// First output connector whose condition holds. Later satisfied
    /// connectors are not considered.
    fn next_node(&self, idx: usize, state: &State) -> Result<Option<NodeId>> {
        for cid in &self.nodes[idx].output_connectors {
            let Some(connector) = self.find_connector(cid) else {
                continue;
            };
            let taken = connector.evaluate(state)?;
            debug!(connector = %cid, taken, "Evaluated condition");
            if taken {
                return Ok(Some(connector.node2.clone()));
            }
        }
        Ok(None)
    }

    /// Sum of every node's cost estimate, in collection order. Placeholders
    /// are written into `state` as each node is estimated.
    pub fn cost(&self, state: &mut State) -> Result<f64> {
        let mut total = 0.0;
        for node in &self.nodes {
            total += node.cost(state)?;
        }
        info!(total, "Estimated flowchart cost");
        Ok(total)
    }

    // ── Serialization ───────────────────────────────────────────

    pub fn serialize(&self) -> FlowchartRecord {
        FlowchartRecord {
            nodes: self.nodes.iter().map(Node::to_record).collect(),
            connectors: self.connectors.iter().map(Connector::to_record).collect(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.serialize())?)
    }

    /// Rebuild a flowchart: nodes first, then connectors resolved against
    /// them. The result is not dirty.
    pub fn deserialize(registry: Arc<NodeRegistry>, record: &FlowchartRecord) -> Result<Self> {
        let mut chart = Self::empty(registry);
        for node_record in &record.nodes {
            let node = chart.registry.deserialize(node_record)?;
            chart.add_node(node)?;
        }
        for conn in &record.connectors {
            for end in [&conn.prev, &conn.next] {
                if chart.find_node(end).is_none() {
                    return Err(WeftError::UnresolvedNode {
                        connector: conn.id.to_string(),
                        node: end.to_string(),
                    });
                }
            }
            chart.add_connector(Connector::from_record(conn))?;
        }
        chart.dirty = false;
        info!(
            nodes = chart.nodes.len(),
            connectors = chart.connectors.len(),
            "Flowchart loaded"
        );
        Ok(chart)
    }

    pub fn from_json(registry: Arc<NodeRegistry>, json: &str) -> Result<Self> {
        let record: FlowchartRecord =
            serde_json::from_str(json).map_err(|e| WeftError::MalformedFile(e.to_string()))?;
        Self::deserialize(registry, &record)
    }

    /// Render as a Mermaid `graph TD` diagram.
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");
        for node in &self.nodes {
            out.push_str(&format!("{}(\"{}\")\n", node.id, escape_mermaid(&node.label)));
        }
        for conn in &self.connectors {
            match conn.label() {
                Some(label) => out.push_str(&format!(
                    "{} -->|\"{}\"| {}\n",
                    conn.node1,
                    escape_mermaid(&label),
                    conn.node2
                )),
                None => out.push_str(&format!("{} --> {}\n", conn.node1, conn.node2)),
            }
        }
        out
    }
}

fn escape_mermaid(text: &str) -> String {
    text.replace('"', "#quot;")
}

impl std::fmt::Debug for Flowchart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flowchart")
            .field("nodes", &self.nodes)
            .field("connectors", &self.connectors.len())
            .field("dirty", &self.dirty)
            .finish()
    }
}
