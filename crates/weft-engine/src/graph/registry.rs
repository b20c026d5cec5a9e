use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::traits::NodeKind;

use super::node::{Node, NodeRecord};
use crate::builtin::{InitKind, StartKind, INIT_KIND, START_KIND};

/// Builds a kind from a node record's kind-specific fields.
pub type KindFactory = Arc<dyn Fn(&NodeRecord) -> Result<Box<dyn NodeKind>> + Send + Sync>;

struct KindEntry {
    factory: KindFactory,
    asset_fields: Vec<String>,
}

/// Maps `classname` strings to node kind constructors. Used both when
/// creating nodes interactively and when loading a saved flowchart.
pub struct NodeRegistry {
    kinds: BTreeMap<String, KindEntry>,
}

impl NodeRegistry {
    /// A registry with the Start and Init kinds.
    pub fn new() -> Self {
        let mut registry = Self {
            kinds: BTreeMap::new(),
        };
        registry.register(START_KIND, |_| Ok(Box::new(StartKind)));
        registry.register(INIT_KIND, |_| Ok(Box::new(InitKind::new())));
        registry
    }

    /// Register a kind. Re-registering replaces the previous factory.
    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&NodeRecord) -> Result<Box<dyn NodeKind>> + Send + Sync + 'static,
    {
        self.register_with_assets(kind, &[], factory);
    }

    /// Register a kind whose listed string fields name files that are
    /// packaged into the archive next to `flowchart.json`.
    pub fn register_with_assets<F>(&mut self, kind: &str, asset_fields: &[&str], factory: F)
    where
        F: Fn(&NodeRecord) -> Result<Box<dyn NodeKind>> + Send + Sync + 'static,
    {
        debug!(kind, "Registered node kind");
        self.kinds.insert(
            kind.to_string(),
            KindEntry {
                factory: Arc::new(factory),
                asset_fields: asset_fields.iter().map(|s| s.to_string()).collect(),
            },
        );
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    /// Registered kind names, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        self.kinds.keys().map(String::as_str).collect()
    }

    pub fn asset_fields(&self, kind: &str) -> &[String] {
        self.kinds
            .get(kind)
            .map(|e| e.asset_fields.as_slice())
            .unwrap_or(&[])
    }

    /// Construct a fresh node of `kind` with default options.
    pub fn create(&self, kind: &str, label: &str, center_x: f64, center_y: f64) -> Result<Node> {
        self.deserialize(&NodeRecord::new(kind, label, center_x, center_y))
    }

    /// Rebuild a node from its saved record, keeping its id.
    pub fn deserialize(&self, record: &NodeRecord) -> Result<Node> {
        let entry = self
            .kinds
            .get(&record.classname)
            .ok_or_else(|| WeftError::UnknownNodeKind(record.classname.clone()))?;
        let kind = (entry.factory)(record)?;
        Ok(Node::with_id(
            record.id.clone(),
            record.label.clone(),
            record.center_x,
            record.center_y,
            kind,
        ))
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_kinds_registered() {
        let registry = NodeRegistry::new();
        assert_eq!(registry.kinds(), vec![INIT_KIND, START_KIND]);
        let node = registry.create(START_KIND, "Start", 1.0, 2.0).unwrap();
        assert_eq!(node.kind(), START_KIND);
        assert_eq!(node.label, "Start");
    }

    #[test]
    fn test_unknown_kind_is_named_error() {
        let registry = NodeRegistry::new();
        match registry.create("TeleportNode", "x", 0.0, 0.0) {
            Err(WeftError::UnknownNodeKind(kind)) => assert_eq!(kind, "TeleportNode"),
            other => panic!("expected UnknownNodeKind, got {:?}", other.map(|n| n.label)),
        }
    }

    #[test]
    fn test_deserialize_keeps_id() {
        let registry = NodeRegistry::new();
        let record = NodeRecord::new(INIT_KIND, "Init", 0.0, 0.0);
        let node = registry.deserialize(&record).unwrap();
        assert_eq!(node.id, record.id);
    }

    #[test]
    fn test_asset_fields() {
        let mut registry = NodeRegistry::new();
        registry.register_with_assets("IngestNode", &["filename", "label_file"], |_| {
            Ok(Box::new(StartKind))
        });
        assert_eq!(registry.asset_fields("IngestNode"), ["filename", "label_file"]);
        assert!(registry.asset_fields(START_KIND).is_empty());
    }
}
