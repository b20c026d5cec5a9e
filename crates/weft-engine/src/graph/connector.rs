use serde::{Deserialize, Serialize};

use weft_core::error::Result;
use weft_core::state::State;
use weft_core::text::SharedText;
use weft_core::types::{ConnectorId, NodeId};

use crate::condition::evaluate_condition;

pub const DEFAULT_CONDITION_LABEL: &str = "Untitled";
pub const DEFAULT_CONDITION_TEXT: &str = "true";

/// Directed, conditionally-gated edge from `node1` to `node2`.
#[derive(Debug, Clone)]
pub struct Connector {
    pub id: ConnectorId,
    pub node1: NodeId,
    pub node2: NodeId,
    condition: SharedText,
}

impl Connector {
    /// Unconditional connector.
    pub fn new(node1: NodeId, node2: NodeId) -> Self {
        Self::with_condition(
            node1,
            node2,
            SharedText::new(DEFAULT_CONDITION_LABEL, DEFAULT_CONDITION_TEXT),
        )
    }

    pub fn with_condition(node1: NodeId, node2: NodeId, condition: SharedText) -> Self {
        Self {
            id: ConnectorId::new(),
            node1,
            node2,
            condition,
        }
    }

    pub fn condition(&self) -> &SharedText {
        &self.condition
    }

    /// True while the condition is the stock always-true text.
    pub fn has_default_condition(&self) -> bool {
        let text = self.condition.text();
        let text = text.trim();
        text.is_empty() || text == DEFAULT_CONDITION_TEXT
    }

    /// Display label, or `None` while both the label and the text are the
    /// stock ones.
    pub fn label(&self) -> Option<String> {
        let label = self.condition.label();
        if label == DEFAULT_CONDITION_LABEL && self.has_default_condition() {
            None
        } else {
            Some(label)
        }
    }

    pub fn evaluate(&self, state: &State) -> Result<bool> {
        evaluate_condition(&self.condition.text(), state)
    }

    pub fn to_record(&self) -> ConnectorRecord {
        let condition = self.condition.snapshot();
        ConnectorRecord {
            id: self.id.clone(),
            prev: self.node1.clone(),
            next: self.node2.clone(),
            conditional: condition.text,
            label: condition.label,
        }
    }

    pub fn from_record(record: &ConnectorRecord) -> Self {
        let label = if record.label.is_empty() {
            DEFAULT_CONDITION_LABEL
        } else {
            &record.label
        };
        Self {
            id: record.id.clone(),
            node1: record.prev.clone(),
            node2: record.next.clone(),
            condition: SharedText::new(label, record.conditional.clone()),
        }
    }
}

/// Saved form of a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorRecord {
    pub id: ConnectorId,
    pub prev: NodeId,
    pub next: NodeId,
    #[serde(default)]
    pub conditional: String,
    #[serde(default)]
    pub label: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (NodeId, NodeId) {
        (NodeId::from_str("a"), NodeId::from_str("b"))
    }

    #[test]
    fn test_default_connector_is_unlabeled_and_true() {
        let (a, b) = ids();
        let conn = Connector::new(a, b);
        assert!(conn.label().is_none());
        assert!(conn.evaluate(&State::new()).unwrap());
    }

    #[test]
    fn test_conditional_connector() {
        let (a, b) = ids();
        let conn = Connector::with_condition(a, b, SharedText::new("is yes", "result == 'yes'"));
        assert_eq!(conn.label().as_deref(), Some("is yes"));
        assert!(conn.evaluate(&State::with_result("yes")).unwrap());
        assert!(!conn.evaluate(&State::with_result("no")).unwrap());
    }

    #[test]
    fn test_blank_condition_always_true() {
        let (a, b) = ids();
        let conn = Connector::with_condition(a, b, SharedText::new("blank", "  "));
        assert_eq!(conn.label().as_deref(), Some("blank"));
        assert!(conn.has_default_condition());
        assert!(conn.evaluate(&State::new()).unwrap());
    }

    #[test]
    fn test_named_true_condition_keeps_label() {
        let (a, b) = ids();
        let named = Connector::with_condition(a.clone(), b.clone(), SharedText::new("always", "true"));
        assert_eq!(named.label().as_deref(), Some("always"));

        let edited = Connector::with_condition(a, b, SharedText::new(DEFAULT_CONDITION_LABEL, "result == 'x'"));
        assert_eq!(edited.label().as_deref(), Some(DEFAULT_CONDITION_LABEL));
    }

    #[test]
    fn test_record_shape() {
        let (a, b) = ids();
        let conn = Connector::with_condition(a, b, SharedText::new("check", "Counter > 1"));
        let json = serde_json::to_value(conn.to_record()).unwrap();
        assert_eq!(json["prev"], "a");
        assert_eq!(json["next"], "b");
        assert_eq!(json["conditional"], "Counter > 1");
        assert_eq!(json["label"], "check");

        let back = Connector::from_record(&serde_json::from_value(json).unwrap());
        assert_eq!(back.id, conn.id);
        assert_eq!(back.condition().snapshot(), conn.condition().snapshot());
    }
}
