use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// One history record. History node kinds store `{role, content}` pairs,
/// `commit_turn` stores a full variable snapshot.
pub type HistoryEntry = BTreeMap<String, String>;

/// Mutable context threaded through a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Node label -> latest output of that node.
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Output of the most recently executed node.
    #[serde(default)]
    pub result: String,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            ..Self::default()
        }
    }

    /// Variable lookup. Missing labels read as the empty string.
    pub fn get(&self, label: &str) -> &str {
        self.variables.get(label).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, label: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(label.into(), value.into());
    }

    pub fn contains(&self, label: &str) -> bool {
        self.variables.contains_key(label)
    }

    pub fn reset(&mut self) {
        self.variables.clear();
        self.history.clear();
        self.result.clear();
    }

    /// Overlay variables, overwriting on conflict.
    pub fn merge(&mut self, other: &HashMap<String, String>) {
        for (k, v) in other {
            self.variables.insert(k.clone(), v.clone());
        }
    }

    pub fn merge_state(&mut self, other: &State) {
        self.merge(&other.variables);
    }

    /// Append a snapshot of the current variables to history.
    pub fn commit_turn(&mut self) {
        let snapshot: HistoryEntry = self
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.history.push(snapshot);
    }

    pub fn push_message(&mut self, role: &str, content: impl Into<String>) {
        let mut entry = HistoryEntry::new();
        entry.insert("role".to_string(), role.to_string());
        entry.insert("content".to_string(), content.into());
        self.history.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_variable_reads_empty() {
        let state = State::new();
        assert_eq!(state.get("nope"), "");
        assert!(!state.contains("nope"));
    }

    #[test]
    fn test_copy_shares_nothing() {
        let mut a = State::with_result("x");
        a.set("A", "1");
        let mut b = a.clone();
        b.set("A", "2");
        b.result.push('y');
        assert_eq!(a.get("A"), "1");
        assert_eq!(a.result, "x");
    }

    #[test]
    fn test_merge_overwrites() {
        let mut a = State::new();
        a.set("A", "1");
        a.set("B", "1");
        let mut b = State::new();
        b.set("B", "2");
        b.set("C", "3");
        a.merge_state(&b);
        assert_eq!(a.get("A"), "1");
        assert_eq!(a.get("B"), "2");
        assert_eq!(a.get("C"), "3");
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut state = State::with_result("r");
        state.set("A", "1");
        state.commit_turn();
        state.reset();
        assert_eq!(state, State::new());
    }

    #[test]
    fn test_serde_shape() {
        let mut state = State::with_result("done");
        state.push_message("user", "hi");
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["result"], "done");
        assert_eq!(json["history"][0]["role"], "user");
        let back: State = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
