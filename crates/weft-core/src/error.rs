use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeftError {
    // Configuration errors
    #[error("Unknown node kind: {0}")]
    UnknownNodeKind(String),

    #[error("Malformed flowchart file: {0}")]
    MalformedFile(String),

    #[error("Connector {connector} references unknown node {node}")]
    UnresolvedNode { connector: String, node: String },

    #[error("Node already in flowchart: {0}")]
    DuplicateNode(String),

    #[error("Flowchart already has a {0}")]
    SingletonViolation(String),

    #[error("Node not found: {0}")]
    MissingNode(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Execution errors
    #[error("{node}: {message}")]
    NodeExecution { node: String, message: String },

    #[error("Template error: {0}")]
    Template(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Assertion failed: {0}")]
    Assertion(String),

    // Condition errors
    #[error("Condition `{expression}` failed: {message}")]
    ConditionEvaluation { expression: String, message: String },

    // Graph errors
    #[error("Connector {from} -> {to} would create a cycle")]
    CycleRejected { from: String, to: String },

    // Archive errors
    #[error("Archive error: {0}")]
    Archive(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification used by the scheduler and by callers deciding
/// whether an error ends a run or only the operation that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Execution,
    Condition,
    Cycle,
}

impl WeftError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            WeftError::UnknownNodeKind(_)
            | WeftError::MalformedFile(_)
            | WeftError::UnresolvedNode { .. }
            | WeftError::DuplicateNode(_)
            | WeftError::SingletonViolation(_)
            | WeftError::MissingNode(_)
            | WeftError::Config(_)
            | WeftError::ConfigNotFound(_)
            | WeftError::Archive(_) => ErrorCategory::Configuration,
            WeftError::ConditionEvaluation { .. } => ErrorCategory::Condition,
            WeftError::CycleRejected { .. } => ErrorCategory::Cycle,
            WeftError::NodeExecution { .. }
            | WeftError::Template(_)
            | WeftError::Database(_)
            | WeftError::LlmRequest(_)
            | WeftError::Http(_)
            | WeftError::Assertion(_)
            | WeftError::Io(_)
            | WeftError::Json(_) => ErrorCategory::Execution,
        }
    }

    /// Text for a console error line, which already names the node.
    pub fn console_message(&self) -> String {
        match self {
            WeftError::NodeExecution { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn node(node: impl Into<String>, message: impl std::fmt::Display) -> Self {
        WeftError::NodeExecution {
            node: node.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WeftError>;
