pub mod archive;
pub mod builtin;
pub mod condition;
pub mod graph;

pub use builtin::{InitKind, StartKind, INIT_KIND, START_KIND};
pub use condition::{evaluate_condition, Expression, Value};
pub use graph::{
    Connector, Flowchart, FlowchartRecord, Node, NodeRecord, NodeRegistry, RunReport, RunStatus,
};
