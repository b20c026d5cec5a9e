pub mod connector;
pub mod flowchart;
pub mod node;
pub mod registry;

pub use connector::{Connector, ConnectorRecord, DEFAULT_CONDITION_LABEL, DEFAULT_CONDITION_TEXT};
pub use flowchart::{Flowchart, FlowchartRecord, RunReport, RunStatus};
pub use node::{options_map, Node, NodeRecord};
pub use registry::{KindFactory, NodeRegistry};
