//! Storage nodes: descriptions, the node table and download ordering

pub mod manager;
pub mod metric;
pub mod node;

pub use manager::{HierarchyMode, NodeManager};
pub use metric::NodeDistanceMetric;
pub use node::{NodeInfo, NodeType};
