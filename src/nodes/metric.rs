//! Ordering of nodes for downloads

use super::node::{NodeInfo, NodeType};

pub struct NodeDistanceMetric;

impl NodeDistanceMetric {
    pub fn metric(node: &NodeInfo) -> u8 {
        match node.node_type {
            NodeType::Cloudlet => 1,
            NodeType::Gateway => 2,
            NodeType::Corenet => 3,
            _ => 4,
        }
    }

    /// Highest metric first. Nodes with equal metric keep their order.
    pub fn sort_nodes_by_metric(mut nodes: Vec<NodeInfo>) -> Vec<NodeInfo> {
        nodes.sort_by(|a, b| Self::metric(b).cmp(&Self::metric(a)));
        nodes
    }

    /// Index in `start..end` of the cloud or core network node with the best download bandwidth
    pub fn best_dl_cloud(nodes: &[NodeInfo], start: usize, end: usize) -> Option<usize> {
        if start > nodes.len() || end > nodes.len() {
            return None;
        }
        let mut best: Option<usize> = None;
        for (i, node) in nodes.iter().enumerate().take(end).skip(start) {
            if !matches!(node.node_type, NodeType::Cloud | NodeType::Corenet) {
                continue;
            }
            match best {
                Some(b) if node.bandwidth_down <= nodes[b].bandwidth_down => {}
                _ => best = Some(i),
            }
        }
        best
    }
}
