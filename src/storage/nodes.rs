use super::{all_json, get_json, put_json, Database};
use crate::error::VStoreResult;
use crate::nodes::NodeInfo;

impl Database {
    /// Insert or replace a node
    pub fn insert_node(&self, node: &NodeInfo) -> VStoreResult<()> {
        put_json(&self.nodes, &node.uuid, node)
    }

    pub fn get_node(&self, uuid: &str) -> VStoreResult<Option<NodeInfo>> {
        get_json(&self.nodes, uuid)
    }

    pub fn nodes(&self) -> VStoreResult<Vec<NodeInfo>> {
        all_json(&self.nodes)
    }

    pub fn delete_node(&self, uuid: &str) -> VStoreResult<bool> {
        Ok(self.nodes.remove(uuid.as_bytes())?.is_some())
    }

    pub fn clear_nodes(&self) -> VStoreResult<()> {
        self.nodes.clear()?;
        Ok(())
    }
}
