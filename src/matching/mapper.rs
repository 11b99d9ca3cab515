//! In-memory file to node mapping

use parking_lot::RwLock;
use std::collections::HashMap;

/// Which nodes hold a file, as learned from searches and the master node
#[derive(Debug, Default)]
pub struct FileNodeMapper {
    mappings: RwLock<HashMap<String, Vec<String>>>,
}

impl FileNodeMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the node list of a file
    pub fn store_mapping<S: Into<String>>(&self, file_id: S, node_ids: Vec<String>) {
        self.mappings.write().insert(file_id.into(), node_ids);
    }

    /// Append a node to a file's list, ignoring duplicates
    pub fn add_node_id(&self, file_id: &str, node_id: &str) {
        let mut mappings = self.mappings.write();
        let ids = mappings.entry(file_id.to_string()).or_default();
        if !ids.iter().any(|id| id == node_id) {
            ids.push(node_id.to_string());
        }
    }

    pub fn node_ids(&self, file_id: &str) -> Vec<String> {
        self.mappings.read().get(file_id).cloned().unwrap_or_default()
    }

    pub fn remove(&self, file_id: &str) -> Option<Vec<String>> {
        self.mappings.write().remove(file_id)
    }

    pub fn clear(&self) {
        self.mappings.write().clear();
    }

    pub fn len(&self) -> usize {
        self.mappings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.read().is_empty()
    }
}
