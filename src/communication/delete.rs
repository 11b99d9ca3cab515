//! Deletion of stored files from nodes, the master mapping and the device

use super::master::MasterNode;
use crate::error::{VStoreError, VStoreResult};
use crate::events::{EventBus, VStoreEvent};
use crate::files::VStoreFile;
use crate::nodes::{NodeInfo, NodeManager};
use crate::storage::Database;
use reqwest::multipart::Form;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct Deleter {
    db: Database,
    nodes: Arc<NodeManager>,
    master: MasterNode,
    events: EventBus,
    client: Client,
    device_id: String,
    thumbnails_dir: PathBuf,
}

impl Deleter {
    pub fn new(
        db: Database,
        nodes: Arc<NodeManager>,
        master: MasterNode,
        events: EventBus,
        client: Client,
        device_id: String,
        thumbnails_dir: PathBuf,
    ) -> Self {
        Self {
            db,
            nodes,
            master,
            events,
            client,
            device_id,
            thumbnails_dir,
        }
    }

    /// Mark a file for deletion and run all pending deletions
    pub async fn delete_file(&self, file_id: &str) -> VStoreResult<()> {
        if file_id.trim().is_empty() {
            return Err(VStoreError::missing_parameters());
        }
        if self.db.mark_for_deletion(file_id)?.is_none() {
            return Err(VStoreError::file_not_found(file_id));
        }
        self.run_pending_deletions().await
    }

    /// Delete every file marked for deletion. Files some node refused stay marked.
    pub async fn run_pending_deletions(&self) -> VStoreResult<()> {
        for file in self.db.files_for_deletion()? {
            if self.delete_everywhere(&file).await {
                self.delete_locally(&file).await?;
                info!(file_id = %file.uuid, "File deleted");
                self.events.publish(VStoreEvent::FileDeleted {
                    file_id: file.uuid.clone(),
                });
            } else {
                warn!(file_id = %file.uuid, "Deletion incomplete, will retry");
            }
        }
        Ok(())
    }

    /// Returns true once no remote copy remains
    async fn delete_everywhere(&self, file: &VStoreFile) -> bool {
        if file.stored_node_ids.is_empty() {
            debug!(file_id = %file.uuid, "File only stored on this device");
            return true;
        }
        let mut all_deleted = true;
        for node_id in &file.stored_node_ids {
            let Some(node) = self.nodes.get_node(node_id) else {
                warn!(node_id = %node_id, "Node of stored file is unknown, skipping");
                continue;
            };
            if !self.delete_from_node(file, &node).await {
                all_deleted = false;
            }
        }
        if !all_deleted {
            return false;
        }
        if let Err(e) = self.master.delete_file_node_mapping(&file.uuid).await {
            warn!(file_id = %file.uuid, error = %e, "Could not delete file node mapping");
        }
        true
    }

    async fn delete_from_node(&self, file: &VStoreFile, node: &NodeInfo) -> bool {
        let url = node.delete_uri(&file.uuid, &self.device_id);
        let form = Form::new()
            .text("uuid", file.uuid.clone())
            .text("phoneID", self.device_id.clone());
        let response = match self.client.delete(&url).multipart(form).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(node_id = %node.uuid, error = %e, "Delete request failed");
                return false;
            }
        };
        if response.status() == StatusCode::NOT_FOUND {
            return true;
        }
        match response.text().await {
            Ok(text) => node_confirmed_delete(&text),
            Err(e) => {
                warn!(node_id = %node.uuid, error = %e, "Delete reply unreadable");
                false
            }
        }
    }

    async fn delete_locally(&self, file: &VStoreFile) -> VStoreResult<()> {
        self.db.delete_file(&file.uuid)?;
        for path in [
            file.full_path(),
            self.thumbnails_dir.join(format!("{}.png", file.uuid)),
        ] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Could not remove local copy"),
            }
        }
        Ok(())
    }
}

/// Nodes confirm with any `error` other than 1
fn node_confirmed_delete(text: &str) -> bool {
    let Ok(reply) = serde_json::from_str::<Value>(text) else {
        return false;
    };
    match reply.get("error") {
        Some(Value::Number(n)) => n.as_i64() != Some(1),
        Some(Value::Bool(b)) => !b,
        Some(Value::String(s)) => s.trim() != "1" && !s.eq_ignore_ascii_case("true"),
        Some(_) => true,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::FileNodeMapper;
    use url::Url;

    fn deleter(db: Database, thumbnails: &std::path::Path) -> Deleter {
        let nodes = Arc::new(NodeManager::new(db.clone(), Client::new()).unwrap());
        let master = MasterNode::new(
            Url::parse("http://127.0.0.1:1").unwrap(),
            "device".into(),
            Client::new(),
            Arc::new(FileNodeMapper::new()),
        );
        Deleter::new(
            db,
            nodes,
            master,
            EventBus::new(),
            Client::new(),
            "device".into(),
            thumbnails.to_path_buf(),
        )
    }

    #[test]
    fn test_node_confirmation() {
        assert!(node_confirmed_delete(r#"{"error": 0}"#));
        assert!(node_confirmed_delete(r#"{"error": false}"#));
        assert!(!node_confirmed_delete(r#"{"error": 1}"#));
        assert!(!node_confirmed_delete(r#"{"error": true}"#));
        assert!(node_confirmed_delete(r#"{"error": 2}"#));
        assert!(node_confirmed_delete(r#"{"error": "0"}"#));
        assert!(!node_confirmed_delete("{}"));
        assert!(!node_confirmed_delete("gone"));
    }

    #[tokio::test]
    async fn test_local_only_file_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::temporary().unwrap();
        let file = VStoreFile::new("f1", dir.path(), "a", "text/plain", "txt", 3, false);
        std::fs::write(file.full_path(), b"abc").unwrap();
        db.insert_file(&file).unwrap();

        let d = deleter(db.clone(), dir.path());
        let mut rx = d.events.subscribe();
        d.delete_file("f1").await.unwrap();

        assert!(db.get_file("f1").unwrap().is_none());
        assert!(!file.full_path().exists());
        match rx.recv().await.unwrap() {
            VStoreEvent::FileDeleted { file_id } => assert_eq!(file_id, "f1"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_file_and_empty_id() {
        let dir = tempfile::tempdir().unwrap();
        let d = deleter(Database::temporary().unwrap(), dir.path());
        assert_eq!(
            d.delete_file("missing").await.unwrap_err().code(),
            crate::error::ErrorCode::FileNotFound
        );
        assert!(d.delete_file(" ").await.is_err());
    }
}
