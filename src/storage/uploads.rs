//! Per node upload results
//!
//! A file stays pending until every node it was decided for has either
//! confirmed the upload or refused it. Rows are keyed `<file>/<node>`.

use super::{get_json, put_json, Database};
use crate::error::VStoreResult;
use crate::files::VStoreFile;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadStatus {
    Confirmed,
    /// The node refused the file, it will not be retried
    Rejected,
}

fn upload_key(file_id: &str, node_id: &str) -> String {
    format!("{file_id}/{node_id}")
}

impl Database {
    pub fn upload_status(&self, file_id: &str, node_id: &str) -> VStoreResult<Option<UploadStatus>> {
        get_json(&self.uploads, &upload_key(file_id, node_id))
    }

    /// Settled nodes of a file
    pub fn upload_statuses(&self, file_id: &str) -> VStoreResult<HashMap<String, UploadStatus>> {
        let prefix = format!("{file_id}/");
        let mut statuses = HashMap::new();
        for entry in self.uploads.scan_prefix(prefix.as_bytes()) {
            let (key, bytes) = entry?;
            let key = String::from_utf8_lossy(&key);
            match serde_json::from_slice(&bytes) {
                Ok(status) => {
                    statuses.insert(key[prefix.len()..].to_string(), status);
                }
                Err(e) => warn!(key = %key, error = %e, "Skipping undecodable upload status"),
            }
        }
        Ok(statuses)
    }

    /// Nodes of `file` that have neither confirmed nor refused it
    pub fn unsettled_nodes(&self, file: &VStoreFile) -> VStoreResult<Vec<String>> {
        let statuses = self.upload_statuses(&file.uuid)?;
        Ok(file
            .stored_node_ids
            .iter()
            .filter(|id| !statuses.contains_key(id.as_str()))
            .cloned()
            .collect())
    }

    /// Record the result for one node and update the file flags.
    ///
    /// `upload_pending` is cleared once every stored node is settled,
    /// `upload_failed` is set as soon as one node refused the file.
    pub fn settle_upload(
        &self,
        file_id: &str,
        node_id: &str,
        status: UploadStatus,
    ) -> VStoreResult<Option<VStoreFile>> {
        put_json(&self.uploads, &upload_key(file_id, node_id), &status)?;
        let statuses = self.upload_statuses(file_id)?;
        self.update_file(file_id, |f| {
            if f.stored_node_ids.iter().all(|id| statuses.contains_key(id)) {
                f.upload_pending = false;
            }
            if statuses.values().any(|s| *s == UploadStatus::Rejected) {
                f.upload_failed = true;
            }
        })
    }

    pub fn clear_upload_statuses(&self, file_id: &str) -> VStoreResult<()> {
        let prefix = format!("{file_id}/");
        for entry in self.uploads.scan_prefix(prefix.as_bytes()) {
            let (key, _) = entry?;
            self.uploads.remove(key)?;
        }
        Ok(())
    }
}
