//! Master node API
//!
//! The master node distributes the configuration and keeps track of which
//! storage nodes hold which file.

use super::http::{expect_status, json_body};
use crate::error::{VStoreError, VStoreResult};
use crate::matching::FileNodeMapper;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

pub const ROUTE_CONFIGURATION: &str = "/v1/configuration";
pub const ROUTE_NODES: &str = "/v1/nodes";
pub const ROUTE_FILE_NODE_MAPPING: &str = "/v1/file_node_mapping";

/// Absolute URL of a master route, keeping any path prefix of the base URL
pub fn master_route(base: &Url, route: &str) -> String {
    format!("{}{route}", base.as_str().trim_end_matches('/'))
}

/// Client for the file to node mapping endpoints
#[derive(Debug, Clone)]
pub struct MasterNode {
    base: Url,
    device_id: String,
    client: Client,
    mapper: Arc<FileNodeMapper>,
}

impl MasterNode {
    pub fn new(base: Url, device_id: String, client: Client, mapper: Arc<FileNodeMapper>) -> Self {
        Self {
            base,
            device_id,
            client,
            mapper,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Node ids from the local mapper, asking the master when none are known
    pub async fn node_ids_for_file(&self, file_id: &str) -> Vec<String> {
        let local = self.mapper.node_ids(file_id);
        if !local.is_empty() {
            return local;
        }
        match self.request_file_node_mapping(file_id).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(file_id, error = %e, "File node mapping request failed");
                Vec::new()
            }
        }
    }

    /// Node ids the master knows for a file. A non-empty answer is kept in the local mapper.
    pub async fn request_file_node_mapping(&self, file_id: &str) -> VStoreResult<Vec<String>> {
        let url = format!("{}/{file_id}", master_route(&self.base, ROUTE_FILE_NODE_MAPPING));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| VStoreError::request_failed(format!("{url}: {e}")))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        expect_status(&response, StatusCode::OK)?;
        let reply = json_body(response).await?;
        let node_ids = parse_mapping_reply(&reply)?;
        if !node_ids.is_empty() {
            self.mapper.store_mapping(file_id, node_ids.clone());
        }
        debug!(file_id, nodes = node_ids.len(), "File node mapping received");
        Ok(node_ids)
    }

    /// Announce that `node_id` now holds `file_id`
    pub async fn post_file_node_mapping(&self, file_id: &str, node_id: &str) -> VStoreResult<()> {
        let url = master_route(&self.base, ROUTE_FILE_NODE_MAPPING);
        let body = json!({
            "file_id": file_id,
            "node_id": node_id,
            "device_id": self.device_id,
        });
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| VStoreError::request_failed(format!("{url}: {e}")))?;
        expect_status(&response, StatusCode::CREATED)?;
        self.mapper.add_node_id(file_id, node_id);
        debug!(file_id, node_id, "File node mapping posted");
        Ok(())
    }

    pub async fn delete_file_node_mapping(&self, file_id: &str) -> VStoreResult<()> {
        let url = master_route(&self.base, ROUTE_FILE_NODE_MAPPING);
        let body = json!({
            "file_id": file_id,
            "device_id": self.device_id,
        });
        let response = self
            .client
            .delete(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| VStoreError::request_failed(format!("{url}: {e}")))?;
        if let Err(e) = expect_status(&response, StatusCode::OK) {
            warn!(file_id, status = %response.status(), "Master refused to delete the mapping");
            return Err(e);
        }
        self.mapper.remove(file_id);
        Ok(())
    }
}

/// `{"data": {"array": [node ids]}}`
fn parse_mapping_reply(reply: &Value) -> VStoreResult<Vec<String>> {
    let array = reply
        .get("data")
        .and_then(|d| d.get("array"))
        .and_then(Value::as_array)
        .ok_or_else(|| VStoreError::master_wrong_reply(reply.to_string()))?;
    Ok(array
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_route_keeps_prefix() {
        let base = Url::parse("http://master:5000/api/").unwrap();
        assert_eq!(
            master_route(&base, ROUTE_CONFIGURATION),
            "http://master:5000/api/v1/configuration"
        );
        let base = Url::parse("http://master:5000").unwrap();
        assert_eq!(master_route(&base, ROUTE_NODES), "http://master:5000/v1/nodes");
    }

    #[test]
    fn test_parse_mapping_reply() {
        let ids = parse_mapping_reply(&json!({"data": {"array": ["n1", "n2", 3]}})).unwrap();
        assert_eq!(ids, vec!["n1", "n2"]);
        assert!(parse_mapping_reply(&json!({"data": {}})).unwrap_err().to_string().contains("unexpected"));
        assert!(parse_mapping_reply(&json!({"array": []})).is_err());
    }
}
