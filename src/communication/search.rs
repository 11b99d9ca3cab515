//! Search for files matching a context across all storage nodes

use super::http::{json_body, reply_has_error};
use crate::context::SearchContextDescription;
use crate::error::{VStoreError, VStoreResult};
use crate::events::{EventBus, VStoreEvent};
use crate::files::FileMetadata;
use crate::matching::FileNodeMapper;
use crate::nodes::{NodeInfo, NodeManager};
use reqwest::multipart::Form;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

const REQUIRED_FILE_KEYS: [&str; 5] = [
    "uuid",
    "creationTimestamp",
    "mimetype",
    "descriptiveName",
    "filesize",
];

/// A running search. Dropping it aborts the per-node requests, call
/// [`SearchHandle::detach`] to keep them running.
#[derive(Debug)]
pub struct SearchHandle {
    pub request_id: String,
    tasks: JoinSet<usize>,
}

impl SearchHandle {
    /// Wait for every node to answer. Returns the total number of files found.
    pub async fn join(mut self) -> usize {
        let mut total = 0;
        while let Some(result) = self.tasks.join_next().await {
            match result {
                Ok(found) => total += found,
                Err(e) => warn!(error = %e, "Search task failed"),
            }
        }
        total
    }

    /// Let the requests finish in the background
    pub fn detach(mut self) {
        self.tasks.detach_all();
    }
}

#[derive(Clone)]
pub struct Searcher {
    nodes: Arc<NodeManager>,
    mapper: Arc<FileNodeMapper>,
    events: EventBus,
    client: Client,
    device_id: String,
}

impl Searcher {
    pub fn new(
        nodes: Arc<NodeManager>,
        mapper: Arc<FileNodeMapper>,
        events: EventBus,
        client: Client,
        device_id: String,
    ) -> Self {
        Self {
            nodes,
            mapper,
            events,
            client,
            device_id,
        }
    }

    /// Ask every node for files matching `context`. Returns `None` when no node is known.
    ///
    /// Each node answers with one `NewFilesMatchingContext` event, empty on failure.
    /// An empty `request_id` is replaced by a new UUID.
    pub fn search(&self, context: &SearchContextDescription, request_id: &str) -> Option<SearchHandle> {
        let nodes = self.nodes.node_list();
        if nodes.is_empty() {
            debug!("No storage nodes to search");
            return None;
        }
        let request_id = if request_id.trim().is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            request_id.to_string()
        };
        self.mapper.clear();

        let context_json = context.to_json();
        let mut tasks = JoinSet::new();
        for node in nodes {
            let this = self.clone();
            let context_json = context_json.clone();
            let request_id = request_id.clone();
            tasks.spawn(async move { this.search_node(&node, &context_json, &request_id).await });
        }
        Some(SearchHandle { request_id, tasks })
    }

    /// Query a single node and publish its answer. Returns the number of files found.
    pub async fn search_node(&self, node: &NodeInfo, context_json: &str, request_id: &str) -> usize {
        let files = match self.request_node(node, context_json).await {
            Ok(files) => files,
            Err(e) => {
                warn!(node_id = %node.uuid, error = %e, "Search request failed");
                Vec::new()
            }
        };
        for file in &files {
            self.mapper.add_node_id(&file.uuid, &node.uuid);
        }
        let found = files.len();
        self.events.publish(VStoreEvent::NewFilesMatchingContext {
            node_id: node.uuid.clone(),
            request_id: request_id.to_string(),
            files,
        });
        found
    }

    async fn request_node(&self, node: &NodeInfo, context_json: &str) -> VStoreResult<Vec<FileMetadata>> {
        let url = node.search_uri();
        let form = Form::new()
            .text("context", context_json.to_string())
            .text("phoneID", self.device_id.clone());
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VStoreError::request_failed(format!("{url}: {e}")))?;
        if !response.status().is_success() {
            return Err(VStoreError::wrong_status(response.status().as_u16(), url));
        }
        let reply = json_body(response).await?;
        Ok(parse_search_reply(&reply))
    }
}

/// Files of a `{error: false, reply: {files: [...]}}` answer. Entries missing a key are skipped.
fn parse_search_reply(reply: &Value) -> Vec<FileMetadata> {
    if reply.get("error").is_none() || reply_has_error(reply) {
        return Vec::new();
    }
    let Some(files) = reply
        .get("reply")
        .and_then(|r| r.get("files"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };
    files
        .iter()
        .filter(|row| REQUIRED_FILE_KEYS.iter().all(|key| row.get(key).is_some()))
        .filter_map(|row| FileMetadata::from_value(row).ok())
        .collect()
}
