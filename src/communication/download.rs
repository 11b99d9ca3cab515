//! File, metadata and thumbnail downloads from storage nodes

use super::http::{json_body, reply_has_error};
use super::master::MasterNode;
use crate::error::{VStoreError, VStoreResult};
use crate::events::{EventBus, VStoreEvent};
use crate::files::{FileManager, FileMetadata};
use crate::nodes::{NodeDistanceMetric, NodeInfo, NodeManager};
use crate::observability::EvaluationLogger;
use crate::storage::{Database, CURRENTLY_DOWNLOADING};
use futures::StreamExt;
use reqwest::Client;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn, Instrument};

const DEFAULT_REQUEST_ID: &str = "FileDownload";

/// Where to download a file from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadMode {
    FromSpecifiedNode(String),
    /// Every node known to hold the file, ordered by the distance metric
    BasedOnMetric,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    Ready {
        path: PathBuf,
        metadata: FileMetadata,
    },
    /// Another download of the same file is in flight
    AlreadyDownloading,
}

/// Entry in the persistent list of running downloads, removed on drop so that
/// a cancelled or failed download does not block the file.
struct DownloadMarker {
    db: Database,
    file_id: String,
}

impl DownloadMarker {
    /// `None` when a download of the file is already running
    fn acquire(db: &Database, file_id: &str) -> VStoreResult<Option<Self>> {
        if !db.list_add(CURRENTLY_DOWNLOADING, file_id)? {
            return Ok(None);
        }
        Ok(Some(Self {
            db: db.clone(),
            file_id: file_id.to_string(),
        }))
    }
}

impl Drop for DownloadMarker {
    fn drop(&mut self) {
        if let Err(e) = self.db.list_remove(CURRENTLY_DOWNLOADING, &self.file_id) {
            warn!(file_id = %self.file_id, error = %e, "Could not clear download marker");
        }
    }
}

#[derive(Clone)]
pub struct Downloader {
    db: Database,
    nodes: Arc<NodeManager>,
    master: MasterNode,
    events: EventBus,
    evaluation: EvaluationLogger,
    node_client: Client,
    transfer_client: Client,
    device_id: String,
    download_dir: PathBuf,
    thumbnails_dir: PathBuf,
}

impl Downloader {
    pub fn new(
        db: Database,
        nodes: Arc<NodeManager>,
        master: MasterNode,
        events: EventBus,
        clients: &super::http::HttpClients,
        device_id: String,
        files: &FileManager,
    ) -> Self {
        Self {
            db,
            nodes,
            master,
            events,
            evaluation: EvaluationLogger::disabled(),
            node_client: clients.node.clone(),
            transfer_client: clients.transfer.clone(),
            device_id,
            download_dir: files.downloaded_files_dir(),
            thumbnails_dir: files.thumbnails_dir(),
        }
    }

    pub fn with_evaluation(mut self, evaluation: EvaluationLogger) -> Self {
        self.evaluation = evaluation;
        self
    }

    /// Download a file into `dir` (the download directory when absent or missing).
    ///
    /// Progress and the result are also published as events tagged with `request_id`.
    pub async fn download_file(
        &self,
        file_id: &str,
        mode: DownloadMode,
        request_id: &str,
        dir: Option<&Path>,
    ) -> VStoreResult<DownloadOutcome> {
        if file_id.trim().is_empty() {
            return Err(VStoreError::missing_parameters());
        }
        let request_id = if request_id.trim().is_empty() {
            DEFAULT_REQUEST_ID
        } else {
            request_id
        };
        let target_dir = match dir {
            Some(dir) if dir.is_dir() => dir.to_path_buf(),
            _ => self.download_dir.clone(),
        };

        let Some(marker) = DownloadMarker::acquire(&self.db, file_id)? else {
            debug!(file_id, "Download already running");
            return Ok(DownloadOutcome::AlreadyDownloading);
        };

        let span = crate::download_span!(file_id = %file_id, request_id = %request_id);
        let result = self
            .download_from_candidates(file_id, &mode, request_id, &target_dir)
            .instrument(span)
            .await;
        drop(marker);

        match result {
            Ok((path, metadata)) => {
                self.events.publish(VStoreEvent::DownloadedFileReady {
                    file_id: file_id.to_string(),
                    request_id: request_id.to_string(),
                    path: path.clone(),
                    metadata: Some(metadata.clone()),
                });
                Ok(DownloadOutcome::Ready { path, metadata })
            }
            Err(e) => {
                self.events.publish(VStoreEvent::DownloadFailed {
                    file_id: file_id.to_string(),
                    request_id: request_id.to_string(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn download_from_candidates(
        &self,
        file_id: &str,
        mode: &DownloadMode,
        request_id: &str,
        target_dir: &Path,
    ) -> VStoreResult<(PathBuf, FileMetadata)> {
        let candidates = match mode {
            DownloadMode::FromSpecifiedNode(node_id) => vec![self
                .nodes
                .get_node(node_id)
                .ok_or_else(|| VStoreError::invalid_input(format!("unknown node {node_id}")))?],
            DownloadMode::BasedOnMetric => self.candidates_by_metric(file_id).await,
        };
        if candidates.is_empty() {
            return Err(VStoreError::file_not_found(format!("no node found for {file_id}")));
        }

        let mut last_error = None;
        for node in candidates {
            match self.download_from_node(file_id, &node, request_id, target_dir).await {
                Ok(done) => return Ok(done),
                Err(e) => {
                    warn!(node_id = %node.uuid, error = %e, "Download from node failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| VStoreError::request_failed("download failed")))
    }

    /// Nodes holding the file, from the local mapping, the master, or every known node
    async fn candidates_by_metric(&self, file_id: &str) -> Vec<NodeInfo> {
        let node_ids = self.master.node_ids_for_file(file_id).await;
        let nodes: Vec<NodeInfo> = if node_ids.is_empty() {
            self.query_all_nodes_for_file()
        } else {
            node_ids
                .iter()
                .filter_map(|id| {
                    let node = self.nodes.get_node(id);
                    if node.is_none() {
                        warn!(node_id = %id, "Mapped node is not known locally");
                    }
                    node
                })
                .collect()
        };
        NodeDistanceMetric::sort_nodes_by_metric(nodes)
    }

    /// Every known node, used when nobody knows where a file is
    pub fn query_all_nodes_for_file(&self) -> Vec<NodeInfo> {
        self.nodes.node_list()
    }

    async fn download_from_node(
        &self,
        file_id: &str,
        node: &NodeInfo,
        request_id: &str,
        target_dir: &Path,
    ) -> VStoreResult<(PathBuf, FileMetadata)> {
        let metadata = self.fetch_metadata(file_id, node).await?;
        let metadata_json = serde_json::to_string(&metadata)?;
        self.evaluation
            .download_start(file_id, metadata.file_size, &metadata_json, node);
        self.events.publish(VStoreEvent::DownloadStart {
            file_id: file_id.to_string(),
            request_id: request_id.to_string(),
        });

        let target = target_dir.join(format!("{file_id}.{}", metadata.extension));
        match self
            .fetch_file(file_id, node, request_id, &target, metadata.file_size)
            .await
        {
            Ok(()) => {
                self.evaluation.download_done(file_id, false).await;
                info!(node_id = %node.uuid, path = %target.display(), "Download finished");
                Ok((target, metadata))
            }
            Err(e) => {
                self.evaluation.download_done(file_id, true).await;
                // a partial file is useless
                match tokio::fs::remove_file(&target).await {
                    Ok(()) => {}
                    Err(io) if io.kind() == std::io::ErrorKind::NotFound => {}
                    Err(io) => warn!(path = %target.display(), error = %io, "Could not remove partial download"),
                }
                Err(e)
            }
        }
    }

    async fn fetch_file(
        &self,
        file_id: &str,
        node: &NodeInfo,
        request_id: &str,
        target: &Path,
        expected_size: u64,
    ) -> VStoreResult<()> {
        let url = node.download_uri(file_id, &self.device_id);
        let response = self
            .transfer_client
            .get(&url)
            .send()
            .await
            .map_err(|e| VStoreError::request_failed(format!("{url}: {e}")))?;
        if !response.status().is_success() {
            return Err(VStoreError::wrong_status(response.status().as_u16(), url));
        }

        let mut output = tokio::fs::File::create(target).await?;
        let mut stream = response.bytes_stream();
        let mut received: u64 = 0;
        let mut last_progress = 0u8;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            output.write_all(&chunk).await?;
            received += chunk.len() as u64;
            if let Some(progress) = progress_step(received, expected_size, last_progress) {
                last_progress = progress;
                self.events.publish(VStoreEvent::DownloadProgress {
                    file_id: file_id.to_string(),
                    request_id: request_id.to_string(),
                    progress,
                });
            }
        }
        output.flush().await?;
        Ok(())
    }

    async fn fetch_metadata(&self, file_id: &str, node: &NodeInfo) -> VStoreResult<FileMetadata> {
        let url = node.metadata_uri(file_id, &self.device_id, true);
        let response = self
            .node_client
            .get(&url)
            .send()
            .await
            .map_err(|e| VStoreError::request_failed(format!("{url}: {e}")))?;
        if !response.status().is_success() {
            return Err(VStoreError::wrong_status(response.status().as_u16(), url));
        }
        let reply = json_body(response).await?;
        parse_metadata_reply(&reply)
    }

    /// Fetch a file's metadata from the first node that answers.
    /// Publishes `Metadata` or `MetadataDownloadFailed`.
    pub async fn request_metadata(&self, file_id: &str) -> Option<FileMetadata> {
        for node_id in self.master.node_ids_for_file(file_id).await {
            let Some(node) = self.nodes.get_node(&node_id) else {
                warn!(node_id = %node_id, "Mapped node is not known locally");
                continue;
            };
            match self.fetch_metadata(file_id, &node).await {
                Ok(metadata) => {
                    self.events.publish(VStoreEvent::Metadata {
                        file_id: file_id.to_string(),
                        metadata: metadata.clone(),
                    });
                    return Some(metadata);
                }
                Err(e) => debug!(node_id = %node_id, error = %e, "Metadata request failed"),
            }
        }
        self.events.publish(VStoreEvent::MetadataDownloadFailed {
            file_id: file_id.to_string(),
        });
        None
    }

    /// Download the thumbnail of a file from the first known node it is mapped to.
    /// Publishes `NewThumbnail` or `ThumbnailDownloadFailed`.
    pub async fn download_thumbnail(&self, file_id: &str) -> VStoreResult<PathBuf> {
        match self.fetch_thumbnail(file_id).await {
            Ok(path) => {
                self.events.publish(VStoreEvent::NewThumbnail {
                    file_id: file_id.to_string(),
                    path: path.clone(),
                });
                Ok(path)
            }
            Err(e) => {
                warn!(file_id, error = %e, "Thumbnail download failed");
                self.events.publish(VStoreEvent::ThumbnailDownloadFailed {
                    file_id: file_id.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn fetch_thumbnail(&self, file_id: &str) -> VStoreResult<PathBuf> {
        let node = self
            .master
            .node_ids_for_file(file_id)
            .await
            .iter()
            .find_map(|id| self.nodes.get_node(id))
            .ok_or_else(|| VStoreError::file_not_found(format!("no node known for {file_id}")))?;
        let url = node.thumbnail_uri(file_id, &self.device_id);
        let response = self
            .node_client
            .get(&url)
            .send()
            .await
            .map_err(|e| VStoreError::request_failed(format!("{url}: {e}")))?;
        if !response.status().is_success() {
            return Err(VStoreError::wrong_status(response.status().as_u16(), url));
        }
        let bytes = response.bytes().await?;
        tokio::fs::create_dir_all(&self.thumbnails_dir).await?;
        let path = self.thumbnails_dir.join(format!("{file_id}.png"));
        tokio::fs::write(&path, &bytes).await?;
        Ok(path)
    }
}

/// `{"error": 0, "reply": {"metadata": {...}}}`
fn parse_metadata_reply(reply: &Value) -> VStoreResult<FileMetadata> {
    if reply.get("error").is_none() || reply_has_error(reply) {
        return Err(VStoreError::request_failed(format!(
            "node refused metadata: {reply}"
        )));
    }
    let metadata = reply
        .get("reply")
        .and_then(|r| r.get("metadata"))
        .ok_or_else(|| VStoreError::parse("metadata reply without metadata"))?;
    FileMetadata::from_value(metadata)
}

/// New percentage to report, if it advanced past `last`
fn progress_step(received: u64, total: u64, last: u8) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let progress = (received.saturating_mul(100) / total).min(100) as u8;
    (progress > last).then_some(progress)
}
