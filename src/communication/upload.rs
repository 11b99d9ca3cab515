//! Background uploads to storage nodes
//!
//! Every (file, node) pair decided by matching becomes one queue entry. Each
//! entry is uploaded on its own task with a bounded number of attempts. The
//! result per node is kept in the database and the queue is rebuilt from the
//! pairs without a result, so a restart only repeats unfinished uploads.

use super::http::reply_has_error;
use super::master::MasterNode;
use crate::error::VStoreResult;
use crate::events::{EventBus, VStoreEvent};
use crate::files::VStoreFile;
use crate::nodes::NodeManager;
use crate::observability::EvaluationLogger;
use crate::storage::{Database, UploadStatus};
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use parking_lot::Mutex;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Instrument};

const CHUNK_SIZE: usize = 64 * 1024;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// One upload of one file to one node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UploadEntry {
    pub file_id: String,
    pub node_id: String,
}

impl UploadEntry {
    pub fn new<S: Into<String>>(file_id: S, node_id: S) -> Self {
        Self {
            file_id: file_id.into(),
            node_id: node_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Queued,
    Running,
}

/// Result of a single HTTP attempt
#[derive(Debug, Clone, PartialEq)]
enum Attempt {
    Accepted,
    /// The node answered and refused the file, retrying will not help
    Rejected(String),
    Retry(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Accepted,
    Rejected(String),
    Exhausted,
}

/// Cloneable handle to the upload queue
#[derive(Clone)]
pub struct Uploader {
    inner: Arc<Inner>,
}

struct Inner {
    db: Database,
    nodes: Arc<NodeManager>,
    master: MasterNode,
    evaluation: EvaluationLogger,
    events: EventBus,
    client: Client,
    device_id: String,
    max_attempts: u32,
    retry_delay: Duration,
    queue: Mutex<HashMap<UploadEntry, EntryState>>,
}

impl Uploader {
    pub fn new(
        db: Database,
        nodes: Arc<NodeManager>,
        master: MasterNode,
        events: EventBus,
        client: Client,
        device_id: String,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                nodes,
                master,
                evaluation: EvaluationLogger::disabled(),
                events,
                client,
                device_id,
                max_attempts: DEFAULT_MAX_ATTEMPTS,
                retry_delay: DEFAULT_RETRY_DELAY,
                queue: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Attempt limit and delay between attempts. Must be called before the uploader is shared.
    pub fn with_retries(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.max_attempts = max_attempts.max(1);
            inner.retry_delay = retry_delay;
        }
        self
    }

    pub fn with_evaluation(mut self, evaluation: EvaluationLogger) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.evaluation = evaluation;
        }
        self
    }

    /// Queue every pending upload found in the database. Returns the number of entries added.
    pub fn load_pending(&self) -> VStoreResult<usize> {
        let files = self.inner.db.files_to_upload()?;
        let added: usize = files.iter().map(|f| self.enqueue(f)).sum();
        if added > 0 {
            info!(entries = added, "Pending uploads restored from database");
        }
        Ok(added)
    }

    /// Queue uploads of `file` to each stored node that has not confirmed or refused it yet
    pub fn enqueue(&self, file: &VStoreFile) -> usize {
        let node_ids = match self.inner.db.unsettled_nodes(file) {
            Ok(ids) => ids,
            Err(e) => {
                warn!(file_id = %file.uuid, error = %e, "Could not read upload results, queueing all nodes");
                file.stored_node_ids.clone()
            }
        };
        let mut queue = self.inner.queue.lock();
        let mut added = 0;
        for node_id in node_ids {
            let entry = UploadEntry::new(file.uuid.clone(), node_id);
            if !queue.contains_key(&entry) {
                queue.insert(entry, EntryState::Queued);
                added += 1;
            }
        }
        added
    }

    /// Start a task for every queued entry that is not already running
    pub fn start_uploads(&self) {
        let to_start: Vec<UploadEntry> = {
            let mut queue = self.inner.queue.lock();
            queue
                .iter_mut()
                .filter(|(_, state)| **state == EntryState::Queued)
                .map(|(entry, state)| {
                    *state = EntryState::Running;
                    entry.clone()
                })
                .collect()
        };
        for entry in to_start {
            let inner = self.inner.clone();
            let span = crate::upload_span!(file_id = %entry.file_id, node_id = %entry.node_id);
            tokio::spawn(async move { inner.run(entry).await }.instrument(span));
        }
    }

    /// Number of entries queued or running
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_queued(&self, file_id: &str) -> bool {
        self.inner.queue.lock().keys().any(|e| e.file_id == file_id)
    }
}

impl Inner {
    async fn run(self: Arc<Self>, entry: UploadEntry) {
        let started = Instant::now();
        let file = match self.db.get_file(&entry.file_id) {
            Ok(Some(file)) => file,
            Ok(None) => {
                debug!("File no longer in database, dropping upload");
                self.finish(&entry);
                return;
            }
            Err(e) => {
                warn!(error = %e, "Could not read file record");
                self.finish(&entry);
                return;
            }
        };

        self.events.publish(VStoreEvent::UploadBegin {
            file_id: entry.file_id.clone(),
            node_id: entry.node_id.clone(),
        });

        match self.upload_with_retries(&entry, &file).await {
            Outcome::Accepted => self.accepted(&entry, &file, started.elapsed()).await,
            Outcome::Rejected(reason) => self.rejected(&entry, reason),
            Outcome::Exhausted => {
                warn!(attempts = self.max_attempts, "Upload failed, keeping file pending");
                self.events.publish(VStoreEvent::UploadFailed {
                    file_id: entry.file_id.clone(),
                    node_id: entry.node_id.clone(),
                });
            }
        }
        self.finish(&entry);
    }

    async fn upload_with_retries(&self, entry: &UploadEntry, file: &VStoreFile) -> Outcome {
        let Some(node) = self.nodes.get_node(&entry.node_id) else {
            return Outcome::Rejected("Unknown node".to_string());
        };
        let data = match tokio::fs::read(file.full_path()).await {
            Ok(data) => Bytes::from(data),
            Err(e) => return Outcome::Rejected(format!("Cannot read file: {e}")),
        };

        for attempt in 1..=self.max_attempts {
            let result = match self.build_form(entry, file, data.clone()) {
                Ok(form) => self.attempt(&node.upload_uri(), form).await,
                Err(e) => return Outcome::Rejected(e.to_string()),
            };
            match result {
                Attempt::Accepted => return Outcome::Accepted,
                Attempt::Rejected(reason) => return Outcome::Rejected(reason),
                Attempt::Retry(reason) => {
                    warn!(attempt, reason = %reason, "Upload attempt failed");
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        Outcome::Exhausted
    }

    fn build_form(&self, entry: &UploadEntry, file: &VStoreFile, data: Bytes) -> VStoreResult<Form> {
        let length = data.len() as u64;
        let body = Body::wrap_stream(progress_stream(data, self.events.clone(), entry.clone()));
        let part = Part::stream_with_length(body, length)
            .file_name(file.uuid.clone())
            .mime_str(&file.mime_type)?;
        let context = file
            .context
            .as_ref()
            .map(|c| c.to_json())
            .unwrap_or_else(|| "{}".to_string());

        Ok(Form::new()
            .part("filedata", part)
            .text("descriptiveName", file.descriptive_name.clone())
            .text("mimetype", file.mime_type.clone())
            .text("extension", file.extension.clone())
            .text("filesize", file.file_size.to_string())
            .text("creationdate", (file.creation_date_ms / 1000).to_string())
            .text("isPrivate", file.is_private.to_string())
            .text("phoneID", self.device_id.clone())
            .text("context", context))
    }

    async fn attempt(&self, url: &str, form: Form) -> Attempt {
        let response = match self.client.post(url).multipart(form).send().await {
            Ok(response) => response,
            Err(e) => return Attempt::Retry(e.to_string()),
        };
        if !response.status().is_success() {
            return Attempt::Retry(format!("status {}", response.status()));
        }
        match response.text().await {
            Ok(text) => classify_reply(&text),
            Err(e) => Attempt::Retry(e.to_string()),
        }
    }

    async fn accepted(&self, entry: &UploadEntry, file: &VStoreFile, elapsed: Duration) {
        info!(elapsed_ms = elapsed.as_millis() as u64, "Upload done");

        if let Err(e) = self
            .db
            .settle_upload(&entry.file_id, &entry.node_id, UploadStatus::Confirmed)
        {
            warn!(error = %e, "Upload done but updating the database failed");
        }

        if let Err(e) = self
            .master
            .post_file_node_mapping(&entry.file_id, &entry.node_id)
            .await
        {
            warn!(error = %e, "Could not publish file node mapping");
        }
        self.evaluation
            .upload_done(&entry.file_id, elapsed, file.file_size)
            .await;

        self.events.publish(VStoreEvent::SingleUploadDone {
            file_id: entry.file_id.clone(),
            node_id: entry.node_id.clone(),
        });
    }

    fn rejected(&self, entry: &UploadEntry, reason: String) {
        warn!(reason = %reason, "Upload failed permanently");
        if let Err(e) = self
            .db
            .settle_upload(&entry.file_id, &entry.node_id, UploadStatus::Rejected)
        {
            warn!(error = %e, "Updating the failed upload in the database failed");
        }
        self.events.publish(VStoreEvent::UploadFailedPermanently {
            file_id: entry.file_id.clone(),
            node_id: entry.node_id.clone(),
            reason: format!("Node replied: {reason}"),
        });
    }

    fn finish(&self, entry: &UploadEntry) {
        let empty = {
            let mut queue = self.queue.lock();
            queue.remove(entry);
            queue.is_empty()
        };
        if empty {
            info!("All uploads done");
            self.events.publish(VStoreEvent::AllUploadsDone);
        }
    }
}

/// `{"error": 0, ...}` accepts the upload. Any other answer is final.
fn classify_reply(text: &str) -> Attempt {
    match serde_json::from_str::<Value>(text) {
        Ok(reply) if reply.get("error").is_some() && !reply_has_error(&reply) => Attempt::Accepted,
        Ok(reply) => Attempt::Rejected(
            reply
                .get("error_msg")
                .and_then(Value::as_str)
                .unwrap_or("(Invalid response)")
                .to_string(),
        ),
        Err(_) => Attempt::Rejected("(Invalid response)".to_string()),
    }
}

/// Chunks of `data`, publishing `UploadState` whenever the percentage changes
fn progress_stream(
    data: Bytes,
    events: EventBus,
    entry: UploadEntry,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let total = data.len().max(1);
    let chunks: Vec<Bytes> = (0..data.len())
        .step_by(CHUNK_SIZE)
        .map(|start| data.slice(start..(start + CHUNK_SIZE).min(data.len())))
        .collect();
    let mut sent = 0usize;
    let mut last = 0u8;
    stream::iter(chunks).map(move |chunk| {
        sent += chunk.len();
        let progress = (sent * 100 / total).min(100) as u8;
        if progress != last {
            last = progress;
            events.publish(VStoreEvent::UploadState {
                file_id: entry.file_id.clone(),
                node_id: entry.node_id.clone(),
                progress,
            });
        }
        Ok(chunk)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::FileNodeMapper;
    use std::path::Path;
    use url::Url;

    fn uploader(db: Database) -> Uploader {
        let nodes = Arc::new(NodeManager::new(db.clone(), Client::new()).unwrap());
        let master = MasterNode::new(
            Url::parse("http://127.0.0.1:1").unwrap(),
            "device".into(),
            Client::new(),
            Arc::new(FileNodeMapper::new()),
        );
        Uploader::new(db, nodes, master, EventBus::new(), Client::new(), "device".into())
    }

    // ========== Replies ==========

    #[test]
    fn test_classify_reply() {
        assert_eq!(classify_reply(r#"{"error": 0, "reply": {}}"#), Attempt::Accepted);
        assert_eq!(
            classify_reply(r#"{"error": 1, "error_msg": "disk full"}"#),
            Attempt::Rejected("disk full".into())
        );
        assert_eq!(classify_reply("<html>"), Attempt::Rejected("(Invalid response)".into()));
        assert_eq!(classify_reply("{}"), Attempt::Rejected("(Invalid response)".into()));
    }

    // ========== Progress ==========

    #[tokio::test]
    async fn test_progress_stream_reports_each_percent_once() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let data = Bytes::from(vec![7u8; CHUNK_SIZE * 4]);
        let chunks: Vec<_> = progress_stream(data, events, UploadEntry::new("f", "n"))
            .collect()
            .await;
        assert_eq!(chunks.len(), 4);

        let mut seen = Vec::new();
        while let Ok(VStoreEvent::UploadState { progress, .. }) = rx.try_recv() {
            seen.push(progress);
        }
        assert_eq!(seen, vec![25, 50, 75, 100]);
    }

    // ========== Queue ==========

    #[tokio::test]
    async fn test_queue_rebuilt_from_database() {
        let db = Database::temporary().unwrap();
        let mut pending = VStoreFile::new("f1", Path::new("/tmp"), "a", "image/png", "png", 1, false);
        pending.add_node_id("n1");
        pending.add_node_id("n2");
        let mut done = VStoreFile::new("f2", Path::new("/tmp"), "b", "image/png", "png", 1, false);
        done.upload_pending = false;
        done.add_node_id("n1");
        db.insert_file(&pending).unwrap();
        db.insert_file(&done).unwrap();

        let up = uploader(db);
        assert_eq!(up.load_pending().unwrap(), 2);
        // loading twice does not duplicate entries
        assert_eq!(up.load_pending().unwrap(), 0);
        assert_eq!(up.pending(), 2);
        assert!(up.is_queued("f1"));
        assert!(!up.is_queued("f2"));
    }

    #[tokio::test]
    async fn test_restart_skips_nodes_that_already_answered() {
        let db = Database::temporary().unwrap();
        let mut file = VStoreFile::new("f1", Path::new("/tmp"), "a", "image/png", "png", 1, false);
        file.add_node_id("n1");
        file.add_node_id("n2");
        file.add_node_id("n3");
        db.insert_file(&file).unwrap();
        db.settle_upload("f1", "n1", UploadStatus::Confirmed).unwrap();
        db.settle_upload("f1", "n3", UploadStatus::Rejected).unwrap();

        let up = uploader(db.clone());
        assert_eq!(up.load_pending().unwrap(), 1);
        assert!(up.inner.queue.lock().contains_key(&UploadEntry::new("f1", "n2")));
        assert!(db.get_file("f1").unwrap().unwrap().upload_pending);
    }

    #[tokio::test]
    async fn test_unknown_node_fails_permanently() {
        let db = Database::temporary().unwrap();
        let mut file = VStoreFile::new("f1", Path::new("/tmp"), "a", "image/png", "png", 1, false);
        file.add_node_id("ghost");
        db.insert_file(&file).unwrap();

        let up = uploader(db.clone());
        let mut rx = up.inner.events.subscribe();
        up.enqueue(&file);
        up.start_uploads();

        let mut failed = false;
        loop {
            match rx.recv().await.unwrap() {
                VStoreEvent::UploadFailedPermanently { reason, .. } => {
                    assert!(reason.contains("Unknown node"));
                    failed = true;
                }
                VStoreEvent::AllUploadsDone => break,
                _ => {}
            }
        }
        assert!(failed);
        let stored = db.get_file("f1").unwrap().unwrap();
        assert!(stored.upload_failed);
        assert!(!stored.upload_pending);
        assert_eq!(up.pending(), 0);
    }
}
