//! Evaluation logging
//!
//! Collects one record per stored file (matching decision and upload timing)
//! and one per download, and ships them to an evaluation endpoint. Records
//! that cannot be delivered stay in a backlog and are retried on the next
//! submission.

use crate::communication::http::{json_body, reply_has_error};
use crate::context::util::now_ms;
use crate::error::{VStoreError, VStoreResult};
use crate::files::VStoreFile;
use crate::matching::MatchingMode;
use crate::nodes::{NodeInfo, NodeType};
use crate::rules::VStoreRule;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::multipart::Form;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const ROUTE_STORE_LOG: &str = "/store";
const ROUTE_DOWNLOAD_LOG: &str = "/download";
const SINK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationKind {
    Store,
    Download,
}

/// A finished record waiting for delivery
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRecord {
    pub file_id: String,
    pub kind: EvaluationKind,
    pub value: Value,
}

impl EvaluationRecord {
    /// `{"type": "STORE", "value": "<record json>"}`
    pub fn envelope(&self) -> Value {
        json!({
            "type": self.kind,
            "value": self.value.to_string(),
        })
    }
}

/// Destination of evaluation records
#[async_trait]
pub trait EvaluationSink: Send + Sync {
    /// Deliver one record. An error keeps it in the backlog.
    async fn submit(&self, record: &EvaluationRecord) -> VStoreResult<()>;
}

/// Posts records as a multipart `log` field to `<url>/store` or `<url>/download`
pub struct HttpEvaluationSink {
    base_url: String,
    client: Client,
}

impl HttpEvaluationSink {
    pub fn new<S: Into<String>>(base_url: S) -> VStoreResult<Self> {
        let client = Client::builder()
            .connect_timeout(SINK_TIMEOUT)
            .timeout(SINK_TIMEOUT * 3)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url_for(&self, kind: EvaluationKind) -> String {
        let route = match kind {
            EvaluationKind::Store => ROUTE_STORE_LOG,
            EvaluationKind::Download => ROUTE_DOWNLOAD_LOG,
        };
        format!("{}{route}", self.base_url)
    }
}

#[async_trait]
impl EvaluationSink for HttpEvaluationSink {
    async fn submit(&self, record: &EvaluationRecord) -> VStoreResult<()> {
        let url = self.url_for(record.kind);
        let form = Form::new().text("log", record.value.to_string());
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VStoreError::request_failed(format!("{url}: {e}")))?;
        let reply = json_body(response).await?;
        if reply.get("error").is_some() && !reply_has_error(&reply) && reply.get("reply").is_some() {
            Ok(())
        } else {
            Err(VStoreError::request_failed(format!("{url} rejected the log entry")))
        }
    }
}

struct PendingDownload {
    record: Map<String, Value>,
    started_ms: i64,
    file_size: u64,
}

#[derive(Default)]
struct LoggerState {
    stores: HashMap<String, Map<String, Value>>,
    downloads: HashMap<String, PendingDownload>,
    backlog: Vec<EvaluationRecord>,
}

/// Builds evaluation records from framework activity. Disabled loggers ignore every call.
#[derive(Clone)]
pub struct EvaluationLogger {
    device_id: String,
    sink: Option<Arc<dyn EvaluationSink>>,
    state: Arc<Mutex<LoggerState>>,
}

impl std::fmt::Debug for EvaluationLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationLogger")
            .field("device_id", &self.device_id)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl EvaluationLogger {
    pub fn new<S: Into<String>>(device_id: S, sink: Arc<dyn EvaluationSink>) -> Self {
        Self {
            device_id: device_id.into(),
            sink: Some(sink),
            state: Arc::new(Mutex::new(LoggerState::default())),
        }
    }

    pub fn disabled() -> Self {
        Self {
            device_id: String::new(),
            sink: None,
            state: Arc::new(Mutex::new(LoggerState::default())),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    // ---- store records ----

    /// Open the store record of a file before matching
    pub fn start_for_file(&self, file: &VStoreFile, mode: MatchingMode) {
        if !self.is_enabled() {
            return;
        }
        let context = file
            .context
            .as_ref()
            .map(|c| c.to_json())
            .unwrap_or_else(|| "{}".to_string());
        let record = json!({
            "fileId": file.uuid,
            "deviceId": self.device_id,
            "descriptiveName": file.descriptive_name,
            "filetype": file.mime_type,
            "extension": file.extension,
            "dateCreation": file.creation_date_ms / 1000,
            "fileMD5": file.hash,
            "fileContext": context,
            "isPrivate": file.is_private,
            "fileSize": file.file_size,
            "uploadStartTime": now_ms(),
            "matchingMode": mode.as_str(),
        });
        if let Value::Object(map) = record {
            self.state.lock().stores.insert(file.uuid.clone(), map);
        }
    }

    /// Forget an open store record
    pub fn abort_for_file(&self, file_id: &str) {
        self.state.lock().stores.remove(file_id);
    }

    pub fn add_rule(&self, file_id: &str, rule: &VStoreRule, decision_layer_index: usize) {
        self.update_store(file_id, |record| {
            record.insert("rule".into(), Value::String(rule.to_json()));
            record.insert("decisionLayerIndex".into(), json!(decision_layer_index));
        });
    }

    /// Record the decided node. Without a node the file stays on the device and
    /// the record is completed right away.
    pub async fn add_decided_node(&self, file_id: &str, node: Option<&NodeInfo>, matching_time_ms: u64) {
        self.update_store(file_id, |record| {
            let (node_id, node_type) = match node {
                Some(n) => (n.uuid.clone(), n.node_type),
                None => (String::new(), NodeType::Phone),
            };
            record.insert("nodeId".into(), Value::String(node_id));
            record.insert("nodeType".into(), Value::String(node_type.as_str().to_string()));
            record.insert("matchingTime".into(), json!(matching_time_ms));
        });
        if node.is_none() {
            self.matching_done(file_id).await;
        }
    }

    /// Complete a store record for a file that is not uploaded anywhere
    pub async fn matching_done(&self, file_id: &str) {
        self.finish_store(file_id, 0, 0.0).await;
    }

    /// Complete a store record after the first successful upload
    pub async fn upload_done(&self, file_id: &str, duration: Duration, bytes: u64) {
        let millis = duration.as_millis().max(1) as u64;
        let speed = bytes as f64 / millis as f64;
        self.finish_store(file_id, millis, speed).await;
    }

    async fn finish_store(&self, file_id: &str, duration_ms: u64, speed: f64) {
        let record = {
            let mut state = self.state.lock();
            match state.stores.remove(file_id) {
                Some(mut record) => {
                    record.insert("uploadDuration".into(), json!(duration_ms));
                    record.insert("uploadSpeed".into(), json!(speed));
                    record.insert("uploadEndTime".into(), json!(now_ms()));
                    Some(record)
                }
                None => None,
            }
        };
        if let Some(record) = record {
            self.submit(EvaluationRecord {
                file_id: file_id.to_string(),
                kind: EvaluationKind::Store,
                value: Value::Object(record),
            })
            .await;
        }
    }

    fn update_store<F: FnOnce(&mut Map<String, Value>)>(&self, file_id: &str, update: F) {
        if let Some(record) = self.state.lock().stores.get_mut(file_id) {
            update(record);
        }
    }

    // ---- download records ----

    pub fn download_start(&self, file_id: &str, file_size: u64, metadata: &str, node: &NodeInfo) {
        if !self.is_enabled() {
            return;
        }
        let started_ms = now_ms();
        let record = json!({
            "fileId": file_id,
            "fileSize": file_size,
            "metadata": metadata,
            "nodeId": node.uuid,
            "nodeType": node.node_type.as_str(),
            "starttime": started_ms,
        });
        if let Value::Object(record) = record {
            self.state.lock().downloads.insert(
                file_id.to_string(),
                PendingDownload {
                    record,
                    started_ms,
                    file_size,
                },
            );
        }
    }

    pub async fn download_done(&self, file_id: &str, failed: bool) {
        let Some(pending) = self.state.lock().downloads.remove(file_id) else {
            return;
        };
        let PendingDownload {
            mut record,
            started_ms,
            file_size,
        } = pending;
        let end_ms = now_ms();
        let (duration_ms, speed) = if failed {
            (0, 0.0)
        } else {
            let duration_ms = (end_ms - started_ms).max(0);
            (duration_ms, download_speed_kbit(file_size, duration_ms))
        };
        record.insert("endtime".into(), json!(end_ms));
        record.insert("downloadSpeed".into(), json!(speed));
        record.insert("durationMillis".into(), json!(duration_ms));
        record.insert("deviceId".into(), Value::String(self.device_id.clone()));
        self.submit(EvaluationRecord {
            file_id: file_id.to_string(),
            kind: EvaluationKind::Download,
            value: Value::Object(record),
        })
        .await;
    }

    // ---- delivery ----

    async fn submit(&self, record: EvaluationRecord) {
        self.state.lock().backlog.push(record);
        self.flush().await;
    }

    /// Try to deliver the backlog. Returns the number of records still pending.
    pub async fn flush(&self) -> usize {
        let Some(sink) = self.sink.as_ref() else {
            return 0;
        };
        let records = std::mem::take(&mut self.state.lock().backlog);
        let mut failed = Vec::new();
        for record in records {
            match sink.submit(&record).await {
                Ok(()) => debug!(file_id = %record.file_id, kind = ?record.kind, "Evaluation record delivered"),
                Err(e) => {
                    warn!(file_id = %record.file_id, error = %e, "Evaluation record kept for retry");
                    failed.push(record);
                }
            }
        }
        let mut state = self.state.lock();
        failed.append(&mut state.backlog);
        state.backlog = failed;
        state.backlog.len()
    }

    pub fn backlog_len(&self) -> usize {
        self.state.lock().backlog.len()
    }

    pub fn has_open_record(&self, file_id: &str) -> bool {
        self.state.lock().stores.contains_key(file_id)
    }
}

/// kbit/s for `bytes` transferred in `duration_ms`
fn download_speed_kbit(bytes: u64, duration_ms: i64) -> f64 {
    if bytes == 0 || duration_ms <= 0 {
        return 0.0;
    }
    bytes as f64 / 1024.0 * 8.0 / (duration_ms as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockEvaluationSink;
    use std::path::Path;

    fn file() -> VStoreFile {
        let mut f = VStoreFile::new("f1", Path::new("/tmp"), "pic", "image/png", "png", 2048, false);
        f.hash = "abc".into();
        f
    }

    // ========== Store records ==========

    #[tokio::test]
    async fn test_store_record_after_upload() {
        let sink = Arc::new(MockEvaluationSink::new());
        let logger = EvaluationLogger::new("dev", sink.clone());
        let node = NodeInfo::new("n1", "host", 1, NodeType::Cloudlet, None, 0, 0);

        logger.start_for_file(&file(), MatchingMode::RulesNextOnNoMatch);
        logger.add_rule("f1", &VStoreRule::new("r"), 0);
        logger.add_decided_node("f1", Some(&node), 3).await;
        assert!(sink.records.lock().is_empty());

        logger.upload_done("f1", Duration::from_millis(100), 2048).await;
        let records = sink.records.lock().clone();
        assert_eq!(records.len(), 1);
        let v = &records[0].value;
        assert_eq!(records[0].kind, EvaluationKind::Store);
        assert_eq!(v["fileId"], "f1");
        assert_eq!(v["deviceId"], "dev");
        assert_eq!(v["fileMD5"], "abc");
        assert_eq!(v["nodeId"], "n1");
        assert_eq!(v["nodeType"], "CLOUDLET");
        assert_eq!(v["matchingMode"], "RULES_NEXT_ON_NO_MATCH");
        assert_eq!(v["uploadDuration"], 100);
        assert!(v["rule"].is_string());
        assert!(!logger.has_open_record("f1"));

        // a second upload of the same file adds nothing
        logger.upload_done("f1", Duration::from_millis(100), 2048).await;
        assert_eq!(sink.records.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_local_only_file_completes_immediately() {
        let sink = Arc::new(MockEvaluationSink::new());
        let logger = EvaluationLogger::new("dev", sink.clone());
        logger.start_for_file(&file(), MatchingMode::Random);
        logger.add_decided_node("f1", None, 1).await;

        let records = sink.records.lock().clone();
        assert_eq!(records[0].value["nodeType"], "PHONE");
        assert_eq!(records[0].value["uploadSpeed"], 0.0);
        assert_eq!(records[0].envelope()["type"], "STORE");
    }

    #[tokio::test]
    async fn test_abort_and_disabled() {
        let sink = Arc::new(MockEvaluationSink::new());
        let logger = EvaluationLogger::new("dev", sink.clone());
        logger.start_for_file(&file(), MatchingMode::Random);
        logger.abort_for_file("f1");
        logger.matching_done("f1").await;
        assert!(sink.records.lock().is_empty());

        let disabled = EvaluationLogger::disabled();
        disabled.start_for_file(&file(), MatchingMode::Random);
        assert!(!disabled.has_open_record("f1"));
        assert_eq!(disabled.flush().await, 0);
    }

    // ========== Downloads and retries ==========

    #[tokio::test]
    async fn test_failed_download_and_backlog_retry() {
        let sink = Arc::new(MockEvaluationSink::new());
        sink.set_failing(true);
        let logger = EvaluationLogger::new("dev", sink.clone());
        let node = NodeInfo::new("n1", "host", 1, NodeType::Cloud, None, 0, 0);

        logger.download_start("f9", 4096, "{}", &node);
        logger.download_done("f9", true).await;
        assert_eq!(logger.backlog_len(), 1);

        sink.set_failing(false);
        assert_eq!(logger.flush().await, 0);
        let records = sink.records.lock().clone();
        assert_eq!(records[0].kind, EvaluationKind::Download);
        assert_eq!(records[0].value["durationMillis"], 0);
        assert_eq!(records[0].value["downloadSpeed"], 0.0);
        assert_eq!(records[0].value["nodeType"], "CLOUD");
    }

    #[test]
    fn test_download_speed() {
        // 1 MiB in 1 s is 8192 kbit/s
        assert_eq!(download_speed_kbit(1024 * 1024, 1000), 8192.0);
        assert_eq!(download_speed_kbit(0, 1000), 0.0);
        assert_eq!(download_speed_kbit(10, 0), 0.0);
    }
}
