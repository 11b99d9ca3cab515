//! Framework events
//!
//! Long running work (configuration download, uploads, searches, downloads,
//! deletions) reports back through a broadcast channel. Every subscriber
//! receives every event published after it subscribed.

use crate::error::ErrorCode;
use crate::files::{FileMetadata, VStoreFile};
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 512;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum VStoreEvent {
    ContextProvided,
    ConfigDownloadSucceeded,
    ConfigDownloadFailed {
        code: ErrorCode,
    },
    FilesReady {
        files: Vec<VStoreFile>,
    },
    NewFilesMatchingContext {
        node_id: String,
        request_id: String,
        files: Vec<FileMetadata>,
    },
    UploadBegin {
        file_id: String,
        node_id: String,
    },
    UploadState {
        file_id: String,
        node_id: String,
        progress: u8,
    },
    SingleUploadDone {
        file_id: String,
        node_id: String,
    },
    UploadFailed {
        file_id: String,
        node_id: String,
    },
    UploadFailedPermanently {
        file_id: String,
        node_id: String,
        reason: String,
    },
    AllUploadsDone,
    DownloadStart {
        file_id: String,
        request_id: String,
    },
    DownloadProgress {
        file_id: String,
        request_id: String,
        progress: u8,
    },
    DownloadedFileReady {
        file_id: String,
        request_id: String,
        path: PathBuf,
        metadata: Option<FileMetadata>,
    },
    DownloadFailed {
        file_id: String,
        request_id: String,
        reason: String,
    },
    NewThumbnail {
        file_id: String,
        path: PathBuf,
    },
    ThumbnailDownloadFailed {
        file_id: String,
    },
    Metadata {
        file_id: String,
        metadata: FileMetadata,
    },
    MetadataDownloadFailed {
        file_id: String,
    },
    FileDeleted {
        file_id: String,
    },
}

impl VStoreEvent {
    /// Short name used in log lines
    pub fn name(&self) -> &'static str {
        match self {
            VStoreEvent::ContextProvided => "context_provided",
            VStoreEvent::ConfigDownloadSucceeded => "config_download_succeeded",
            VStoreEvent::ConfigDownloadFailed { .. } => "config_download_failed",
            VStoreEvent::FilesReady { .. } => "files_ready",
            VStoreEvent::NewFilesMatchingContext { .. } => "new_files_matching_context",
            VStoreEvent::UploadBegin { .. } => "upload_begin",
            VStoreEvent::UploadState { .. } => "upload_state",
            VStoreEvent::SingleUploadDone { .. } => "single_upload_done",
            VStoreEvent::UploadFailed { .. } => "upload_failed",
            VStoreEvent::UploadFailedPermanently { .. } => "upload_failed_permanently",
            VStoreEvent::AllUploadsDone => "all_uploads_done",
            VStoreEvent::DownloadStart { .. } => "download_start",
            VStoreEvent::DownloadProgress { .. } => "download_progress",
            VStoreEvent::DownloadedFileReady { .. } => "downloaded_file_ready",
            VStoreEvent::DownloadFailed { .. } => "download_failed",
            VStoreEvent::NewThumbnail { .. } => "new_thumbnail",
            VStoreEvent::ThumbnailDownloadFailed { .. } => "thumbnail_download_failed",
            VStoreEvent::Metadata { .. } => "metadata",
            VStoreEvent::MetadataDownloadFailed { .. } => "metadata_download_failed",
            VStoreEvent::FileDeleted { .. } => "file_deleted",
        }
    }
}

/// Cloneable handle to the framework's event channel
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<VStoreEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: VStoreEvent) {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => tracing::trace!(event = name, receivers, "Event published"),
            Err(_) => tracing::trace!(event = name, "Event dropped, no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VStoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(VStoreEvent::AllUploadsDone);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_all_subscribers_receive_events() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.clone().subscribe();

        bus.publish(VStoreEvent::FileDeleted {
            file_id: "f1".to_string(),
        });

        for rx in [&mut a, &mut b] {
            match rx.recv().await.unwrap() {
                VStoreEvent::FileDeleted { file_id } => assert_eq!(file_id, "f1"),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let v = serde_json::to_value(VStoreEvent::UploadState {
            file_id: "f".into(),
            node_id: "n".into(),
            progress: 40,
        })
        .unwrap();
        assert_eq!(v["event"], "upload_state");
        assert_eq!(v["progress"], 40);
        assert_eq!(
            VStoreEvent::ConfigDownloadFailed {
                code: ErrorCode::ConfigParseError
            }
            .name(),
            "config_download_failed"
        );
    }
}
