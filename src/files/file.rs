//! Stored file records and node metadata replies

use crate::context::ContextDescription;
use crate::error::{VStoreError, VStoreResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// A file stored through this device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VStoreFile {
    pub uuid: String,
    /// SHA-256 of the framework copy, hex encoded
    pub hash: String,
    pub descriptive_name: String,
    pub mime_type: String,
    pub extension: String,
    pub creation_date_ms: i64,
    pub file_size: u64,
    pub is_private: bool,
    pub upload_pending: bool,
    pub upload_failed: bool,
    pub delete_pending: bool,
    #[serde(default)]
    pub stored_node_ids: Vec<String>,
    #[serde(default)]
    pub context: Option<ContextDescription>,
    /// Directory holding the framework copy
    pub directory: PathBuf,
}

impl VStoreFile {
    pub fn new<S: Into<String>>(
        uuid: S,
        directory: &Path,
        descriptive_name: S,
        mime_type: S,
        extension: S,
        file_size: u64,
        is_private: bool,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            hash: String::new(),
            descriptive_name: descriptive_name.into(),
            mime_type: mime_type.into(),
            extension: extension.into(),
            creation_date_ms: chrono::Utc::now().timestamp_millis(),
            file_size,
            is_private,
            upload_pending: true,
            upload_failed: false,
            delete_pending: false,
            stored_node_ids: Vec::new(),
            context: None,
            directory: directory.to_path_buf(),
        }
    }

    /// `<directory>/<uuid>.<extension>`
    pub fn full_path(&self) -> PathBuf {
        self.directory
            .join(format!("{}.{}", self.uuid, self.extension))
    }

    pub fn has_context(&self) -> bool {
        self.context.is_some()
    }

    pub fn add_node_id<S: Into<String>>(&mut self, node_id: S) {
        let node_id = node_id.into();
        if !self.stored_node_ids.contains(&node_id) {
            self.stored_node_ids.push(node_id);
        }
    }

    pub fn metadata(&self) -> FileMetadata {
        FileMetadata {
            uuid: self.uuid.clone(),
            descriptive_name: self.descriptive_name.clone(),
            extension: self.extension.clone(),
            file_size: self.file_size,
            mime_type: self.mime_type.clone(),
            creation_timestamp_ms: self.creation_date_ms,
            is_private: self.is_private,
        }
    }
}

/// File metadata as reported by storage nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub uuid: String,
    #[serde(rename = "descriptiveName")]
    pub descriptive_name: String,
    #[serde(default)]
    pub extension: String,
    #[serde(rename = "filesize", default)]
    pub file_size: u64,
    #[serde(rename = "mimetype", default)]
    pub mime_type: String,
    #[serde(rename = "creationTimestamp", default)]
    pub creation_timestamp_ms: i64,
    #[serde(rename = "isPrivate", default)]
    pub is_private: bool,
}

impl FileMetadata {
    /// Parse a metadata object. A missing descriptive name becomes `<uuid>.<extension>`,
    /// a missing extension is derived from the mime type.
    pub fn from_value(value: &Value) -> VStoreResult<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| VStoreError::parse("file metadata is not a JSON object"))?;
        let uuid = obj
            .get("uuid")
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| VStoreError::parse("file metadata without uuid"))?
            .to_string();
        let mime_type = obj
            .get("mimetype")
            .and_then(Value::as_str)
            .unwrap_or(super::mime::MIME_UNKNOWN)
            .to_string();
        let extension = obj
            .get("extension")
            .and_then(Value::as_str)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| super::mime::extension_for_mime(&mime_type).to_string());
        let descriptive_name = obj
            .get("descriptiveName")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{uuid}.{extension}"));

        Ok(Self {
            uuid,
            descriptive_name,
            extension,
            file_size: obj.get("filesize").and_then(Value::as_u64).unwrap_or(0),
            mime_type,
            creation_timestamp_ms: obj
                .get("creationTimestamp")
                .and_then(Value::as_i64)
                .unwrap_or(0),
            is_private: obj.get("isPrivate").and_then(Value::as_bool).unwrap_or(false),
        })
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.uuid, self.extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_path() {
        let f = VStoreFile::new("abc", Path::new("/data/vstore/vfiles"), "cat.jpg", "image/jpeg", "jpg", 10, false);
        assert_eq!(f.full_path(), PathBuf::from("/data/vstore/vfiles/abc.jpg"));
        assert!(f.upload_pending);
        assert!(!f.has_context());
    }

    #[test]
    fn test_add_node_id_deduplicates() {
        let mut f = VStoreFile::new("abc", Path::new("/tmp"), "a.txt", "application/txt", "txt", 1, true);
        f.add_node_id("n1");
        f.add_node_id("n1");
        f.add_node_id("n2");
        assert_eq!(f.stored_node_ids, vec!["n1", "n2"]);
        assert!(f.metadata().is_private);
    }

    #[test]
    fn test_metadata_from_full_reply() {
        let meta = FileMetadata::from_value(&json!({
            "uuid": "u1",
            "extension": "png",
            "descriptiveName": "beach.png",
            "filesize": 2048,
            "mimetype": "image/png",
            "creationTimestamp": 1_500_000_000_000i64,
            "isPrivate": true
        }))
        .unwrap();
        assert_eq!(meta.descriptive_name, "beach.png");
        assert_eq!(meta.file_size, 2048);
        assert!(meta.is_private);
        assert_eq!(meta.file_name(), "u1.png");
    }

    #[test]
    fn test_metadata_defaults() {
        let meta = FileMetadata::from_value(&json!({
            "uuid": "u2",
            "mimetype": "application/pdf",
            "filesize": 5
        }))
        .unwrap();
        assert_eq!(meta.extension, "pdf");
        assert_eq!(meta.descriptive_name, "u2.pdf");
        assert!(!meta.is_private);

        assert!(FileMetadata::from_value(&json!({"filesize": 5})).is_err());
        assert!(FileMetadata::from_value(&json!([1])).is_err());
    }
}
