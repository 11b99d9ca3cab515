//! Framework directories, device identifier and local file copies

use crate::error::{messages, VStoreError, VStoreResult};
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

const VSTORE_DIR: &str = "vstore";
const STORED_FILES_DIR: &str = "vfiles";
const THUMBNAILS_DIR: &str = "thumbs";
const DOWNLOADED_FILES_DIR: &str = "dlfiles";
const PREF_FILE_DIR: &str = "prefs";
const DEVICE_ID_FILE: &str = "device";
const DATABASE_DIR: &str = "db";

const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Owns the on-disk layout under `<base>/vstore/`
#[derive(Debug)]
pub struct FileManager {
    vstore_dir: PathBuf,
    device_id: OnceCell<String>,
}

impl FileManager {
    /// Create the directory layout. Fails when `base_dir` does not exist.
    pub fn new(base_dir: &Path) -> VStoreResult<Self> {
        if !base_dir.is_dir() {
            return Err(VStoreError::BaseDirectoryDoesNotExist {
                path: base_dir.display().to_string(),
            });
        }
        let manager = Self {
            vstore_dir: base_dir.join(VSTORE_DIR),
            device_id: OnceCell::new(),
        };
        for dir in [
            manager.stored_files_dir(),
            manager.thumbnails_dir(),
            manager.downloaded_files_dir(),
            manager.prefs_dir(),
        ] {
            fs::create_dir_all(&dir)?;
        }
        debug!(path = %manager.vstore_dir.display(), "Framework directories ready");
        Ok(manager)
    }

    pub fn vstore_dir(&self) -> &Path {
        &self.vstore_dir
    }

    pub fn stored_files_dir(&self) -> PathBuf {
        self.vstore_dir.join(STORED_FILES_DIR)
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.stored_files_dir().join(THUMBNAILS_DIR)
    }

    pub fn downloaded_files_dir(&self) -> PathBuf {
        self.vstore_dir.join(DOWNLOADED_FILES_DIR)
    }

    pub fn prefs_dir(&self) -> PathBuf {
        self.vstore_dir.join(PREF_FILE_DIR)
    }

    pub fn database_dir(&self) -> PathBuf {
        self.vstore_dir.join(DATABASE_DIR)
    }

    pub fn context_file(&self) -> PathBuf {
        self.prefs_dir().join(crate::context::manager::CONTEXT_FILE_NAME)
    }

    pub fn thumbnail_path(&self, file_uuid: &str) -> PathBuf {
        self.thumbnails_dir().join(format!("{file_uuid}.png"))
    }

    /// Identifier of this device, generated on first use and kept in `prefs/device`
    pub fn device_identifier(&self) -> VStoreResult<&str> {
        self.device_id
            .get_or_try_init(|| {
                let path = self.prefs_dir().join(DEVICE_ID_FILE);
                match fs::read_to_string(&path) {
                    Ok(id) if !id.trim().is_empty() => Ok(id.trim().to_string()),
                    Ok(_) => write_new_device_id(&path),
                    Err(e) if e.kind() == ErrorKind::NotFound => write_new_device_id(&path),
                    Err(e) => Err(e.into()),
                }
            })
            .map(String::as_str)
    }

    /// Copy `source` into `vfiles/<uuid>.<extension>` and return the copy's path
    pub async fn copy_into_framework(
        &self,
        source: &Path,
        uuid: &str,
        extension: &str,
    ) -> VStoreResult<PathBuf> {
        let target = self.stored_files_dir().join(format!("{uuid}.{extension}"));
        tokio::fs::copy(source, &target).await.map_err(|e| {
            VStoreError::copy_failed(format!(
                "{} ({}: {e})",
                messages::COPYING_INTO_FRAMEWORK_FAILED,
                source.display()
            ))
        })?;
        if !tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Err(VStoreError::file_not_found(messages::COPIED_FILE_NOT_FOUND));
        }
        Ok(target)
    }

    /// Remove a framework copy and its thumbnail. Missing files are ignored.
    pub async fn remove_local_copy(&self, file_path: &Path, file_uuid: &str) -> VStoreResult<()> {
        for path in [file_path.to_path_buf(), self.thumbnail_path(file_uuid)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "Removed local file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Delete downloaded files and thumbnails
    pub fn clean(&self) -> VStoreResult<()> {
        for dir in [self.downloaded_files_dir(), self.thumbnails_dir()] {
            if dir.exists() {
                fs::remove_dir_all(&dir)?;
            }
            fs::create_dir_all(&dir)?;
        }
        info!("Removed downloaded files and thumbnails");
        Ok(())
    }
}

fn write_new_device_id(path: &Path) -> VStoreResult<String> {
    let id = uuid::Uuid::new_v4().to_string();
    fs::write(path, &id)?;
    info!(device_id = %id, "Generated device identifier");
    Ok(id)
}

/// SHA-256 of a file's content, hex encoded
pub async fn hash_file(path: &Path) -> VStoreResult<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
