//! Local persistence
//!
//! One sled database with a tree per record kind. Values are JSON so that
//! records stay readable with any sled tooling and survive field additions.

mod files;
mod lists;
mod nodes;
mod rules;
mod uploads;

pub use files::FileOrdering;
pub use lists::CURRENTLY_DOWNLOADING;
pub use uploads::UploadStatus;

use crate::error::VStoreResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, warn};

const FILES_TREE: &str = "files";
const RULES_TREE: &str = "rules";
const NODES_TREE: &str = "nodes";
const LISTS_TREE: &str = "lists";
const UPLOADS_TREE: &str = "uploads";

/// Cloneable handle to the local database
#[derive(Clone)]
pub struct Database {
    db: sled::Db,
    files: sled::Tree,
    rules: sled::Tree,
    nodes: sled::Tree,
    lists: sled::Tree,
    uploads: sled::Tree,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("files", &self.files.len())
            .field("rules", &self.rules.len())
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

impl Database {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> VStoreResult<Self> {
        let db = sled::open(path)?;
        debug!(path = %path.display(), "Opened local database");
        Self::from_db(db)
    }

    /// In-memory database removed on drop
    pub fn temporary() -> VStoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> VStoreResult<Self> {
        Ok(Self {
            files: db.open_tree(FILES_TREE)?,
            rules: db.open_tree(RULES_TREE)?,
            nodes: db.open_tree(NODES_TREE)?,
            lists: db.open_tree(LISTS_TREE)?,
            uploads: db.open_tree(UPLOADS_TREE)?,
            db,
        })
    }

    pub async fn flush(&self) -> VStoreResult<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}

fn put_json<T: Serialize>(tree: &sled::Tree, key: &str, value: &T) -> VStoreResult<()> {
    let bytes = serde_json::to_vec(value)?;
    tree.insert(key.as_bytes(), bytes)?;
    Ok(())
}

fn get_json<T: DeserializeOwned>(tree: &sled::Tree, key: &str) -> VStoreResult<Option<T>> {
    match tree.get(key.as_bytes())? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Every decodable value of a tree. Undecodable rows are skipped.
fn all_json<T: DeserializeOwned>(tree: &sled::Tree) -> VStoreResult<Vec<T>> {
    let mut out = Vec::with_capacity(tree.len());
    for entry in tree.iter() {
        let (key, bytes) = entry?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => out.push(value),
            Err(e) => warn!(
                key = %String::from_utf8_lossy(&key),
                error = %e,
                "Skipping undecodable database row"
            ),
        }
    }
    Ok(out)
}
