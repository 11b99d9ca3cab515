use super::{all_json, get_json, put_json, Database};
use crate::error::VStoreResult;
use crate::files::VStoreFile;
use serde::{Deserialize, Serialize};

/// Sort order for file listings, by creation date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileOrdering {
    #[default]
    NewestFirst,
    OldestFirst,
}

impl Database {
    /// Insert or replace a file record
    pub fn insert_file(&self, file: &VStoreFile) -> VStoreResult<()> {
        put_json(&self.files, &file.uuid, file)
    }

    pub fn get_file(&self, uuid: &str) -> VStoreResult<Option<VStoreFile>> {
        get_json(&self.files, uuid)
    }

    pub fn is_my_file(&self, uuid: &str) -> VStoreResult<bool> {
        Ok(self.files.contains_key(uuid.as_bytes())?)
    }

    /// Whether a file with this content hash was stored before
    pub fn is_already_stored(&self, hash: &str) -> VStoreResult<bool> {
        Ok(self.all_files()?.iter().any(|f| f.hash == hash))
    }

    /// Files waiting for upload, oldest first
    pub fn files_to_upload(&self) -> VStoreResult<Vec<VStoreFile>> {
        let mut files: Vec<VStoreFile> = self
            .all_files()?
            .into_iter()
            .filter(|f| f.upload_pending && !f.delete_pending)
            .collect();
        files.sort_by_key(|f| f.creation_date_ms);
        Ok(files)
    }

    pub fn files_for_deletion(&self) -> VStoreResult<Vec<VStoreFile>> {
        Ok(self
            .all_files()?
            .into_iter()
            .filter(|f| f.delete_pending)
            .collect())
    }

    pub fn update_file_flags(
        &self,
        uuid: &str,
        upload_pending: bool,
        upload_failed: bool,
        delete_pending: bool,
    ) -> VStoreResult<Option<VStoreFile>> {
        self.update_file(uuid, |f| {
            f.upload_pending = upload_pending;
            f.upload_failed = upload_failed;
            f.delete_pending = delete_pending;
        })
    }

    pub fn mark_for_deletion(&self, uuid: &str) -> VStoreResult<Option<VStoreFile>> {
        self.update_file(uuid, |f| f.delete_pending = true)
    }

    /// Apply `change` to a stored record atomically. Returns the new record, `None` if absent.
    pub fn update_file<F>(&self, uuid: &str, mut change: F) -> VStoreResult<Option<VStoreFile>>
    where
        F: FnMut(&mut VStoreFile),
    {
        let updated = self.files.update_and_fetch(uuid.as_bytes(), |old| {
            let old = old?;
            match serde_json::from_slice::<VStoreFile>(old) {
                Ok(mut file) => {
                    change(&mut file);
                    serde_json::to_vec(&file).ok().or_else(|| Some(old.to_vec()))
                }
                Err(_) => Some(old.to_vec()),
            }
        })?;
        match updated {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Remove a file record, returning it
    pub fn delete_file(&self, uuid: &str) -> VStoreResult<Option<VStoreFile>> {
        self.clear_upload_statuses(uuid)?;
        match self.files.remove(uuid.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn count_pending_uploads(&self) -> VStoreResult<usize> {
        Ok(self.files_to_upload()?.len())
    }

    pub fn list_files(
        &self,
        ordering: FileOrdering,
        only_pending: bool,
        only_private: bool,
    ) -> VStoreResult<Vec<VStoreFile>> {
        let mut files: Vec<VStoreFile> = self
            .all_files()?
            .into_iter()
            .filter(|f| !f.delete_pending)
            .filter(|f| !only_pending || f.upload_pending)
            .filter(|f| !only_private || f.is_private)
            .collect();
        match ordering {
            FileOrdering::NewestFirst => {
                files.sort_by(|a, b| b.creation_date_ms.cmp(&a.creation_date_ms))
            }
            FileOrdering::OldestFirst => files.sort_by_key(|f| f.creation_date_ms),
        }
        Ok(files)
    }

    fn all_files(&self) -> VStoreResult<Vec<VStoreFile>> {
        all_json(&self.files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn file(uuid: &str, created: i64, private: bool) -> VStoreFile {
        let mut f = VStoreFile::new(uuid, Path::new("/tmp"), "name.jpg", "image/jpeg", "jpg", 10, private);
        f.creation_date_ms = created;
        f.hash = format!("hash-{uuid}");
        f
    }

    #[test]
    fn test_insert_and_get() {
        let db = Database::temporary().unwrap();
        db.insert_file(&file("a", 1, false)).unwrap();
        assert!(db.is_my_file("a").unwrap());
        assert!(!db.is_my_file("b").unwrap());
        assert_eq!(db.get_file("a").unwrap().unwrap().hash, "hash-a");
        assert!(db.is_already_stored("hash-a").unwrap());
        assert!(!db.is_already_stored("hash-x").unwrap());
    }

    #[test]
    fn test_upload_queue_and_flags() {
        let db = Database::temporary().unwrap();
        db.insert_file(&file("late", 20, false)).unwrap();
        db.insert_file(&file("early", 10, false)).unwrap();
        let queue: Vec<String> = db.files_to_upload().unwrap().into_iter().map(|f| f.uuid).collect();
        assert_eq!(queue, vec!["early", "late"]);

        let updated = db.update_file_flags("early", false, false, false).unwrap().unwrap();
        assert!(!updated.upload_pending);
        assert_eq!(db.count_pending_uploads().unwrap(), 1);

        db.mark_for_deletion("late").unwrap();
        assert_eq!(db.count_pending_uploads().unwrap(), 0);
        assert_eq!(db.files_for_deletion().unwrap().len(), 1);

        assert!(db.update_file_flags("missing", false, false, false).unwrap().is_none());
    }

    #[test]
    fn test_list_files_ordering_and_filters() {
        let db = Database::temporary().unwrap();
        db.insert_file(&file("a", 1, true)).unwrap();
        db.insert_file(&file("b", 2, false)).unwrap();
        db.insert_file(&file("c", 3, false)).unwrap();
        db.update_file("c", |f| f.upload_pending = false).unwrap();

        let newest: Vec<String> = db
            .list_files(FileOrdering::NewestFirst, false, false)
            .unwrap()
            .into_iter()
            .map(|f| f.uuid)
            .collect();
        assert_eq!(newest, vec!["c", "b", "a"]);

        let pending = db.list_files(FileOrdering::OldestFirst, true, false).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].uuid, "a");

        let private = db.list_files(FileOrdering::OldestFirst, false, true).unwrap();
        assert_eq!(private.len(), 1);
    }

    #[test]
    fn test_delete_file() {
        let db = Database::temporary().unwrap();
        db.insert_file(&file("a", 1, false)).unwrap();
        assert_eq!(db.delete_file("a").unwrap().map(|f| f.uuid), Some("a".to_string()));
        assert!(db.delete_file("a").unwrap().is_none());
    }
}
