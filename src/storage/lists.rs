//! Named persistent string lists

use super::Database;
use crate::error::VStoreResult;

/// Files with a download in flight
pub const CURRENTLY_DOWNLOADING: &str = "currently_downloading";

fn list_key(list: &str, item: &str) -> String {
    format!("{list}/{item}")
}

impl Database {
    /// Add `item` to `list`. Returns false when it was already present.
    pub fn list_add(&self, list: &str, item: &str) -> VStoreResult<bool> {
        let previous = self
            .lists
            .compare_and_swap(list_key(list, item), None as Option<&[u8]>, Some(&b"1"[..]))?;
        Ok(previous.is_ok())
    }

    pub fn list_remove(&self, list: &str, item: &str) -> VStoreResult<()> {
        self.lists.remove(list_key(list, item))?;
        Ok(())
    }

    pub fn list_contains(&self, list: &str, item: &str) -> VStoreResult<bool> {
        Ok(self.lists.contains_key(list_key(list, item))?)
    }

    pub fn list_items(&self, list: &str) -> VStoreResult<Vec<String>> {
        let prefix = format!("{list}/");
        let mut items = Vec::new();
        for entry in self.lists.scan_prefix(prefix.as_bytes()) {
            let (key, _) = entry?;
            let key = String::from_utf8_lossy(&key);
            items.push(key[prefix.len()..].to_string());
        }
        Ok(items)
    }

    pub fn list_clear(&self, list: &str) -> VStoreResult<()> {
        let prefix = format!("{list}/");
        for entry in self.lists.scan_prefix(prefix.as_bytes()) {
            let (key, _) = entry?;
            self.lists.remove(key)?;
        }
        Ok(())
    }

    /// Empty every list
    pub fn clear_lists(&self) -> VStoreResult<()> {
        self.lists.clear()?;
        Ok(())
    }
}
