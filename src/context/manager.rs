//! Holds the current usage context and its persisted copy

use super::description::ContextDescription;
use crate::error::VStoreResult;
use crate::events::{EventBus, VStoreEvent};
use parking_lot::RwLock;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const CONTEXT_FILE_NAME: &str = "context.json";

pub struct ContextManager {
    current: RwLock<ContextDescription>,
    context_file: PathBuf,
    events: EventBus,
}

impl ContextManager {
    /// Create the manager, restoring a persisted context from `context_file` if one exists
    pub fn new<P: Into<PathBuf>>(context_file: P, events: EventBus) -> Self {
        let context_file = context_file.into();
        let current = match load_context_file(&context_file) {
            Some(ctx) => {
                info!(path = %context_file.display(), "Restored persisted usage context");
                ctx
            }
            None => ContextDescription::new(),
        };
        Self {
            current: RwLock::new(current),
            context_file,
            events,
        }
    }

    /// Replace the current context
    pub fn provide_context(&self, context: ContextDescription) {
        *self.current.write() = context;
        debug!("New usage context provided");
        self.events.publish(VStoreEvent::ContextProvided);
    }

    /// Write the current context to disk, or delete the persisted copy
    pub fn persist_context(&self, make_persistent: bool) -> VStoreResult<()> {
        if make_persistent {
            let json = self.current.read().to_json();
            if let Some(parent) = self.context_file.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&self.context_file, json)?;
            debug!(path = %self.context_file.display(), "Usage context persisted");
            Ok(())
        } else {
            self.remove_context_file()
        }
    }

    /// Reset to an empty context. The persisted copy is removed unless `keep_persistent` is set.
    pub fn clear_current_context(&self, keep_persistent: bool) -> VStoreResult<()> {
        *self.current.write() = ContextDescription::new();
        if !keep_persistent {
            self.remove_context_file()?;
        }
        Ok(())
    }

    pub fn current_context(&self) -> ContextDescription {
        self.current.read().clone()
    }

    pub fn has_persisted_context(&self) -> bool {
        self.context_file.exists()
    }

    pub fn context_file(&self) -> &Path {
        &self.context_file
    }

    fn remove_context_file(&self) -> VStoreResult<()> {
        match fs::remove_file(&self.context_file) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn load_context_file(path: &Path) -> Option<ContextDescription> {
    let content = fs::read_to_string(path).ok()?;
    if content.trim().is_empty() {
        return None;
    }
    match ContextDescription::from_json(&content) {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable persisted context");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::types::{LatLng, Location};
    use tempfile::TempDir;

    fn located() -> ContextDescription {
        ContextDescription::with_location(Location::new(LatLng::new(49.877684, 8.654256), 2.0, 0, ""))
    }

    #[test]
    fn test_provide_and_read_context() {
        let dir = TempDir::new().unwrap();
        let manager = ContextManager::new(dir.path().join(CONTEXT_FILE_NAME), EventBus::new());
        assert!(!manager.current_context().has_location_context());

        manager.provide_context(located());
        assert!(manager.current_context().has_location_context());
    }

    #[tokio::test]
    async fn test_provide_emits_event() {
        let dir = TempDir::new().unwrap();
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let manager = ContextManager::new(dir.path().join(CONTEXT_FILE_NAME), bus);
        manager.provide_context(located());
        assert!(matches!(rx.recv().await.unwrap(), VStoreEvent::ContextProvided));
    }

    #[test]
    fn test_persisted_context_survives_restart() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("prefs").join(CONTEXT_FILE_NAME);
        {
            let manager = ContextManager::new(&file, EventBus::new());
            manager.provide_context(located());
            manager.persist_context(true).unwrap();
            assert!(manager.has_persisted_context());
        }
        let restored = ContextManager::new(&file, EventBus::new());
        assert!(restored.current_context().has_location_context());
    }

    #[test]
    fn test_unpersist_and_clear() {
        let dir = TempDir::new().unwrap();
        let manager = ContextManager::new(dir.path().join(CONTEXT_FILE_NAME), EventBus::new());
        manager.provide_context(located());
        manager.persist_context(true).unwrap();

        manager.clear_current_context(true).unwrap();
        assert!(!manager.current_context().has_location_context());
        assert!(manager.has_persisted_context());

        manager.persist_context(false).unwrap();
        assert!(!manager.has_persisted_context());
        // removing twice is fine
        manager.clear_current_context(false).unwrap();
    }

    #[test]
    fn test_corrupt_context_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join(CONTEXT_FILE_NAME);
        std::fs::write(&file, "{broken").unwrap();
        let manager = ContextManager::new(&file, EventBus::new());
        assert!(!manager.current_context().has_location_context());
    }
}
