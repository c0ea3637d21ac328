//! Handle registry mapping watch handles back to the paths they watch.
//!
//! Shared by every watch loop in a session. All operations take one lock for
//! the duration of a single map mutation and never perform I/O while holding it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use super::error::WatchError;
use super::handle::HandleKey;

/// Concurrency-safe `HandleKey -> path` map.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    entries: Mutex<HashMap<HandleKey, Arc<PathBuf>>>,
}

impl HandleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a mapping.
    ///
    /// Fails with `DuplicateHandle` if the key is already present, which means
    /// a handle was registered twice without being released in between.
    pub fn register(&self, key: HandleKey, path: Arc<PathBuf>) -> Result<(), WatchError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&key) {
            return Err(WatchError::DuplicateHandle { key });
        }
        entries.insert(key, path);
        Ok(())
    }

    /// Resolve a key to its path.
    pub fn lookup(&self, key: HandleKey) -> Result<Arc<PathBuf>, WatchError> {
        self.entries
            .lock()
            .get(&key)
            .cloned()
            .ok_or(WatchError::UnknownHandle { key })
    }

    /// Remove a mapping. Returns `false` if it was already gone.
    pub fn unregister(&self, key: HandleKey) -> bool {
        self.entries.lock().remove(&key).is_some()
    }

    pub fn contains(&self, key: HandleKey) -> bool {
        self.entries.lock().contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
