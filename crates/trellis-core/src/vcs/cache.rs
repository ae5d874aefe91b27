//! In-memory tree version cache with path-scoped invalidation

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::TreeVersion;

#[derive(Debug, Clone)]
struct Entry {
    version: TreeVersion,
    /// Directory the entry was computed for
    context: PathBuf,
}

/// Tree versions keyed by scan key, each scoped to the directory it covers
#[derive(Debug, Default)]
pub struct TreeCache {
    entries: HashMap<String, Entry>,
}

impl TreeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<TreeVersion> {
        self.entries.get(key).map(|e| e.version.clone())
    }

    pub fn set(&mut self, key: impl Into<String>, context: &Path, version: TreeVersion) {
        self.entries.insert(
            key.into(),
            Entry {
                version,
                context: context.to_path_buf(),
            },
        );
    }

    /// Drop entries computed for `path` or any of its ancestors.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate_up(&mut self, path: &Path) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !path.starts_with(&entry.context));
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(path = %path.display(), removed, "invalidated tree versions");
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
