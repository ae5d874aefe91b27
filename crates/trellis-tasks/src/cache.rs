//! In-memory result cache keyed by task key and version

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::result::GraphResult;

/// Completed and failed task results, keyed by (key, version).
///
/// Entries are append-only per distinct version. Cancelled results are
/// never stored.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: Mutex<HashMap<(String, String), Arc<GraphResult>>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), Arc<GraphResult>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up a result
    pub fn get(&self, key: &str, version: &str) -> Option<Arc<GraphResult>> {
        let hit = self
            .entries()
            .get(&(key.to_string(), version.to_string()))
            .cloned();
        debug!(key, version, hit = hit.is_some(), "result cache lookup");
        hit
    }

    /// Store a result. Cancelled results are ignored.
    pub fn put(&self, result: Arc<GraphResult>) {
        if result.cancelled {
            return;
        }
        self.entries()
            .insert((result.key.clone(), result.version.clone()), result);
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries();
        CacheStats {
            entries: entries.len(),
            errors: entries.values().filter(|r| r.is_error()).count(),
        }
    }
}

/// Cache statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of stored results
    pub entries: usize,
    /// Stored results carrying an error
    pub errors: usize,
}
