//! Where a log store keeps its data.

use std::path::PathBuf;

/// Storage backend selection for a log store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    /// Persist to `log.db` under the given directory.
    File(PathBuf),
    /// Keep everything in memory. Lost on close.
    InMemory,
}

impl StorageConfig {
    pub fn is_persistent(&self) -> bool {
        matches!(self, StorageConfig::File(_))
    }
}
