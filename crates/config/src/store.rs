//! Run store configuration.

use std::path::PathBuf;

use serde::Deserialize;

/// Where and how runs are persisted.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Data directory for the segment log and blob store. Required.
    pub path: PathBuf,
    /// Depth of the in-memory persistence queue between the run engine and
    /// the store writer. When full, new run records are dropped with a log
    /// line rather than blocking a finished response.
    pub queue_depth: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            queue_depth: 256,
        }
    }
}
