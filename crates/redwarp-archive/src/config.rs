//! Configuration for dump access and the snapshot cache.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::decoder::DecoderConfig;

/// Where collection dumps live in the swarm and how they are read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Swarm directory holding the per-collection dumps.
    pub collections_path: String,
    /// File name suffix identifying a collection dump.
    pub dump_suffix: String,
    /// Collections with larger dumps are left out of the availability index.
    pub max_collection_size_bytes: Option<u64>,
    /// Chunking for the dump decoder.
    pub decoder: DecoderConfig,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            collections_path: "subreddits24".to_string(),
            dump_suffix: "_submissions.zst".to_string(),
            max_collection_size_bytes: Some(250 * 1024 * 1024), // 250MB
            decoder: DecoderConfig::default(),
        }
    }
}

/// Settings for [`crate::CachedArchive`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotCacheConfig {
    /// Root directory; snapshots go under `content/`, the index under `list/`.
    pub root: PathBuf,
    /// Size bound applied to each of the two stores (default 2GB).
    pub max_size_bytes: u64,
    /// How long a cached availability index stays valid (default 1 hour).
    pub list_ttl_secs: u64,
}

impl Default for SnapshotCacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".subreddit_cache"),
            max_size_bytes: 2 * 1024 * 1024 * 1024,
            list_ttl_secs: 3600,
        }
    }
}

impl SnapshotCacheConfig {
    /// Availability index lifetime.
    pub fn list_ttl(&self) -> Duration {
        Duration::from_secs(self.list_ttl_secs)
    }
}
