//! Process configuration: file, defaults and `REDWARP_*` environment overrides.

use std::path::{Path, PathBuf};

use redwarp_archive::{ArchiveConfig, SnapshotCacheConfig};
use redwarp_store::StoreConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Everything needed to assemble the snapshot service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarpConfig {
    /// Local directory standing in for the remote swarm.
    pub mirror_root: PathBuf,
    /// Content cache for fetched dump files.
    pub store: StoreConfig,
    /// Dump location and decoding.
    pub archive: ArchiveConfig,
    /// Snapshot and availability index cache.
    pub snapshot_cache: SnapshotCacheConfig,
}

impl Default for WarpConfig {
    fn default() -> Self {
        Self {
            mirror_root: PathBuf::from("./mirror"),
            store: StoreConfig::default(),
            archive: ArchiveConfig::default(),
            snapshot_cache: SnapshotCacheConfig::default(),
        }
    }
}

impl WarpConfig {
    /// Parses a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => Ok(toml::from_str(&contents)?),
            "json" => Ok(serde_json::from_str(&contents)?),
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// Reads `path` if it exists, otherwise starts from defaults, then
    /// applies environment overrides.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            info!(path = %path.display(), "loading configuration");
            Self::from_file(path)?
        } else {
            warn!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies `REDWARP_*` overrides looked up through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("REDWARP_MIRROR_ROOT") {
            self.mirror_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("REDWARP_CACHE_DIR") {
            self.store.root = PathBuf::from(v);
        }
        if let Some(v) = lookup("REDWARP_SNAPSHOT_CACHE_DIR") {
            self.snapshot_cache.root = PathBuf::from(v);
        }
        if let Some(v) = lookup("REDWARP_COLLECTIONS_PATH") {
            self.archive.collections_path = v;
        }
        if let Some(v) = lookup("REDWARP_MAX_COLLECTION_SIZE_BYTES") {
            self.archive.max_collection_size_bytes = match v.trim() {
                "" | "none" => None,
                n => Some(parse_bytes("REDWARP_MAX_COLLECTION_SIZE_BYTES", n)?),
            };
        }
        if let Some(v) = lookup("REDWARP_SNAPSHOT_CACHE_MAX_SIZE_BYTES") {
            self.snapshot_cache.max_size_bytes =
                parse_bytes("REDWARP_SNAPSHOT_CACHE_MAX_SIZE_BYTES", v.trim())?;
        }
        Ok(())
    }
}

fn parse_bytes(key: &str, value: &str) -> anyhow::Result<u64> {
    value
        .parse()
        .map_err(|e| anyhow::anyhow!("{} must be a byte count, got {:?}: {}", key, value, e))
}
