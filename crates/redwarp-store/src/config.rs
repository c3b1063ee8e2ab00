//! Configuration for the on-disk content cache.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a [`crate::ContentCache`] and its blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory holding the `content/` and `meta/` subtrees.
    pub root: PathBuf,
    /// Upper bound on occupied content bytes (default 2GB).
    pub max_size_bytes: u64,
    /// Interval between lock marker polls in milliseconds (default 100).
    pub lock_poll_interval_ms: u64,
    /// A warning is logged each time a lock wait passes this many seconds (default 30).
    pub lock_warn_interval_secs: u64,
    /// Age after which a lock marker is considered orphaned and removed.
    /// `None` means markers are never broken.
    pub lock_stale_after_secs: Option<u64>,
    /// Interval between download progress observations in milliseconds (default 1000).
    pub progress_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".torrent_cache"),
            max_size_bytes: 2 * 1024 * 1024 * 1024, // 2GB
            lock_poll_interval_ms: 100,
            lock_warn_interval_secs: 30,
            lock_stale_after_secs: None,
            progress_interval_ms: 1000,
        }
    }
}

impl StoreConfig {
    /// Creates a config rooted at `root` with default limits.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Lock acquisition options derived from this config.
    pub fn lock_options(&self) -> crate::lock::LockOptions {
        crate::lock::LockOptions {
            poll_interval: Duration::from_millis(self.lock_poll_interval_ms.max(1)),
            warn_interval: Duration::from_secs(self.lock_warn_interval_secs.max(1)),
            stale_after: self.lock_stale_after_secs.map(Duration::from_secs),
        }
    }

    /// Interval between progress observations.
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }
}
