//! Advisory lock markers for serializing cache population.
//!
//! A lock is the existence of a marker file next to the content path.
//! Acquisition polls until the marker can be created exclusively; release
//! deletes it. Every process sharing a cache directory must follow the same
//! protocol. Waiting never fails on its own; a warning is logged each time
//! the configured warning interval elapses.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::StoreResult;

/// Polling and staleness settings for lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Sleep between attempts to create the marker.
    pub poll_interval: Duration,
    /// A warning is logged each time the wait passes another multiple of this.
    pub warn_interval: Duration,
    /// Markers older than this are treated as orphaned and removed.
    pub stale_after: Option<Duration>,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            warn_interval: Duration::from_secs(30),
            stale_after: None,
        }
    }
}

/// A held lock marker. Dropping it without [`LockMarker::release`] still
/// removes the marker, so a cancelled populator does not orphan it.
#[derive(Debug)]
pub struct LockMarker {
    path: PathBuf,
    waited: Duration,
    released: bool,
}

impl LockMarker {
    /// Waits until the marker at `path` can be created, then holds it.
    pub async fn acquire(path: impl Into<PathBuf>, opts: &LockOptions) -> StoreResult<Self> {
        let path = path.into();
        let started = Instant::now();
        let mut next_warn = opts.warn_interval;

        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    let owner = format!("pid={}\n", std::process::id());
                    // contents are informational only
                    let _ = file.write_all(owner.as_bytes()).await;
                    let waited = started.elapsed();
                    debug!(path = %path.display(), waited_ms = waited.as_millis() as u64, "acquired lock marker");
                    return Ok(Self {
                        path,
                        waited,
                        released: false,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            if let Some(stale_after) = opts.stale_after {
                if marker_age(&path).await.is_some_and(|age| age >= stale_after) {
                    warn!(
                        path = %path.display(),
                        stale_after_secs = stale_after.as_secs(),
                        "breaking stale lock marker"
                    );
                    match fs::remove_file(&path).await {
                        Ok(()) => continue,
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
            }

            let waited = started.elapsed();
            if waited >= next_warn {
                warn!(
                    path = %path.display(),
                    waited_secs = waited.as_secs(),
                    "still waiting for lock marker"
                );
                while next_warn <= waited {
                    next_warn += opts.warn_interval;
                }
            }
            tokio::time::sleep(opts.poll_interval).await;
        }
    }

    /// Path of the marker file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// How long acquisition waited.
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// Removes the marker.
    pub async fn release(mut self) -> StoreResult<()> {
        self.released = true;
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "released lock marker");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "lock marker vanished before release");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for LockMarker {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "failed to remove lock marker on drop");
                }
            }
        }
    }
}

/// Returns true if a lock marker currently exists at `path`.
pub async fn is_locked(path: &Path) -> bool {
    fs::metadata(path).await.is_ok()
}

async fn marker_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).await.ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}
