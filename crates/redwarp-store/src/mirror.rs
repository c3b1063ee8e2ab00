//! A [`RemoteFetcher`] backed by a local directory holding a swarm's files.
//!
//! Useful where the swarm has already been synced to disk by an external
//! client, and as a deterministic fetcher in tests.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::blob_store::sha256_hex;
use crate::error::{StoreError, StoreResult};
use crate::progress::FetchProgress;
use crate::remote::{RemoteEntry, RemoteFetcher, RemoteFile};

/// Serves swarm files straight out of a directory tree.
#[derive(Debug, Clone)]
pub struct DirectoryMirror {
    root: PathBuf,
    descriptor: String,
}

impl DirectoryMirror {
    /// Creates a mirror rooted at `root`. The descriptor is derived from the root path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let descriptor = format!("dir:{}", sha256_hex(root.to_string_lossy().as_bytes()));
        Self { root, descriptor }
    }

    /// Creates a mirror with an explicit swarm descriptor.
    pub fn with_descriptor(root: impl Into<PathBuf>, descriptor: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            descriptor: descriptor.into(),
        }
    }

    /// Root directory of the mirror.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve_exact(&self, path: &str) -> StoreResult<PathBuf> {
        let rel = Path::new(path);
        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(StoreError::InvalidPath {
                path: path.to_string(),
            });
        }
        Ok(self.root.join(rel))
    }
}

fn to_relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Some(parts.join("/"))
}

#[async_trait]
impl RemoteFetcher for DirectoryMirror {
    fn descriptor(&self) -> &str {
        &self.descriptor
    }

    async fn list_files(&self) -> StoreResult<Vec<RemoteEntry>> {
        let root_path = self.root.display().to_string();
        if !fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(StoreError::remote(root_path, "mirror root is not a directory"));
        }

        let mut entries = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut rd = fs::read_dir(&dir)
                .await
                .map_err(|e| StoreError::remote(dir.display().to_string(), e))?;
            while let Some(dirent) = rd.next_entry().await? {
                let file_type = dirent.file_type().await?;
                let path = dirent.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    let size_bytes = dirent.metadata().await?.len();
                    if let Some(rel) = to_relative(&self.root, &path) {
                        entries.push(RemoteEntry {
                            path: rel,
                            size_bytes,
                        });
                    }
                }
            }
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(root = %root_path, files = entries.len(), "listed mirror files");
        Ok(entries)
    }

    async fn fetch_file(&self, path: &str, progress: Arc<FetchProgress>) -> StoreResult<RemoteFile> {
        let exact = self.resolve_exact(path)?;
        let local = if fs::metadata(&exact).await.map(|m| m.is_file()).unwrap_or(false) {
            exact
        } else {
            // files may sit under a top-level swarm directory
            let wanted = path.trim_start_matches("./");
            let nested = format!("/{}", wanted);
            self.list_files()
                .await?
                .into_iter()
                .find(|e| e.path == wanted || e.path.ends_with(&nested))
                .map(|e| self.root.join(e.path))
                .ok_or_else(|| StoreError::RemoteFileMissing {
                    path: path.to_string(),
                })?
        };

        let size = fs::metadata(&local).await?.len();
        progress.set_total(size);
        progress.set_done(size);
        debug!(path, local = %local.display(), size, "resolved mirror file");
        Ok(RemoteFile {
            path: local,
            owned: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mirror_with_files() -> (tempfile::TempDir, DirectoryMirror) {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("reddit").join("subreddits24");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("rust_submissions.zst"), vec![0u8; 12]).unwrap();
        std::fs::write(nested.join("rust_comments.zst"), vec![0u8; 4]).unwrap();
        let mirror = DirectoryMirror::with_descriptor(dir.path(), "test-swarm");
        (dir, mirror)
    }

    #[tokio::test]
    async fn test_list_files_relative_and_sorted() {
        let (_dir, mirror) = mirror_with_files();
        let files = mirror.list_files().await.unwrap();
        assert_eq!(
            files,
            vec![
                RemoteEntry {
                    path: "reddit/subreddits24/rust_comments.zst".to_string(),
                    size_bytes: 4,
                },
                RemoteEntry {
                    path: "reddit/subreddits24/rust_submissions.zst".to_string(),
                    size_bytes: 12,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_fetch_by_suffix() {
        let (dir, mirror) = mirror_with_files();
        let progress = Arc::new(FetchProgress::new());
        let file = mirror
            .fetch_file("subreddits24/rust_submissions.zst", progress.clone())
            .await
            .unwrap();
        assert_eq!(
            file.path,
            dir.path().join("reddit/subreddits24/rust_submissions.zst")
        );
        assert!(!file.owned);
        assert_eq!(progress.percent(), 100);
    }

    #[tokio::test]
    async fn test_fetch_missing() {
        let (_dir, mirror) = mirror_with_files();
        let err = mirror
            .fetch_file("subreddits24/go_submissions.zst", Arc::new(FetchProgress::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RemoteFileMissing { .. }));
    }

    #[tokio::test]
    async fn test_suffix_match_is_anchored_to_separator() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("dumps");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("trust_submissions.zst"), b"t").unwrap();
        let mirror = DirectoryMirror::new(dir.path());

        let err = mirror
            .fetch_file("rust_submissions.zst", Arc::new(FetchProgress::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RemoteFileMissing { .. }));

        std::fs::write(nested.join("rust_submissions.zst"), b"r").unwrap();
        let file = mirror
            .fetch_file("rust_submissions.zst", Arc::new(FetchProgress::new()))
            .await
            .unwrap();
        assert_eq!(file.path, nested.join("rust_submissions.zst"));
    }

    #[tokio::test]
    async fn test_fetch_rejects_parent_components() {
        let (_dir, mirror) = mirror_with_files();
        let err = mirror
            .fetch_file("../secret", Arc::new(FetchProgress::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath { .. }));
    }

    #[tokio::test]
    async fn test_missing_root_is_remote_unavailable() {
        let mirror = DirectoryMirror::new("/nonexistent/redwarp/mirror");
        let err = mirror.list_files().await.unwrap_err();
        assert!(err.is_remote());
    }
}
