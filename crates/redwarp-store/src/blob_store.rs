//! Hash-addressed blob storage on local disk.
//!
//! Layout under the store root:
//! - `content/<sha256-hex>`: the blob itself; its presence is the commit point
//!   and the source of truth for occupancy
//! - `content/<sha256-hex>.lock`: advisory lock marker (see [`crate::lock`])
//! - `meta/<sha256-hex>.json`: logical key, size and access times
//!
//! Blobs are written to a temporary sibling and renamed into place, so a
//! reader sees either the complete blob or nothing.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

/// Suffix appended to a content path to form its lock marker path.
pub const LOCK_SUFFIX: &str = ".lock";

const CONTENT_DIR: &str = "content";
const META_DIR: &str = "meta";
const TMP_MARKER: &str = ".tmp-";

/// Age after which metadata with no blob beside it is treated as abandoned.
pub const ORPHAN_META_GRACE_MS: u64 = 10 * 60 * 1000;

/// Hex-encoded SHA-256 of a logical key. Names content and metadata files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobKey(String);

impl BlobKey {
    /// Derives the key for a logical key.
    pub fn for_logical(logical: &str) -> Self {
        BlobKey(sha256_hex(logical.as_bytes()))
    }

    /// Returns the hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Metadata record kept for every stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    /// The logical key the blob was stored under.
    pub logical_key: String,
    /// Blob size in bytes.
    pub size_bytes: u64,
    /// Insertion time in milliseconds since epoch.
    pub inserted_at_ms: u64,
    /// Last hit time in milliseconds since epoch.
    pub last_access_ms: u64,
}

/// Counters for blob store activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobStoreStats {
    /// Lookups that found a blob.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Blobs written.
    pub insertions: u64,
    /// Blobs removed by eviction.
    pub evictions: u64,
}

#[derive(Debug, Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
}

/// Outcome of one eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Logical keys that were removed.
    pub evicted: Vec<String>,
    /// Bytes freed.
    pub freed_bytes: u64,
    /// Occupied bytes after the pass.
    pub occupied_bytes: u64,
}

/// Size-bounded, hash-addressed blob store rooted in a directory.
#[derive(Debug)]
pub struct BlobStore {
    root: PathBuf,
    max_size_bytes: u64,
    stats: AtomicStats,
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!("{}{}", TMP_MARKER, uuid::Uuid::new_v4().simple()));
    PathBuf::from(name)
}

impl BlobStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>, max_size_bytes: u64) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(CONTENT_DIR)).await?;
        fs::create_dir_all(root.join(META_DIR)).await?;
        debug!(root = %root.display(), max_size_bytes, "opened blob store");
        Ok(Self {
            root,
            max_size_bytes,
            stats: AtomicStats::default(),
        })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Configured size bound in bytes.
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    /// Path of the blob for `key`.
    pub fn content_path(&self, key: &BlobKey) -> PathBuf {
        self.root.join(CONTENT_DIR).join(key.as_str())
    }

    /// Path of the lock marker for `key`.
    pub fn lock_path(&self, key: &BlobKey) -> PathBuf {
        self.root
            .join(CONTENT_DIR)
            .join(format!("{}{}", key.as_str(), LOCK_SUFFIX))
    }

    fn meta_path(&self, key: &BlobKey) -> PathBuf {
        self.root.join(META_DIR).join(format!("{}.json", key.as_str()))
    }

    /// Snapshot of the activity counters.
    pub fn stats(&self) -> BlobStoreStats {
        BlobStoreStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            insertions: self.stats.insertions.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
        }
    }

    /// Returns the blob path for `logical` if present, refreshing its access time.
    pub async fn lookup(&self, logical: &str) -> StoreResult<Option<PathBuf>> {
        let key = BlobKey::for_logical(logical);
        let path = self.content_path(&key);
        match fs::metadata(&path).await {
            Ok(md) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                self.touch(&key, logical, md.len()).await;
                debug!(key = %key, logical, "blob hit");
                Ok(Some(path))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, logical, "blob miss");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Reads the blob for `logical` into memory.
    pub async fn get_bytes(&self, logical: &str) -> StoreResult<Option<Vec<u8>>> {
        let Some(path) = self.lookup(logical).await? else {
            return Ok(None);
        };
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            // evicted between lookup and read
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Stores `data` under `logical`, replacing any previous blob.
    pub async fn put_bytes(&self, logical: &str, data: &[u8]) -> StoreResult<PathBuf> {
        let key = BlobKey::for_logical(logical);
        let dest = self.content_path(&key);
        let tmp = tmp_sibling(&dest);
        if let Err(e) = fs::write(&tmp, data).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        self.commit(&key, logical, &tmp, &dest, data.len() as u64)
            .await?;
        Ok(dest)
    }

    /// Copies the file at `src` into the store under `logical`.
    pub async fn put_file(&self, logical: &str, src: &Path) -> StoreResult<PathBuf> {
        let key = BlobKey::for_logical(logical);
        let dest = self.content_path(&key);
        let tmp = tmp_sibling(&dest);
        let size = match fs::copy(src, &tmp).await {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&tmp).await;
                return Err(e.into());
            }
        };
        self.commit(&key, logical, &tmp, &dest, size).await?;
        Ok(dest)
    }

    async fn commit(
        &self,
        key: &BlobKey,
        logical: &str,
        tmp: &Path,
        dest: &Path,
        size_bytes: u64,
    ) -> StoreResult<()> {
        let now = now_ms();
        let meta = EntryMeta {
            logical_key: logical.to_string(),
            size_bytes,
            inserted_at_ms: now,
            last_access_ms: now,
        };
        // metadata lands first so the blob carries access times once renamed in
        if let Err(e) = self.write_meta(key, &meta).await {
            let _ = fs::remove_file(tmp).await;
            return Err(e);
        }
        if let Err(e) = fs::rename(tmp, dest).await {
            let _ = fs::remove_file(tmp).await;
            return Err(e.into());
        }
        self.stats.insertions.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, logical, size_bytes, "stored blob");
        Ok(())
    }

    async fn write_meta(&self, key: &BlobKey, meta: &EntryMeta) -> StoreResult<()> {
        let bytes = serde_json::to_vec(meta).map_err(|e| StoreError::Serialization {
            reason: e.to_string(),
        })?;
        let path = self.meta_path(key);
        let tmp = tmp_sibling(&path);
        fs::write(&tmp, bytes).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn read_meta(&self, key: &BlobKey) -> Option<EntryMeta> {
        let bytes = fs::read(self.meta_path(key)).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    async fn touch(&self, key: &BlobKey, logical: &str, size_bytes: u64) {
        let now = now_ms();
        let meta = match self.read_meta(key).await {
            Some(mut meta) => {
                meta.last_access_ms = now;
                meta
            }
            None => EntryMeta {
                logical_key: logical.to_string(),
                size_bytes,
                inserted_at_ms: now,
                last_access_ms: now,
            },
        };
        if let Err(e) = self.write_meta(key, &meta).await {
            warn!(key = %key, error = %e, "failed to refresh blob access time");
        }
    }

    /// Removes the blob for `logical`. Returns whether a blob was present.
    pub async fn remove(&self, logical: &str) -> StoreResult<bool> {
        let key = BlobKey::for_logical(logical);
        self.remove_key(&key).await
    }

    async fn remove_key(&self, key: &BlobKey) -> StoreResult<bool> {
        let removed = match fs::remove_file(self.content_path(key)).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        match fs::remove_file(self.meta_path(key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(removed)
    }

    /// Lists every committed blob with its metadata.
    ///
    /// The content directory is authoritative: a blob whose metadata is
    /// missing or unreadable is listed with its on-disk size and modification
    /// time. Metadata without a blob belongs to a commit still in flight and is
    /// only removed once older than [`ORPHAN_META_GRACE_MS`].
    pub async fn entries(&self) -> StoreResult<Vec<(BlobKey, EntryMeta)>> {
        let mut out = Vec::new();
        let mut dir = fs::read_dir(self.root.join(CONTENT_DIR)).await?;
        while let Some(dirent) = dir.next_entry().await? {
            let name = dirent.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.contains(TMP_MARKER) || name.ends_with(LOCK_SUFFIX) {
                continue;
            }
            let md = match dirent.metadata().await {
                Ok(md) if md.is_file() => md,
                Ok(_) => continue,
                // evicted while listing
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let key = BlobKey(name.to_string());
            let meta = match self.read_meta(&key).await {
                Some(mut meta) => {
                    meta.size_bytes = md.len();
                    meta
                }
                None => {
                    let modified_ms = md
                        .modified()
                        .ok()
                        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                        .map(|d| d.as_millis() as u64)
                        .unwrap_or(0);
                    EntryMeta {
                        logical_key: key.as_str().to_string(),
                        size_bytes: md.len(),
                        inserted_at_ms: modified_ms,
                        last_access_ms: modified_ms,
                    }
                }
            };
            out.push((key, meta));
        }
        self.sweep_orphaned_meta().await;
        Ok(out)
    }

    async fn sweep_orphaned_meta(&self) {
        let Ok(mut dir) = fs::read_dir(self.root.join(META_DIR)).await else {
            return;
        };
        let cutoff = now_ms().saturating_sub(ORPHAN_META_GRACE_MS);
        while let Ok(Some(dirent)) = dir.next_entry().await {
            let name = dirent.file_name();
            let Some(hash) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if hash.contains(TMP_MARKER) {
                continue;
            }
            let key = BlobKey(hash.to_string());
            if fs::metadata(self.content_path(&key)).await.is_ok() {
                continue;
            }
            let stale = self
                .read_meta(&key)
                .await
                .map_or(true, |meta| meta.inserted_at_ms.max(meta.last_access_ms) < cutoff);
            if stale {
                debug!(key = %key, "dropping metadata without blob");
                let _ = fs::remove_file(self.meta_path(&key)).await;
            }
        }
    }

    /// Total bytes occupied by committed blobs.
    pub async fn occupied_bytes(&self) -> StoreResult<u64> {
        Ok(self
            .entries()
            .await?
            .iter()
            .map(|(_, m)| m.size_bytes)
            .sum())
    }

    /// Evicts least-recently-used blobs until the store fits its bound.
    ///
    /// Blobs with a lock marker and the `protect` key are never evicted, so a
    /// pass may leave the store above its bound.
    pub async fn evict(&self, protect: Option<&BlobKey>) -> StoreResult<EvictionReport> {
        let mut entries = self.entries().await?;
        let mut occupied: u64 = entries.iter().map(|(_, m)| m.size_bytes).sum();
        let mut report = EvictionReport {
            occupied_bytes: occupied,
            ..EvictionReport::default()
        };
        if occupied <= self.max_size_bytes {
            return Ok(report);
        }

        entries.sort_by_key(|(_, m)| (m.last_access_ms, m.inserted_at_ms));
        for (key, meta) in entries {
            if occupied <= self.max_size_bytes {
                break;
            }
            if protect == Some(&key) {
                continue;
            }
            if fs::metadata(self.lock_path(&key)).await.is_ok() {
                debug!(key = %key, "skipping locked blob during eviction");
                continue;
            }
            if self.remove_key(&key).await? {
                occupied = occupied.saturating_sub(meta.size_bytes);
                report.freed_bytes += meta.size_bytes;
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                info!(
                    key = %key,
                    logical = %meta.logical_key,
                    size_bytes = meta.size_bytes,
                    "evicted blob"
                );
                report.evicted.push(meta.logical_key);
            }
        }
        report.occupied_bytes = occupied;
        if occupied > self.max_size_bytes {
            warn!(
                occupied,
                max = self.max_size_bytes,
                "blob store still over its bound after eviction"
            );
        }
        Ok(report)
    }
}
