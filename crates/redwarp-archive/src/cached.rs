//! Read-through snapshot cache layered over any [`Archive`].
//!
//! Snapshots are keyed by a SHA-256 of `"{collection}:{cutoff}"` and stored
//! in a size-bounded [`BlobStore`]; the availability index lives in a second
//! store with a time-to-live. Entries that fail to decode are removed and
//! rebuilt, and failures to persist are logged without affecting the result.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redwarp_store::{sha256_hex, BlobKey, BlobStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::archive::Archive;
use crate::codec::{decode_index, decode_snapshot, encode_index, encode_snapshot, CollectionIndex};
use crate::config::SnapshotCacheConfig;
use crate::error::{ArchiveError, ArchiveResult};
use crate::snapshot::Snapshot;

const INDEX_KEY: &str = "available_collections";

/// Cache key for a (collection, cutoff) pair.
pub fn snapshot_key(collection: &str, cutoff: DateTime<Utc>) -> String {
    sha256_hex(format!("{}:{}", collection, cutoff.to_rfc3339()).as_bytes())
}

/// Counters for [`CachedArchive`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedArchiveStats {
    /// Snapshots served from the cache.
    pub snapshot_hits: u64,
    /// Snapshots built by the inner archive.
    pub snapshot_misses: u64,
    /// Availability index served from the cache.
    pub index_hits: u64,
    /// Availability index computed by the inner archive.
    pub index_misses: u64,
    /// Cached entries discarded because they failed validation.
    pub corrupt_entries: u64,
    /// Results that could not be persisted.
    pub store_failures: u64,
}

#[derive(Default)]
struct Counters {
    snapshot_hits: AtomicU64,
    snapshot_misses: AtomicU64,
    index_hits: AtomicU64,
    index_misses: AtomicU64,
    corrupt_entries: AtomicU64,
    store_failures: AtomicU64,
}

/// Caching decorator for an [`Archive`].
pub struct CachedArchive<A> {
    inner: A,
    snapshots: BlobStore,
    index: BlobStore,
    list_ttl: Duration,
    counters: Counters,
}

impl<A: Archive> CachedArchive<A> {
    /// Opens the cache directories under `config.root` and wraps `inner`.
    pub async fn open(inner: A, config: &SnapshotCacheConfig) -> ArchiveResult<Self> {
        let snapshots = BlobStore::open(config.root.join("content"), config.max_size_bytes).await?;
        let index = BlobStore::open(config.root.join("list"), config.max_size_bytes).await?;
        info!(
            root = %config.root.display(),
            max_size_bytes = config.max_size_bytes,
            list_ttl_secs = config.list_ttl_secs,
            "opened snapshot cache"
        );
        Ok(Self {
            inner,
            snapshots,
            index,
            list_ttl: config.list_ttl(),
            counters: Counters::default(),
        })
    }

    /// The wrapped archive.
    pub fn inner(&self) -> &A {
        &self.inner
    }

    /// Store holding encoded snapshots.
    pub fn snapshot_store(&self) -> &BlobStore {
        &self.snapshots
    }

    /// Store holding the availability index.
    pub fn index_store(&self) -> &BlobStore {
        &self.index
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CachedArchiveStats {
        let c = &self.counters;
        CachedArchiveStats {
            snapshot_hits: c.snapshot_hits.load(Ordering::Relaxed),
            snapshot_misses: c.snapshot_misses.load(Ordering::Relaxed),
            index_hits: c.index_hits.load(Ordering::Relaxed),
            index_misses: c.index_misses.load(Ordering::Relaxed),
            corrupt_entries: c.corrupt_entries.load(Ordering::Relaxed),
            store_failures: c.store_failures.load(Ordering::Relaxed),
        }
    }

    async fn cached_snapshot(
        &self,
        key: &str,
        collection: &str,
        cutoff: DateTime<Utc>,
    ) -> Option<Snapshot> {
        let bytes = match self.snapshots.get_bytes(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "failed to read cached snapshot, rebuilding");
                return None;
            }
        };
        let decoded = decode_snapshot(&bytes).and_then(|snapshot| {
            if snapshot.collection() == collection && snapshot.cutoff() == cutoff {
                Ok(snapshot)
            } else {
                Err(ArchiveError::CacheCorruption {
                    reason: format!(
                        "entry holds {} at {}",
                        snapshot.collection(),
                        snapshot.cutoff()
                    ),
                })
            }
        });
        match decoded {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                self.discard(&self.snapshots, key, &e).await;
                None
            }
        }
    }

    async fn cached_index(&self) -> Option<Vec<String>> {
        let bytes = match self.index.get_bytes(INDEX_KEY).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "failed to read cached availability index");
                return None;
            }
        };
        match decode_index(&bytes) {
            Ok(index) => {
                let fresh = Utc::now()
                    .signed_duration_since(index.created_at)
                    .to_std()
                    .map(|age| age < self.list_ttl)
                    .unwrap_or(false);
                if fresh {
                    Some(index.collections)
                } else {
                    debug!(created_at = %index.created_at, "availability index expired");
                    None
                }
            }
            Err(e) => {
                self.discard(&self.index, INDEX_KEY, &e).await;
                None
            }
        }
    }

    async fn discard(&self, store: &BlobStore, key: &str, cause: &ArchiveError) {
        self.counters.corrupt_entries.fetch_add(1, Ordering::Relaxed);
        warn!(key, error = %cause, "removing corrupted cache entry");
        if let Err(e) = store.remove(key).await {
            warn!(key, error = %e, "failed to remove corrupted cache entry");
        }
    }

    async fn persist(&self, store: &BlobStore, key: &str, encoded: ArchiveResult<Vec<u8>>) {
        let stored = match encoded {
            Ok(bytes) => store.put_bytes(key, &bytes).await.map_err(ArchiveError::from),
            Err(e) => Err(e),
        };
        match stored {
            Ok(_) => {
                debug!(key, "cached entry");
                if let Err(e) = store.evict(Some(&BlobKey::for_logical(key))).await {
                    warn!(key, error = %e, "cache eviction failed");
                }
            }
            Err(e) => {
                self.counters.store_failures.fetch_add(1, Ordering::Relaxed);
                warn!(key, error = %e, "failed to cache entry");
            }
        }
    }
}

#[async_trait]
impl<A: Archive> Archive for CachedArchive<A> {
    async fn get_collection(&self, collection: &str, cutoff: DateTime<Utc>) -> ArchiveResult<Snapshot> {
        let key = snapshot_key(collection, cutoff);
        if let Some(snapshot) = self.cached_snapshot(&key, collection, cutoff).await {
            self.counters.snapshot_hits.fetch_add(1, Ordering::Relaxed);
            debug!(collection, cutoff = %cutoff, key = %key, "snapshot cache hit");
            return Ok(snapshot);
        }

        self.counters.snapshot_misses.fetch_add(1, Ordering::Relaxed);
        debug!(collection, cutoff = %cutoff, key = %key, "snapshot cache miss");
        let snapshot = self.inner.get_collection(collection, cutoff).await?;
        self.persist(&self.snapshots, &key, encode_snapshot(&snapshot))
            .await;
        Ok(snapshot)
    }

    async fn available_collections(&self) -> ArchiveResult<Vec<String>> {
        if let Some(collections) = self.cached_index().await {
            self.counters.index_hits.fetch_add(1, Ordering::Relaxed);
            debug!(count = collections.len(), "availability index cache hit");
            return Ok(collections);
        }

        self.counters.index_misses.fetch_add(1, Ordering::Relaxed);
        let collections = self.inner.available_collections().await?;
        let index = CollectionIndex {
            created_at: Utc::now(),
            collections,
        };
        self.persist(&self.index, INDEX_KEY, encode_index(&index)).await;
        Ok(index.collections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[derive(Default)]
    struct CountingArchive {
        builds: AtomicUsize,
        listings: AtomicUsize,
        fail: bool,
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
    }

    #[async_trait]
    impl Archive for CountingArchive {
        async fn get_collection(&self, collection: &str, cutoff: DateTime<Utc>) -> ArchiveResult<Snapshot> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ArchiveError::Store(redwarp_store::StoreError::remote(
                    collection, "offline",
                )));
            }
            let record = Record {
                id: format!("{}-1", collection),
                title: "t".to_string(),
                author: "a".to_string(),
                selftext: None,
                created_utc: at(10),
                score: 1,
                ups: None,
                downs: None,
                num_comments: None,
                media_url: None,
            };
            Ok(Snapshot::build(collection, cutoff, vec![record]))
        }

        async fn available_collections(&self) -> ArchiveResult<Vec<String>> {
            self.listings.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["rust".to_string(), "golang".to_string()])
        }
    }

    async fn cached(ttl_secs: u64, fail: bool) -> (tempfile::TempDir, Arc<CountingArchive>, CachedArchive<Arc<CountingArchive>>) {
        let dir = tempfile::tempdir().unwrap();
        let inner = Arc::new(CountingArchive {
            fail,
            ..Default::default()
        });
        let config = SnapshotCacheConfig {
            root: dir.path().to_path_buf(),
            list_ttl_secs: ttl_secs,
            ..Default::default()
        };
        let cache = CachedArchive::open(Arc::clone(&inner), &config).await.unwrap();
        (dir, inner, cache)
    }

    #[tokio::test]
    async fn test_snapshot_is_built_once() {
        let (_dir, inner, cache) = cached(3600, false).await;
        let first = cache.get_collection("rust", at(100)).await.unwrap();
        let second = cache.get_collection("rust", at(100)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(inner.builds.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().snapshot_hits, 1);

        cache.get_collection("rust", at(101)).await.unwrap();
        assert_eq!(inner.builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_corrupted_snapshot_is_rebuilt() {
        let (_dir, inner, cache) = cached(3600, false).await;
        let original = cache.get_collection("rust", at(100)).await.unwrap();

        let key = snapshot_key("rust", at(100));
        cache.snapshot_store().put_bytes(&key, b"garbage").await.unwrap();

        let rebuilt = cache.get_collection("rust", at(100)).await.unwrap();
        assert_eq!(rebuilt, original);
        assert_eq!(inner.builds.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().corrupt_entries, 1);

        // the rebuilt entry was persisted again
        cache.get_collection("rust", at(100)).await.unwrap();
        assert_eq!(inner.builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_entry_for_other_key_is_rejected() {
        let (_dir, inner, cache) = cached(3600, false).await;
        let other = cache.get_collection("golang", at(100)).await.unwrap();
        let key = snapshot_key("rust", at(100));
        cache
            .snapshot_store()
            .put_bytes(&key, &encode_snapshot(&other).unwrap())
            .await
            .unwrap();

        let snap = cache.get_collection("rust", at(100)).await.unwrap();
        assert_eq!(snap.collection(), "rust");
        assert_eq!(inner.builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_inner_failure_is_not_cached() {
        let (_dir, inner, cache) = cached(3600, true).await;
        assert!(cache.get_collection("rust", at(100)).await.is_err());
        assert!(cache.get_collection("rust", at(100)).await.is_err());
        assert_eq!(inner.builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_index_is_cached_within_ttl() {
        let (_dir, inner, cache) = cached(3600, false).await;
        assert_eq!(cache.available_collections().await.unwrap(), vec!["rust", "golang"]);
        assert_eq!(cache.available_collections().await.unwrap(), vec!["rust", "golang"]);
        assert_eq!(inner.listings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_index_expires() {
        let (_dir, inner, cache) = cached(0, false).await;
        cache.available_collections().await.unwrap();
        cache.available_collections().await.unwrap();
        assert_eq!(inner.listings.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_corrupted_index_is_rebuilt() {
        let (_dir, inner, cache) = cached(3600, false).await;
        cache.available_collections().await.unwrap();
        cache.index_store().put_bytes(INDEX_KEY, b"RWCL").await.unwrap();
        assert_eq!(cache.available_collections().await.unwrap(), vec!["rust", "golang"]);
        assert_eq!(inner.listings.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().corrupt_entries, 1);
    }

    #[test]
    fn test_snapshot_key_is_stable() {
        let a = snapshot_key("rust", at(100));
        assert_eq!(a, snapshot_key("rust", at(100)));
        assert_ne!(a, snapshot_key("rust", at(101)));
        assert_ne!(a, snapshot_key("rusty", at(100)));
        assert_eq!(a.len(), 64);
    }
}
