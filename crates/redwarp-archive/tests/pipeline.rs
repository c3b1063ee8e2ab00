//! End-to-end tests: directory mirror → content cache → dump decoding →
//! snapshot cache → queries.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redwarp_archive::{
    snapshot_key, ArchiveConfig, ArchiveError, CachedArchive, DumpArchive, DumpRecordSource,
    SnapshotCacheConfig, SnapshotQuery, SnapshotService, SortMode,
};
use redwarp_store::{
    ContentCache, DirectoryMirror, FetchProgress, RemoteEntry, RemoteFetcher, RemoteFile, StoreConfig,
    StoreResult,
};

struct CountingMirror {
    inner: DirectoryMirror,
    fetches: AtomicUsize,
}

#[async_trait]
impl RemoteFetcher for CountingMirror {
    fn descriptor(&self) -> &str {
        self.inner.descriptor()
    }

    async fn list_files(&self) -> StoreResult<Vec<RemoteEntry>> {
        self.inner.list_files().await
    }

    async fn fetch_file(&self, path: &str, progress: Arc<FetchProgress>) -> StoreResult<RemoteFile> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_file(path, progress).await
    }
}

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
}

fn post(id: &str, sub: &str, created: i64, score: i64) -> String {
    format!(
        r#"{{"id":"{id}","title":"post {id}","author":"ferris","selftext":"","created_utc":{created},"score":{score},"num_comments":0,"subreddit":"{sub}"}}"#
    )
}

fn write_dump(mirror: &Path, name: &str, lines: &[String]) {
    let dir = mirror.join("subreddits24");
    std::fs::create_dir_all(&dir).unwrap();
    let body = lines.join("\n");
    std::fs::write(
        dir.join(format!("{}_submissions.zst", name)),
        zstd::encode_all(body.as_bytes(), 3).unwrap(),
    )
    .unwrap();
}

struct Fixture {
    _dir: tempfile::TempDir,
    remote: Arc<CountingMirror>,
    service: SnapshotService<CachedArchive<DumpArchive>>,
}

async fn fixture(decoder_chunk: usize) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let mirror = dir.path().join("mirror");
    write_dump(
        &mirror,
        "rust",
        &[
            post("r1", "rust", 1_000, 10),
            post("leak", "golang", 1_500, 99),
            post("r2", "rust", 2_000, 30),
            post("r3", "rust", 3_000, 20),
            post("future", "rust", 9_000, 500),
        ],
    );
    write_dump(&mirror, "golang", &[post("g1", "golang", 1_000, 1)]);

    let remote = Arc::new(CountingMirror {
        inner: DirectoryMirror::new(&mirror),
        fetches: AtomicUsize::new(0),
    });
    let store = StoreConfig {
        lock_poll_interval_ms: 5,
        ..StoreConfig::with_root(dir.path().join("torrent_cache"))
    };
    let content = Arc::new(ContentCache::open(store).await.unwrap());

    let mut config = ArchiveConfig::default();
    config.decoder.chunk_size = decoder_chunk;
    let source = DumpRecordSource::new(remote.clone(), content, &config);
    let dump = DumpArchive::new(source, config.dump_suffix.clone(), config.max_collection_size_bytes);
    let cached = CachedArchive::open(
        dump,
        &SnapshotCacheConfig {
            root: dir.path().join("snapshot_cache"),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    Fixture {
        _dir: dir,
        remote,
        service: SnapshotService::new(cached),
    }
}

#[tokio::test]
async fn test_snapshot_query_end_to_end() {
    let fx = fixture(7).await;
    let snap = fx.service.snapshot("rust", at(5_000)).await.unwrap();
    assert_eq!(snap.len(), 3);

    let top = snap.query(&SnapshotQuery::default());
    let ids: Vec<&str> = top.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["r2", "r3", "r1"]);

    let window = snap.query(&SnapshotQuery {
        start: Some(at(1_500)),
        end: Some(at(3_000)),
        sort: SortMode::New,
        limit: Some(1),
        skip: 0,
    });
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].id, "r3");

    let hot = snap.hot(Some(25), 0);
    assert_eq!(hot.len(), 3);
    assert!(snap.comments("r1").unwrap().is_empty());
}

#[tokio::test]
async fn test_dump_is_fetched_once_across_cutoffs() {
    let fx = fixture(1 << 21).await;
    fx.service.snapshot("rust", at(2_500)).await.unwrap();
    fx.service.snapshot("rust", at(5_000)).await.unwrap();
    fx.service.snapshot("rust", at(5_000)).await.unwrap();
    assert_eq!(fx.remote.fetches.load(Ordering::SeqCst), 1);

    let stats = fx.service.archive().stats();
    assert_eq!(stats.snapshot_misses, 2);
    assert_eq!(stats.snapshot_hits, 1);
}

#[tokio::test]
async fn test_corrupted_snapshot_self_heals() {
    let fx = fixture(1 << 21).await;
    let original = fx.service.snapshot("rust", at(5_000)).await.unwrap();

    let cached = fx.service.archive();
    let key = snapshot_key("rust", at(5_000));
    let blob = cached.snapshot_store().lookup(&key).await.unwrap().unwrap();
    let mut bytes = std::fs::read(&blob).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xFF;
    std::fs::write(&blob, bytes).unwrap();

    let healed = fx.service.snapshot("rust", at(5_000)).await.unwrap();
    assert_eq!(healed, original);
    assert_eq!(cached.stats().corrupt_entries, 1);
}

#[tokio::test]
async fn test_unknown_collection_is_not_found() {
    let fx = fixture(1 << 21).await;
    let err = fx.service.snapshot("python", at(5_000)).await.unwrap_err();
    assert!(matches!(err, ArchiveError::NotFound { .. }));
    assert_eq!(fx.remote.fetches.load(Ordering::SeqCst), 0);

    let mut names = fx.service.available_collections().await.unwrap();
    names.sort();
    assert_eq!(names, vec!["golang", "rust"]);
}

#[tokio::test]
async fn test_concurrent_requests_fetch_once() {
    let fx = Arc::new(fixture(1 << 21).await);
    let mut handles = Vec::new();
    for i in 0..4 {
        let fx = Arc::clone(&fx);
        handles.push(tokio::spawn(async move {
            fx.service.snapshot("rust", at(5_000 + i)).await.unwrap().len()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), 3);
    }
    assert_eq!(fx.remote.fetches.load(Ordering::SeqCst), 1);
}
