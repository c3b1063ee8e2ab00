#![warn(missing_docs)]

//! redwarp storage subsystem: durable content cache for remote dump files
//!
//! Fetch path: logical key → SHA-256 → hit? return path
//!             miss → per-key gate → lock marker → re-check → remote fetch → write-then-rename → evict

pub mod blob_store;
pub mod config;
pub mod content_cache;
pub mod error;
pub mod lock;
pub mod mirror;
pub mod progress;
pub mod remote;

pub use blob_store::{
    sha256_hex, BlobKey, BlobStore, BlobStoreStats, EntryMeta, EvictionReport, LOCK_SUFFIX,
    ORPHAN_META_GRACE_MS,
};
pub use config::StoreConfig;
pub use content_cache::{logical_key, CachedFile, ContentCache, ContentCacheStats};
pub use error::{StoreError, StoreResult};
pub use lock::{LockMarker, LockOptions};
pub use mirror::DirectoryMirror;
pub use progress::{FetchProgress, ProgressObserver};
pub use remote::{RemoteEntry, RemoteFetcher, RemoteFile};
