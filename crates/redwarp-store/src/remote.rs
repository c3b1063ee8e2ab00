//! The remote file-transfer capability consumed by the content cache.
//!
//! The peer-to-peer protocol itself lives outside this crate. A fetcher is
//! bound to one swarm descriptor and can enumerate and materialize its files.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::progress::FetchProgress;

/// A file advertised by a swarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Path relative to the swarm root, `/`-separated.
    pub path: String,
    /// File length in bytes.
    pub size_bytes: u64,
}

/// A file materialized locally by a fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Local path of the materialized file.
    pub path: PathBuf,
    /// True when the caller takes ownership and should delete the file once copied.
    pub owned: bool,
}

/// Capability for listing and fetching files of one swarm.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// Opaque identifier of the swarm this fetcher is bound to.
    fn descriptor(&self) -> &str;

    /// Enumerates member files with their sizes.
    async fn list_files(&self) -> StoreResult<Vec<RemoteEntry>>;

    /// Materializes `path` locally, reporting transfer progress into `progress`.
    async fn fetch_file(&self, path: &str, progress: Arc<FetchProgress>) -> StoreResult<RemoteFile>;
}
