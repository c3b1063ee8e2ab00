//! The archive capability and its dump-backed implementation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::ArchiveResult;
use crate::snapshot::Snapshot;
use crate::source::DumpRecordSource;

/// Something that can produce collection snapshots.
///
/// [`DumpArchive`] builds them from remote dumps; [`crate::CachedArchive`]
/// wraps any other implementation with a persistent cache.
#[async_trait]
pub trait Archive: Send + Sync {
    /// Snapshot of `collection` containing records created at or before `cutoff`.
    async fn get_collection(&self, collection: &str, cutoff: DateTime<Utc>) -> ArchiveResult<Snapshot>;

    /// Names of collections that can be requested, in availability order.
    async fn available_collections(&self) -> ArchiveResult<Vec<String>>;
}

#[async_trait]
impl<A: Archive + ?Sized> Archive for Arc<A> {
    async fn get_collection(&self, collection: &str, cutoff: DateTime<Utc>) -> ArchiveResult<Snapshot> {
        (**self).get_collection(collection, cutoff).await
    }

    async fn available_collections(&self) -> ArchiveResult<Vec<String>> {
        (**self).available_collections().await
    }
}

/// Builds snapshots by streaming a collection's dump.
pub struct DumpArchive {
    source: DumpRecordSource,
    dump_suffix: String,
    max_collection_size_bytes: Option<u64>,
}

impl DumpArchive {
    /// Creates an archive over `source`.
    ///
    /// Collections whose dump exceeds `max_collection_size_bytes` are not
    /// advertised as available.
    pub fn new(
        source: DumpRecordSource,
        dump_suffix: impl Into<String>,
        max_collection_size_bytes: Option<u64>,
    ) -> Self {
        Self {
            source,
            dump_suffix: dump_suffix.into(),
            max_collection_size_bytes,
        }
    }

    /// The underlying record source.
    pub fn source(&self) -> &DumpRecordSource {
        &self.source
    }
}

#[async_trait]
impl Archive for DumpArchive {
    async fn get_collection(&self, collection: &str, cutoff: DateTime<Utc>) -> ArchiveResult<Snapshot> {
        info!(collection, cutoff = %cutoff, "building snapshot from dump");
        let records = self.source.stream(collection).await?.try_collect().await?;
        let snapshot = Snapshot::build(collection, cutoff, records);
        info!(collection, records = snapshot.len(), "snapshot ready");
        Ok(snapshot)
    }

    async fn available_collections(&self) -> ArchiveResult<Vec<String>> {
        let mut collections = self.source.enumerate(&self.dump_suffix).await?;
        let listed = collections.len();
        if let Some(max) = self.max_collection_size_bytes {
            collections.retain(|c| c.size_bytes <= max);
        }
        collections.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes));
        debug!(
            listed,
            available = collections.len(),
            max_size_bytes = ?self.max_collection_size_bytes,
            "computed availability index"
        );
        Ok(collections.into_iter().map(|c| c.name).collect())
    }
}
