//! Availability-checked query surface over an [`Archive`].

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::archive::Archive;
use crate::error::{ArchiveError, ArchiveResult};
use crate::snapshot::Snapshot;

/// Entry point used by front ends.
///
/// Requests for collections missing from the availability index fail with
/// [`ArchiveError::NotFound`] before any dump is touched.
pub struct SnapshotService<A> {
    archive: A,
}

impl<A: Archive> SnapshotService<A> {
    /// Wraps `archive`.
    pub fn new(archive: A) -> Self {
        Self { archive }
    }

    /// The wrapped archive.
    pub fn archive(&self) -> &A {
        &self.archive
    }

    /// Names of all requestable collections.
    pub async fn available_collections(&self) -> ArchiveResult<Vec<String>> {
        self.archive.available_collections().await
    }

    /// Snapshot of `collection` as of `cutoff`.
    pub async fn snapshot(&self, collection: &str, cutoff: DateTime<Utc>) -> ArchiveResult<Snapshot> {
        let available = self.archive.available_collections().await?;
        if !available.iter().any(|name| name == collection) {
            warn!(collection, "requested collection is not available");
            return Err(ArchiveError::NotFound {
                collection: collection.to_string(),
            });
        }
        info!(collection, cutoff = %cutoff, "fetching snapshot");
        self.archive.get_collection(collection, cutoff).await
    }
}
