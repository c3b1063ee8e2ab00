//! Versioned on-disk encoding for cached snapshots and availability indexes.
//!
//! Layout of every blob:
//!
//! | bytes | field                         |
//! |-------|-------------------------------|
//! | 4     | magic                         |
//! | 2     | format version (LE)           |
//! | 8     | payload length (LE)           |
//! | 32    | BLAKE3 hash of the payload    |
//! | n     | bincode payload               |
//!
//! Anything that does not match is reported as [`ArchiveError::CacheCorruption`].

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ArchiveError, ArchiveResult};
use crate::snapshot::Snapshot;

/// Magic of a snapshot blob: "RWSN".
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"RWSN";

/// Magic of an availability index blob: "RWCL".
pub const INDEX_MAGIC: [u8; 4] = *b"RWCL";

/// Current envelope format version.
pub const FORMAT_VERSION: u16 = 1;

const HEADER_LEN: usize = 4 + 2 + 8 + 32;

/// Cached availability index with its creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionIndex {
    /// When the index was computed.
    pub created_at: DateTime<Utc>,
    /// Collection names in availability order.
    pub collections: Vec<String>,
}

/// Encodes a snapshot into a checksummed blob.
pub fn encode_snapshot(snapshot: &Snapshot) -> ArchiveResult<Vec<u8>> {
    seal(SNAPSHOT_MAGIC, snapshot)
}

/// Decodes and validates a snapshot blob.
pub fn decode_snapshot(data: &[u8]) -> ArchiveResult<Snapshot> {
    open(SNAPSHOT_MAGIC, data)
}

/// Encodes an availability index into a checksummed blob.
pub fn encode_index(index: &CollectionIndex) -> ArchiveResult<Vec<u8>> {
    seal(INDEX_MAGIC, index)
}

/// Decodes and validates an availability index blob.
pub fn decode_index(data: &[u8]) -> ArchiveResult<CollectionIndex> {
    open(INDEX_MAGIC, data)
}

fn seal<T: Serialize>(magic: [u8; 4], value: &T) -> ArchiveResult<Vec<u8>> {
    let payload = bincode::serialize(value).map_err(|e| ArchiveError::CacheCorruption {
        reason: format!("failed to serialize: {}", e),
    })?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&magic);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(blake3::hash(&payload).as_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

fn open<T: DeserializeOwned>(magic: [u8; 4], data: &[u8]) -> ArchiveResult<T> {
    if data.len() < HEADER_LEN {
        return Err(ArchiveError::corruption(format!(
            "blob of {} bytes is shorter than the {} byte header",
            data.len(),
            HEADER_LEN
        )));
    }
    let (header, payload) = data.split_at(HEADER_LEN);

    if header[..4] != magic {
        warn!(expected = ?magic, actual = ?&header[..4], "invalid cache blob magic");
        return Err(ArchiveError::corruption("invalid magic"));
    }

    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != FORMAT_VERSION {
        return Err(ArchiveError::corruption(format!(
            "unsupported format version {} (expected {})",
            version, FORMAT_VERSION
        )));
    }

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&header[6..14]);
    let declared = u64::from_le_bytes(len_bytes);
    if declared != payload.len() as u64 {
        return Err(ArchiveError::corruption(format!(
            "payload length mismatch: header says {}, found {}",
            declared,
            payload.len()
        )));
    }

    if blake3::hash(payload).as_bytes()[..] != header[14..HEADER_LEN] {
        return Err(ArchiveError::corruption("checksum mismatch"));
    }

    bincode::deserialize(payload).map_err(ArchiveError::corruption)
}
