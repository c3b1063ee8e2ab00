#![warn(missing_docs)]

//! redwarp archive subsystem: point-in-time snapshots of archived collections
//!
//! Query path: SnapshotService → CachedArchive (hit? decode) → DumpArchive
//!             → DumpRecordSource → ContentCache → ChunkedLineReader → Snapshot::build

pub mod archive;
pub mod cached;
pub mod codec;
pub mod config;
pub mod decoder;
pub mod error;
pub mod record;
pub mod service;
pub mod snapshot;
pub mod source;

pub use archive::{Archive, DumpArchive};
pub use cached::{snapshot_key, CachedArchive, CachedArchiveStats};
pub use codec::{decode_index, decode_snapshot, encode_index, encode_snapshot, CollectionIndex, FORMAT_VERSION};
pub use config::{ArchiveConfig, SnapshotCacheConfig};
pub use decoder::{open_zstd, zstd_lines, ChunkedLineReader, DecodedLine, DecoderConfig};
pub use error::{ArchiveError, ArchiveResult};
pub use record::{parse_collection_line, parse_dump_line, Comment, DumpRecord, Record};
pub use service::SnapshotService;
pub use snapshot::{hot_score, Snapshot, SnapshotQuery, SortMode, HOT_DECAY_SECS, HOT_EPOCH_SECS};
pub use source::{CollectionDescriptor, DumpRecordSource, RecordStream};
