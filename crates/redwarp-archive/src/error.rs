//! Error types for the redwarp archive subsystem

use redwarp_store::StoreError;

/// Result type alias for archive operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// All errors that can occur while reading dumps or serving snapshots
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Content cache or remote capability failure; remote errors pass through unchanged
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A dump line is not a valid record; the whole collection stream is aborted
    #[error("Record parse error on line {line_number}: {reason}")]
    RecordParse {
        /// One-based line number within the decompressed dump.
        line_number: u64,
        /// Parser message.
        reason: String,
    },
    /// Undecodable bytes grew past the decode window; the stream is corrupt
    #[error("Unable to decode text after {bytes} bytes (window {max_window})")]
    DecodeWindowExceeded {
        /// Bytes accumulated without a successful decode.
        bytes: usize,
        /// Configured window.
        max_window: usize,
    },
    /// The stream ended in the middle of an undecodable byte run
    #[error("Invalid UTF-8 at end of stream (offset {offset})")]
    InvalidUtf8 {
        /// Offset of the first undecodable byte.
        offset: u64,
    },
    /// The compressed stream could not be read
    #[error("Decompression failed: {0}")]
    Decompression(String),
    /// The background decoder task stopped abnormally
    #[error("Decoder task failed: {reason}")]
    DecoderTask {
        /// Join error description.
        reason: String,
    },
    /// A cached blob could not be interpreted
    #[error("Cache corruption: {reason}")]
    CacheCorruption {
        /// What failed to validate.
        reason: String,
    },
    /// The collection is not in the availability index
    #[error("Collection {collection} not found")]
    NotFound {
        /// Requested collection name.
        collection: String,
    },
    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    pub(crate) fn corruption(reason: impl std::fmt::Display) -> Self {
        ArchiveError::CacheCorruption {
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_passes_through() {
        let err: ArchiveError = StoreError::remote("x.zst", "no peers").into();
        assert_eq!(format!("{}", err), "Remote unavailable for x.zst: no peers");
    }

    #[test]
    fn test_not_found_display() {
        let err = ArchiveError::NotFound {
            collection: "rust".to_string(),
        };
        assert_eq!(format!("{}", err), "Collection rust not found");
    }

    #[test]
    fn test_window_display() {
        let err = ArchiveError::DecodeWindowExceeded {
            bytes: 2048,
            max_window: 1024,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("2048"));
        assert!(msg.contains("1024"));
    }
}
