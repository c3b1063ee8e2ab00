//! Error types for the redwarp content store.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error variants for content store and remote fetch operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Wraps standard I/O errors from the cache directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote transfer capability failed (network, timeout, missing swarm).
    #[error("Remote unavailable for {path}: {reason}")]
    RemoteUnavailable {
        /// Remote path that was being listed or fetched.
        path: String,
        /// Description of the failure.
        reason: String,
    },

    /// The remote capability does not know the requested file.
    #[error("Remote file not found: {path}")]
    RemoteFileMissing {
        /// Remote path that was requested.
        path: String,
    },

    /// Entry metadata could not be encoded or decoded.
    #[error("Serialization error: {reason}")]
    Serialization {
        /// Description of the error.
        reason: String,
    },

    /// A remote path tried to escape its swarm root.
    #[error("Invalid remote path: {path}")]
    InvalidPath {
        /// The rejected path.
        path: String,
    },
}

impl StoreError {
    /// Builds a [`StoreError::RemoteUnavailable`] from any displayable cause.
    pub fn remote(path: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        StoreError::RemoteUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true when the failure originated in the remote capability.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            StoreError::RemoteUnavailable { .. } | StoreError::RemoteFileMissing { .. }
        )
    }
}
