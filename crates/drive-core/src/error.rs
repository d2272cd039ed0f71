//! Error types for drive-core

use std::path::PathBuf;

/// Result type for drive-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in drive-core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A drive identifier looked like a key but could not be decoded
    #[error("Invalid drive identifier {identifier:?}: {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    /// A checkout version was not a positive integer or is out of range
    #[error("Invalid version {value:?}: {reason}")]
    InvalidVersion { value: String, reason: String },

    /// A user-supplied filter pattern could not be compiled
    #[error("Invalid filter pattern {pattern:?}: {reason}")]
    InvalidFilterList { pattern: String, reason: String },

    /// An entry lookup did not complete within its bound
    #[error("Entry lookup timed out after {timeout_ms} ms: {key}")]
    EntryLookupTimeout { key: String, timeout_ms: u64 },

    /// The handle was closed while the operation was in flight
    #[error("Session closed")]
    SessionClosed,

    /// The request was cancelled by shutdown
    #[error("Request cancelled")]
    RequestCancelled,

    /// A required storage location is missing or unreadable
    #[error("Storage unavailable at {path}: {reason}")]
    StorageUnavailable { path: PathBuf, reason: String },

    /// Write attempted against a read-only tree or checkout
    #[error("Drive is read-only: {drive}")]
    ReadOnly { drive: String },

    /// Checkout requested on a tree without history
    #[error("Drive {drive} is not versioned")]
    NotVersioned { drive: String },

    /// Operation not supported on this platform or backend
    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },

    /// A stored record could not be interpreted
    #[error("Corrupt record in {path}: {message}")]
    CorruptRecord { path: PathBuf, message: String },

    // Transparent wrappers for underlying crate errors
    /// Filesystem error from drive-fs
    #[error(transparent)]
    Fs(#[from] drive_fs::Error),

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Filesystem watcher error
    #[error(transparent)]
    Watch(#[from] notify::Error),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Fs(drive_fs::Error::io(path, source))
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Input validation failures, raised before any work begins.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidIdentifier { .. } | Self::InvalidVersion { .. } | Self::InvalidFilterList { .. }
        )
    }

    /// Errors expected while a session is being shut down.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::SessionClosed | Self::RequestCancelled)
    }

    /// Errors meaning a handle itself is unusable; the whole pass stops.
    ///
    /// Everything else is scoped to a single key.
    pub fn aborts_pass(&self) -> bool {
        matches!(
            self,
            Self::SessionClosed
                | Self::RequestCancelled
                | Self::StorageUnavailable { .. }
                | Self::ReadOnly { .. }
                | Self::NotVersioned { .. }
                | Self::CorruptRecord { .. }
        )
    }
}
