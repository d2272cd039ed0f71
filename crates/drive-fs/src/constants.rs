//! Names of the on-disk structures inside a drive store.

use std::path::Path;

/// Well-known names used by the store layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorePath {
    /// The `.drives` directory in the user's home
    DrivesDir,
    /// The `corestore` directory holding every keyed tree
    StoreDir,
    /// The append-only record log of a tree
    Log,
    /// Content-addressed blob directory of a tree
    Blobs,
    /// Marker present when this store created the tree (writable)
    Owner,
    /// Lock file taken by the single writer of a tree
    Lock,
}

impl StorePath {
    /// Get the string representation of the path.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DrivesDir => ".drives",
            Self::StoreDir => "corestore",
            Self::Log => "log.jsonl",
            Self::Blobs => "blobs",
            Self::Owner => "owner",
            Self::Lock => "LOCK",
        }
    }
}

impl AsRef<Path> for StorePath {
    fn as_ref(&self) -> &Path {
        Path::new(self.as_str())
    }
}

impl AsRef<str> for StorePath {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for StorePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
