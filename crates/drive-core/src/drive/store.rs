//! Shared backing store for keyed trees

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use drive_fs::StorePath;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::keyed::Tree;
use super::{Drive, DriveId, DriveKey, KeyedDrive, LocalDrive, ZBASE32_KEY_LEN};
use crate::{Error, Result};

/// Directory holding every keyed tree, one subdirectory per key.
///
/// Handles opened through the same store share one in-memory tree per key,
/// so writes through one handle are seen by every other.
#[derive(Debug)]
pub struct DriveStore {
    root: PathBuf,
    trees: Mutex<HashMap<DriveKey, Weak<Tree>>>,
}

impl DriveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            trees: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    fn tree_dir(&self, key: &DriveKey) -> PathBuf {
        self.root.join(key.encode())
    }

    /// Resolve a user-supplied identifier to a drive handle.
    ///
    /// Paths become local drives, keys open trees in this store and an
    /// absent identifier creates a new writable tree.
    pub async fn resolve(&self, identifier: Option<&str>) -> Result<Drive> {
        match DriveId::classify(identifier) {
            DriveId::Path(path) => {
                let root = absolute(&path);
                debug!(root = %root.display(), "Resolved local drive");
                Ok(Drive::Local(LocalDrive::new(root)))
            }
            DriveId::Key(encoded) => {
                let key = DriveKey::decode(&encoded)?;
                Ok(Drive::Keyed(self.open(&key).await?))
            }
            DriveId::New => Ok(Drive::Keyed(self.create().await?)),
        }
    }

    /// Create a new writable tree.
    pub async fn create(&self) -> Result<KeyedDrive> {
        let key = DriveKey::generate();
        let dir = self.tree_dir(&key);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::io(&dir, e))?;
        drive_fs::io::write_atomic(&dir.join(StorePath::Owner), key.to_hex().as_bytes())?;
        info!(key = %key, "Created drive");
        self.open(&key).await
    }

    /// Open the tree for `key`. Unknown keys open as empty read-only trees.
    pub async fn open(&self, key: &DriveKey) -> Result<KeyedDrive> {
        let mut trees = self.trees.lock().await;
        if let Some(tree) = trees.get(key).and_then(Weak::upgrade) {
            return Ok(KeyedDrive::live(tree));
        }
        let tree = Arc::new(Tree::load(*key, self.tree_dir(key)).await?);
        trees.retain(|_, weak| weak.strong_count() > 0);
        trees.insert(*key, Arc::downgrade(&tree));
        Ok(KeyedDrive::live(tree))
    }

    /// Keys of every tree present on disk, sorted.
    pub async fn list_keys(&self) -> Result<Vec<DriveKey>> {
        let mut reader = match tokio::fs::read_dir(&self.root).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(&self.root, e)),
        };
        let mut keys = Vec::new();
        while let Some(child) = reader
            .next_entry()
            .await
            .map_err(|e| Error::io(&self.root, e))?
        {
            let name = child.file_name().to_string_lossy().into_owned();
            if name.len() != ZBASE32_KEY_LEN {
                continue;
            }
            if let Ok(key) = DriveKey::decode(&name) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Delete the local storage of a tree. Returns false if it was absent.
    pub async fn purge(&self, key: &DriveKey) -> Result<bool> {
        let dir = self.tree_dir(key);
        self.trees.lock().await.remove(key);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(key = %key, "Purged drive");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io(&dir, e)),
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    dunce::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Storage directory: `explicit` if given, else `~/.drives/corestore`.
pub fn storage_location(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(absolute(path));
    }
    let home = dirs::home_dir().ok_or_else(|| {
        Error::storage(
            PathBuf::from("~"),
            "no home directory to place the default storage in",
        )
    })?;
    Ok(home.join(StorePath::DrivesDir).join(StorePath::StoreDir))
}

/// Where keyed drives will be read from, reported before opening them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageNotice {
    Existing(PathBuf),
    New(PathBuf),
}

impl std::fmt::Display for StorageNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Existing(dir) => write!(f, "Storage: {}", dir.display()),
            Self::New(dir) => write!(f, "Notice: new storage at {}", dir.display()),
        }
    }
}

/// Notice for `root`.
///
/// With identifiers, the notice is only given when one of them resolves to a
/// keyed drive. Commands that always use the store pass none.
pub fn storage_notice(root: &Path, identifiers: &[Option<&str>]) -> Option<StorageNotice> {
    let uses_store = identifiers.is_empty()
        || identifiers
            .iter()
            .any(|id| DriveId::classify(*id).is_key());
    if !uses_store {
        return None;
    }
    Some(if root.is_dir() {
        StorageNotice::Existing(root.to_path_buf())
    } else {
        StorageNotice::New(root.to_path_buf())
    })
}
