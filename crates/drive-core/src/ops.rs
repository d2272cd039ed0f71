//! Single-drive utility operations
//!
//! Every operation that targets one key checks it against the default
//! exclusions first and does nothing for control paths.

use std::time::Duration;

use drive_fs::KeyPath;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::DEFAULT_ENTRY_TIMEOUT;
use crate::drive::{Drive, DriveKey, DriveOps, DriveStore, EntryOptions, WriteOptions};
use crate::entry::Entry;
use crate::filter::{Filter, is_excluded_by_default};
use crate::report::format_bytes;
use crate::Result;

/// What a listed name is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntryKind {
    File { size: u64 },
    Executable { size: u64 },
    Symlink { target: String, dangling: bool },
    Directory,
}

/// One name of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListedEntry {
    pub name: String,
    #[serde(flatten)]
    pub kind: EntryKind,
}

impl std::fmt::Display for ListedEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            EntryKind::File { size } => write!(f, "{} ({})", self.name, size_text(*size)),
            EntryKind::Executable { size } => write!(f, "{}* ({})", self.name, size_text(*size)),
            EntryKind::Symlink { target, dangling } => {
                write!(f, "{} -> {}", self.name, target)?;
                if *dangling {
                    f.write_str(" (dangling)")?;
                }
                Ok(())
            }
            EntryKind::Directory => write!(f, "{}/", self.name),
        }
    }
}

fn size_text(size: u64) -> String {
    format_bytes(i64::try_from(size).unwrap_or(i64::MAX))
}

/// Summary of one drive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriveInfo {
    /// Encoded key, or the root path of a local drive
    pub id: String,
    pub version: u64,
    pub writable: bool,
    pub entries: usize,
    pub blob_bytes: u64,
}

fn lookup(timeout: Option<Duration>) -> EntryOptions {
    EntryOptions::with_timeout(timeout.unwrap_or(DEFAULT_ENTRY_TIMEOUT))
}

/// Create a new writable tree and return its key.
pub async fn touch(store: &DriveStore) -> Result<DriveKey> {
    let drive = store.create().await?;
    Ok(drive.key())
}

/// Names directly below `dir`, in order, with their kinds.
pub async fn ls(drive: &Drive, dir: &KeyPath) -> Result<Vec<ListedEntry>> {
    if is_excluded_by_default(dir) {
        return Ok(Vec::new());
    }
    let mut listed = Vec::new();
    for name in drive.readdir(dir).await? {
        let key = dir.join(&name);
        if is_excluded_by_default(&key) {
            continue;
        }
        let kind = match drive.entry(&key, lookup(None)).await? {
            None => EntryKind::Directory,
            Some(entry) => kind_of(drive, &key, entry).await?,
        };
        listed.push(ListedEntry { name, kind });
    }
    Ok(listed)
}

async fn kind_of(drive: &Drive, key: &KeyPath, entry: Entry) -> Result<EntryKind> {
    if let Some(target) = entry.linkname {
        let resolved = resolve_link(key, &target);
        let dangling = drive.entry(&resolved, lookup(None)).await?.is_none()
            && drive.readdir(&resolved).await?.is_empty();
        return Ok(EntryKind::Symlink { target, dangling });
    }
    let size = entry.blob.as_ref().map_or(0, |blob| blob.byte_length);
    Ok(if entry.executable {
        EntryKind::Executable { size }
    } else {
        EntryKind::File { size }
    })
}

/// Key a symlink at `key` points to.
fn resolve_link(key: &KeyPath, target: &str) -> KeyPath {
    if target.starts_with('/') {
        return KeyPath::new(target);
    }
    key.parent().unwrap_or_else(KeyPath::root).join(target)
}

/// Look up one entry, bounded by `timeout` (default 15 s).
pub async fn entry(drive: &Drive, key: &KeyPath, timeout: Option<Duration>) -> Result<Option<Entry>> {
    if is_excluded_by_default(key) {
        return Ok(None);
    }
    drive.entry(key, lookup(timeout)).await
}

/// Content of `key`, `None` if there is no such file.
pub async fn get(drive: &Drive, key: &KeyPath) -> Result<Option<Vec<u8>>> {
    let Some(found) = entry(drive, key, None).await? else {
        return Ok(None);
    };
    if found.is_symlink() {
        return Ok(None);
    }
    let mut reader = drive.read(&found).await?;
    Ok(Some(reader.read_to_end().await?))
}

/// Write `content` to `key`. Returns `None` for excluded keys.
pub async fn put(drive: &Drive, key: &KeyPath, content: &[u8], options: WriteOptions) -> Result<Option<Entry>> {
    if is_excluded_by_default(key) {
        debug!(key = %key, "Refusing to write a control path");
        return Ok(None);
    }
    drive.put(key, content, options).await.map(Some)
}

/// Delete `key`, or with `recursive` every key at or below it.
///
/// Returns the number of deleted entries.
pub async fn rm(drive: &Drive, key: &KeyPath, recursive: bool) -> Result<usize> {
    if is_excluded_by_default(key) {
        return Ok(0);
    }
    let targets: Vec<KeyPath> = if recursive {
        drive
            .list(key, &Filter::default())
            .await?
            .into_iter()
            .map(|entry| KeyPath::new(&entry.key))
            .collect()
    } else {
        match drive.entry(key, lookup(None)).await? {
            Some(_) => vec![key.clone()],
            None => Vec::new(),
        }
    };
    for target in &targets {
        drive.del(target).await?;
    }
    debug!(key = %key, deleted = targets.len(), "Removed entries");
    Ok(targets.len())
}

/// Key, version, size and writability of `drive`.
pub async fn info(drive: &Drive) -> Result<DriveInfo> {
    let entries = drive.list(&KeyPath::root(), &Filter::default()).await?;
    let blob_bytes = match drive {
        Drive::Keyed(keyed) => keyed.blob_bytes(),
        Drive::Local(_) => entries.iter().map(Entry::blob_length).sum(),
    };
    Ok(DriveInfo {
        id: drive.label(),
        version: drive.version(),
        writable: drive.writable(),
        entries: entries.len(),
        blob_bytes,
    })
}

/// Keys of every tree in `store`.
pub async fn list(store: &DriveStore) -> Result<Vec<DriveKey>> {
    store.list_keys().await
}

/// Delete the local storage of `key`. Returns false if there was none.
pub async fn purge(store: &DriveStore, key: &DriveKey) -> Result<bool> {
    let purged = store.purge(key).await?;
    if !purged {
        info!(key = %key, "Nothing to purge");
    }
    Ok(purged)
}
