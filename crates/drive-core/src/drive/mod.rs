//! Drive handles
//!
//! A drive is a key-addressed tree of entries backed either by a local
//! directory ([`LocalDrive`]) or by a versioned tree inside a [`DriveStore`]
//! ([`KeyedDrive`]). Both implement [`DriveOps`]; [`Drive`] is the tagged
//! variant the engine passes around.

mod blob;
mod id;
mod keyed;
mod local;
mod store;

pub use blob::{BlobReader, BlobWriter, CHUNK_SIZE, copy_entry};
pub use id::{DriveId, DriveKey, HEX_KEY_LEN, ZBASE32_KEY_LEN, is_key_like};
pub use keyed::KeyedDrive;
pub use local::LocalDrive;
pub use store::{DriveStore, StorageNotice, storage_location, storage_notice};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use drive_fs::KeyPath;

use crate::entry::Entry;
use crate::filter::Filter;
use crate::{Error, Result};

/// Options for a single entry lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntryOptions {
    /// Upper bound on the lookup; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl EntryOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Attributes carried by a newly written blob.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub executable: bool,
    pub metadata: Option<BTreeMap<String, String>>,
}

impl WriteOptions {
    /// Attributes copied from an existing entry.
    pub fn from_entry(entry: &Entry) -> Self {
        Self {
            executable: entry.executable,
            metadata: entry.metadata.clone(),
        }
    }
}

/// Shared closed flag of a handle.
///
/// Clones of a handle share the flag, so releasing any clone aborts reads and
/// writes started through the others.
#[derive(Debug, Clone, Default)]
pub struct CloseFlag(Arc<AtomicBool>);

impl CloseFlag {
    pub fn close(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(SessionClosed)` once closed.
    pub fn check(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::SessionClosed)
        } else {
            Ok(())
        }
    }
}

/// Capability surface shared by every drive backend.
#[async_trait]
pub trait DriveOps: Send + Sync {
    /// Wait until the drive can serve reads.
    async fn ready(&self) -> Result<()>;

    /// Mark the handle closed. In-flight streams fail with `SessionClosed`.
    fn release(&self);

    /// Close the handle.
    async fn close(&self) -> Result<()> {
        self.release();
        Ok(())
    }

    fn is_closed(&self) -> bool;

    /// Current version, 0 for trees without history.
    fn version(&self) -> u64;

    fn writable(&self) -> bool;

    /// Look up one entry. `None` means the key does not exist.
    async fn entry(&self, key: &KeyPath, options: EntryOptions) -> Result<Option<Entry>>;

    /// Every file and symlink under `prefix` that `filter` allows, in
    /// lexicographic key order.
    async fn list(&self, prefix: &KeyPath, filter: &Filter) -> Result<Vec<Entry>>;

    /// Names directly below `dir`, sorted.
    async fn readdir(&self, dir: &KeyPath) -> Result<Vec<String>>;

    /// Open the blob of a file entry for reading.
    async fn read(&self, entry: &Entry) -> Result<BlobReader>;

    /// Open a write stream that replaces `key` when finished.
    async fn write(&self, key: &KeyPath, options: WriteOptions) -> Result<BlobWriter>;

    /// Write a whole blob.
    async fn put(&self, key: &KeyPath, content: &[u8], options: WriteOptions) -> Result<Entry> {
        let mut writer = self.write(key, options).await?;
        writer.write_chunk(content).await?;
        writer.finish().await
    }

    /// Delete `key`. Deleting a missing key succeeds.
    async fn del(&self, key: &KeyPath) -> Result<()>;

    /// Create or retarget a symlink.
    async fn symlink(&self, key: &KeyPath, target: &str) -> Result<()>;
}

/// A resolved drive.
#[derive(Debug, Clone)]
pub enum Drive {
    Local(LocalDrive),
    Keyed(KeyedDrive),
}

impl Drive {
    /// Human-readable identity: the root path or the encoded key.
    pub fn label(&self) -> String {
        match self {
            Self::Local(local) => local.root().display().to_string(),
            Self::Keyed(keyed) => keyed.key().encode(),
        }
    }

    pub fn key(&self) -> Option<DriveKey> {
        match self {
            Self::Local(_) => None,
            Self::Keyed(keyed) => Some(keyed.key()),
        }
    }

    /// Read-only view of this drive at `version`.
    pub fn checkout(&self, version: u64) -> Result<Drive> {
        match self {
            Self::Local(local) => Err(Error::NotVersioned {
                drive: local.root().display().to_string(),
            }),
            Self::Keyed(keyed) => keyed.checkout(version).map(Self::Keyed),
        }
    }

    fn ops(&self) -> &dyn DriveOps {
        match self {
            Self::Local(local) => local,
            Self::Keyed(keyed) => keyed,
        }
    }
}

#[async_trait]
impl DriveOps for Drive {
    async fn ready(&self) -> Result<()> {
        self.ops().ready().await
    }

    fn release(&self) {
        self.ops().release()
    }

    fn is_closed(&self) -> bool {
        self.ops().is_closed()
    }

    fn version(&self) -> u64 {
        self.ops().version()
    }

    fn writable(&self) -> bool {
        self.ops().writable()
    }

    async fn entry(&self, key: &KeyPath, options: EntryOptions) -> Result<Option<Entry>> {
        let lookup = self.ops().entry(key, options);
        match options.timeout {
            Some(limit) => tokio::time::timeout(limit, lookup)
                .await
                .map_err(|_| Error::EntryLookupTimeout {
                    key: key.to_string(),
                    timeout_ms: limit.as_millis() as u64,
                })?,
            None => lookup.await,
        }
    }

    async fn list(&self, prefix: &KeyPath, filter: &Filter) -> Result<Vec<Entry>> {
        self.ops().list(prefix, filter).await
    }

    async fn readdir(&self, dir: &KeyPath) -> Result<Vec<String>> {
        self.ops().readdir(dir).await
    }

    async fn read(&self, entry: &Entry) -> Result<BlobReader> {
        self.ops().read(entry).await
    }

    async fn write(&self, key: &KeyPath, options: WriteOptions) -> Result<BlobWriter> {
        self.ops().write(key, options).await
    }

    async fn del(&self, key: &KeyPath) -> Result<()> {
        self.ops().del(key).await
    }

    async fn symlink(&self, key: &KeyPath, target: &str) -> Result<()> {
        self.ops().symlink(key, target).await
    }
}

impl From<LocalDrive> for Drive {
    fn from(drive: LocalDrive) -> Self {
        Self::Local(drive)
    }
}

impl From<KeyedDrive> for Drive {
    fn from(drive: KeyedDrive) -> Self {
        Self::Keyed(drive)
    }
}
