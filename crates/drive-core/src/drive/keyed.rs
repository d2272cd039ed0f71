//! Versioned, content-addressed drive
//!
//! A tree is an append-only log of put/del records (`log.jsonl`) plus a
//! directory of blobs named by their SHA-256 digest. The tree's version is
//! the number of records in the log; replaying the first `v` records yields
//! the tree as it was at version `v`.
//!
//! One process appends at a time. Other processes pick up its records with
//! [`Tree::refresh`], which reads the log past the last consumed byte.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File as StdFile;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use drive_fs::{KeyPath, StorePath, checksum};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::blob::WriteTarget;
use super::{BlobReader, BlobWriter, CloseFlag, DriveKey, DriveOps, EntryOptions, WriteOptions};
use crate::entry::Entry;
use crate::filter::Filter;
use crate::{Error, Result};

/// One line of the tree log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub(crate) enum LogRecord {
    Put { entry: Entry },
    Del { key: String },
}

impl LogRecord {
    fn key(&self) -> &str {
        match self {
            Self::Put { entry } => &entry.key,
            Self::Del { key } => key,
        }
    }

    fn apply(&self, index: &mut BTreeMap<String, Entry>) {
        match self {
            Self::Put { entry } => {
                index.insert(entry.key.clone(), entry.clone());
            }
            Self::Del { key } => {
                index.remove(key);
            }
        }
    }
}

#[derive(Debug, Default)]
struct TreeState {
    records: Vec<LogRecord>,
    index: BTreeMap<String, Entry>,
    /// Byte length of the well-formed part of the log
    valid_len: u64,
}

/// Shared state of one keyed tree. All handles to a key in a process share it.
#[derive(Debug)]
pub struct Tree {
    key: DriveKey,
    dir: PathBuf,
    writable: bool,
    state: Mutex<TreeState>,
    /// Writer lock on the tree's `LOCK` file, taken on first append
    writer: tokio::sync::Mutex<Option<StdFile>>,
    version_tx: watch::Sender<u64>,
}

impl Tree {
    /// Load a tree from `dir`. A missing directory is an empty tree.
    pub(crate) async fn load(key: DriveKey, dir: PathBuf) -> Result<Self> {
        let writable = tokio::fs::try_exists(dir.join(StorePath::Owner))
            .await
            .unwrap_or(false);
        let log_path = dir.join(StorePath::Log);

        let raw = match tokio::fs::read_to_string(&log_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(Error::io(&log_path, e)),
        };

        let parsed = parse_log(&raw, &log_path, 0)?;
        if parsed.torn {
            warn!(path = %log_path.display(), "Ignoring torn record at end of log");
        }
        let mut state = TreeState {
            valid_len: parsed.len,
            ..Default::default()
        };
        for record in parsed.records {
            record.apply(&mut state.index);
            state.records.push(record);
        }

        let version = state.records.len() as u64;
        debug!(key = %key, version, writable, "Loaded tree");
        let (version_tx, _) = watch::channel(version);
        Ok(Self {
            key,
            dir,
            writable,
            state: Mutex::new(state),
            writer: tokio::sync::Mutex::new(None),
            version_tx,
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, TreeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn key(&self) -> DriveKey {
        self.key
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn version(&self) -> u64 {
        self.state().records.len() as u64
    }

    pub(crate) fn blob_path(&self, hex: &str) -> PathBuf {
        self.dir.join(StorePath::Blobs).join(hex)
    }

    fn get(&self, key: &str) -> Option<Entry> {
        self.state().index.get(key).cloned()
    }

    fn snapshot(&self) -> Arc<BTreeMap<String, Entry>> {
        Arc::new(self.state().index.clone())
    }

    /// Index as it was after the first `version` records.
    pub(crate) fn index_at(&self, version: u64) -> BTreeMap<String, Entry> {
        let state = self.state();
        let mut index = BTreeMap::new();
        for record in state.records.iter().take(version as usize) {
            record.apply(&mut index);
        }
        index
    }

    /// Keys touched by records in `from..to`.
    pub(crate) fn changed_keys(&self, from: u64, to: u64) -> BTreeSet<KeyPath> {
        let state = self.state();
        let end = (to as usize).min(state.records.len());
        let start = (from as usize).min(end);
        state.records[start..end]
            .iter()
            .map(|record| KeyPath::new(record.key()))
            .collect()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }

    /// Pick up records appended by another process and return the version.
    ///
    /// Does nothing while this process holds the writer lock.
    pub(crate) async fn refresh(&self) -> Result<u64> {
        let writer = self.writer.lock().await;
        if writer.is_none() {
            self.absorb_tail().await?;
        }
        Ok(self.version())
    }

    /// Apply complete records past `valid_len`. The caller holds `writer`.
    async fn absorb_tail(&self) -> Result<()> {
        let log_path = self.dir.join(StorePath::Log);
        let mut file = match tokio::fs::File::open(&log_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::io(&log_path, e)),
        };
        let (offset, first) = {
            let state = self.state();
            (state.valid_len, state.records.len())
        };
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| Error::io(&log_path, e))?;
        let mut raw = Vec::new();
        file.read_to_end(&mut raw)
            .await
            .map_err(|e| Error::io(&log_path, e))?;

        // An unterminated tail is a write in progress and stays unread
        let parsed = parse_log(&String::from_utf8_lossy(&raw), &log_path, first)?;
        if parsed.records.is_empty() {
            return Ok(());
        }
        let version = {
            let mut state = self.state();
            for record in parsed.records {
                record.apply(&mut state.index);
                state.records.push(record);
            }
            state.valid_len += parsed.len;
            state.records.len() as u64
        };
        debug!(key = %self.key, version, "Read records of another writer");
        self.version_tx.send_replace(version);
        Ok(())
    }

    /// Append a put record, assigning its sequence number.
    pub(crate) async fn put(&self, mut entry: Entry) -> Result<Entry> {
        let mut writer = self.writer.lock().await;
        entry.seq = self.version() + 1;
        self.append(&mut writer, LogRecord::Put { entry: entry.clone() })
            .await?;
        Ok(entry)
    }

    /// Append a del record. Returns false if the key did not exist.
    pub(crate) async fn del(&self, key: &str) -> Result<bool> {
        let mut writer = self.writer.lock().await;
        if self.get(key).is_none() {
            return Ok(false);
        }
        self.append(&mut writer, LogRecord::Del { key: key.to_string() })
            .await?;
        Ok(true)
    }

    async fn append(&self, writer: &mut Option<StdFile>, record: LogRecord) -> Result<()> {
        if !self.writable {
            return Err(Error::ReadOnly {
                drive: self.key.encode(),
            });
        }

        let log_path = self.dir.join(StorePath::Log);
        if writer.is_none() {
            let lock = drive_fs::io::try_lock_exclusive(&self.dir.join(StorePath::Lock))?;
            self.absorb_tail().await?;
            let valid_len = self.state().valid_len;
            let log = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(&log_path)
                .map_err(|e| Error::io(&log_path, e))?;
            if log.metadata().map(|m| m.len()).unwrap_or(0) > valid_len {
                log.set_len(valid_len).map_err(|e| Error::io(&log_path, e))?;
            }
            *writer = Some(lock);
        }

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut log = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&log_path)
            .await
            .map_err(|e| Error::io(&log_path, e))?;
        log.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::io(&log_path, e))?;
        log.sync_data().await.map_err(|e| Error::io(&log_path, e))?;

        let version = {
            let mut state = self.state();
            record.apply(&mut state.index);
            state.records.push(record);
            state.valid_len += line.len() as u64;
            state.records.len() as u64
        };
        self.version_tx.send_replace(version);
        Ok(())
    }

    /// Total blob bytes reachable from the current index.
    pub(crate) fn blob_bytes(&self) -> u64 {
        self.state().index.values().map(Entry::blob_length).sum()
    }
}

/// Complete records of a log chunk.
struct ParsedLog {
    records: Vec<LogRecord>,
    /// Bytes spanned by `records`
    len: u64,
    /// The chunk ends in an unterminated or unreadable line
    torn: bool,
}

/// Parse `raw`, whose first line is record number `first + 1`.
///
/// Only the last line may be incomplete; a bad line before it is corruption.
fn parse_log(raw: &str, log_path: &Path, first: usize) -> Result<ParsedLog> {
    let mut parsed = ParsedLog {
        records: Vec::new(),
        len: 0,
        torn: false,
    };
    let mut lines = raw.split_inclusive('\n').peekable();
    while let Some(line) = lines.next() {
        let is_last = lines.peek().is_none();
        match serde_json::from_str::<LogRecord>(line.trim_end()) {
            Ok(record) if line.ends_with('\n') => {
                parsed.records.push(record);
                parsed.len += line.len() as u64;
            }
            Err(e) if !is_last => {
                return Err(Error::CorruptRecord {
                    path: log_path.to_path_buf(),
                    message: format!("record {}: {e}", first + parsed.records.len() + 1),
                });
            }
            _ => parsed.torn = true,
        }
    }
    Ok(parsed)
}

#[derive(Debug, Clone)]
enum View {
    Live,
    Pinned {
        version: u64,
        index: Arc<BTreeMap<String, Entry>>,
    },
}

/// Handle to a keyed tree, live or pinned at a version.
#[derive(Debug, Clone)]
pub struct KeyedDrive {
    tree: Arc<Tree>,
    view: View,
    closed: CloseFlag,
}

impl KeyedDrive {
    pub(crate) fn live(tree: Arc<Tree>) -> Self {
        Self {
            tree,
            view: View::Live,
            closed: CloseFlag::default(),
        }
    }

    pub fn key(&self) -> DriveKey {
        self.tree.key()
    }

    pub(crate) fn tree(&self) -> &Arc<Tree> {
        &self.tree
    }

    /// Whether this handle is fixed at a historical version.
    pub fn is_pinned(&self) -> bool {
        matches!(self.view, View::Pinned { .. })
    }

    /// Total blob bytes of the current view.
    pub fn blob_bytes(&self) -> u64 {
        match &self.view {
            View::Live => self.tree.blob_bytes(),
            View::Pinned { index, .. } => index.values().map(Entry::blob_length).sum(),
        }
    }

    /// Immutable read-only view at `version`.
    ///
    /// The view has its own close flag and outlives this handle.
    pub fn checkout(&self, version: u64) -> Result<KeyedDrive> {
        let current = self.tree.version();
        if version == 0 || version > current {
            return Err(Error::InvalidVersion {
                value: version.to_string(),
                reason: format!("must be between 1 and {current}"),
            });
        }
        let index = Arc::new(self.tree.index_at(version));
        debug!(key = %self.tree.key(), version, "Checked out tree");
        Ok(Self {
            tree: Arc::clone(&self.tree),
            view: View::Pinned { version, index },
            closed: CloseFlag::default(),
        })
    }

    /// Version notifications of the live tree.
    pub fn subscribe_version(&self) -> watch::Receiver<u64> {
        self.tree.subscribe()
    }

    fn index(&self) -> Arc<BTreeMap<String, Entry>> {
        match &self.view {
            View::Live => self.tree.snapshot(),
            View::Pinned { index, .. } => Arc::clone(index),
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        self.closed.check()?;
        if self.writable() {
            Ok(())
        } else {
            Err(Error::ReadOnly {
                drive: self.tree.key().encode(),
            })
        }
    }
}

fn within<'a>(
    index: &'a BTreeMap<String, Entry>,
    prefix: &'a KeyPath,
) -> impl Iterator<Item = (&'a String, &'a Entry)> + 'a {
    index
        .range(prefix.as_str().to_string()..)
        .take_while(move |(key, _)| key.starts_with(prefix.as_str()))
        .filter(move |(key, _)| KeyPath::new(key.as_str()).is_within(prefix))
}

#[async_trait]
impl DriveOps for KeyedDrive {
    async fn ready(&self) -> Result<()> {
        self.closed.check()?;
        if let View::Live = self.view {
            self.tree.refresh().await?;
        }
        Ok(())
    }

    fn release(&self) {
        self.closed.close();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }

    fn version(&self) -> u64 {
        match &self.view {
            View::Live => self.tree.version(),
            View::Pinned { version, .. } => *version,
        }
    }

    fn writable(&self) -> bool {
        matches!(self.view, View::Live) && self.tree.writable
    }

    async fn entry(&self, key: &KeyPath, _options: EntryOptions) -> Result<Option<Entry>> {
        self.closed.check()?;
        Ok(match &self.view {
            View::Live => self.tree.get(key.as_str()),
            View::Pinned { index, .. } => index.get(key.as_str()).cloned(),
        })
    }

    async fn list(&self, prefix: &KeyPath, filter: &Filter) -> Result<Vec<Entry>> {
        self.closed.check()?;
        let index = self.index();
        Ok(within(&index, prefix)
            .filter(|(key, _)| filter.allows(&KeyPath::new(key.as_str())))
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    async fn readdir(&self, dir: &KeyPath) -> Result<Vec<String>> {
        self.closed.check()?;
        let index = self.index();
        let names: BTreeSet<String> = within(&index, dir)
            .filter_map(|(key, _)| {
                let rest = key.strip_prefix(dir.as_str())?;
                let rest = rest.trim_start_matches('/');
                rest.split('/').next().filter(|s| !s.is_empty()).map(str::to_string)
            })
            .collect();
        Ok(names.into_iter().collect())
    }

    async fn read(&self, entry: &Entry) -> Result<BlobReader> {
        self.closed.check()?;
        let hex = entry
            .blob
            .as_ref()
            .and_then(|blob| blob.checksum.as_deref())
            .and_then(checksum::digest_hex)
            .ok_or_else(|| Error::Unsupported {
                operation: format!("read of {} without a blob", entry.key),
            })?;
        let path = self.tree.blob_path(hex);
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| Error::io(&path, e))?;
        Ok(BlobReader::new(file, self.closed.clone()))
    }

    async fn write(&self, key: &KeyPath, options: WriteOptions) -> Result<BlobWriter> {
        self.ensure_writable()?;
        let blobs = self.tree.dir().join(StorePath::Blobs);
        tokio::fs::create_dir_all(&blobs)
            .await
            .map_err(|e| Error::io(&blobs, e))?;
        let temp_path = blobs.join(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        let file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|e| Error::io(&temp_path, e))?;
        Ok(BlobWriter::new(
            file,
            temp_path,
            self.closed.clone(),
            WriteTarget::Keyed {
                tree: Arc::clone(&self.tree),
                key: key.clone(),
                executable: options.executable,
                metadata: options.metadata,
            },
        ))
    }

    async fn del(&self, key: &KeyPath) -> Result<()> {
        self.ensure_writable()?;
        if !self.tree.del(key.as_str()).await? {
            debug!(key = %key, "Delete of missing key");
        }
        Ok(())
    }

    async fn symlink(&self, key: &KeyPath, target: &str) -> Result<()> {
        self.ensure_writable()?;
        self.tree.put(Entry::symlink(key.as_str(), target)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    async fn writable_tree(temp: &TempDir) -> KeyedDrive {
        let dir = temp.path().join("tree");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(StorePath::Owner), "").unwrap();
        let tree = Tree::load(DriveKey::generate(), dir).await.unwrap();
        KeyedDrive::live(Arc::new(tree))
    }

    #[tokio::test]
    async fn versions_count_records() {
        let temp = TempDir::new().unwrap();
        let drive = writable_tree(&temp).await;
        assert_eq!(drive.version(), 0);

        let entry = drive
            .put(&KeyPath::new("/a.txt"), b"a", WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(entry.seq, 1);
        drive.symlink(&KeyPath::new("/l"), "/a.txt").await.unwrap();
        drive.del(&KeyPath::new("/a.txt")).await.unwrap();
        assert_eq!(drive.version(), 3);

        // deleting a missing key appends nothing
        drive.del(&KeyPath::new("/a.txt")).await.unwrap();
        assert_eq!(drive.version(), 3);
    }

    #[tokio::test]
    async fn log_reloads_to_same_state() {
        let temp = TempDir::new().unwrap();
        let drive = writable_tree(&temp).await;
        drive
            .put(&KeyPath::new("/x/y.txt"), b"yy", WriteOptions::default())
            .await
            .unwrap();

        let reloaded = Tree::load(drive.key(), temp.path().join("tree")).await.unwrap();
        assert_eq!(reloaded.version(), 1);
        let entry = reloaded.get("/x/y.txt").unwrap();
        assert_eq!(entry.blob_length(), 2);
    }

    #[tokio::test]
    async fn torn_trailing_record_is_ignored() {
        let temp = TempDir::new().unwrap();
        let drive = writable_tree(&temp).await;
        drive
            .put(&KeyPath::new("/a"), b"a", WriteOptions::default())
            .await
            .unwrap();
        let log = temp.path().join("tree").join(StorePath::Log);
        let mut raw = std::fs::read_to_string(&log).unwrap();
        raw.push_str("{\"op\":\"put\",\"ent");
        std::fs::write(&log, raw).unwrap();

        let reloaded = Tree::load(drive.key(), temp.path().join("tree")).await.unwrap();
        assert_eq!(reloaded.version(), 1);
    }

    #[tokio::test]
    async fn refresh_reads_records_of_another_writer() {
        let temp = TempDir::new().unwrap();
        let writer = writable_tree(&temp).await;
        writer
            .put(&KeyPath::new("/a"), b"a", WriteOptions::default())
            .await
            .unwrap();
        let reader = Tree::load(writer.key(), temp.path().join("tree")).await.unwrap();
        let mut versions = reader.subscribe();
        assert_eq!(reader.version(), 1);

        writer
            .put(&KeyPath::new("/b"), b"bb", WriteOptions::default())
            .await
            .unwrap();
        let log = temp.path().join("tree").join(StorePath::Log);
        let mut raw = std::fs::read_to_string(&log).unwrap();
        raw.push_str("{\"op\":\"del\"");
        std::fs::write(&log, raw).unwrap();

        assert_eq!(reader.refresh().await.unwrap(), 2);
        assert!(versions.has_changed().unwrap());
        assert_eq!(*versions.borrow_and_update(), 2);
        assert_eq!(reader.get("/b").unwrap().blob_length(), 2);
        assert_eq!(reader.changed_keys(1, 2), BTreeSet::from([KeyPath::new("/b")]));

        // nothing new, the unterminated line stays unread
        assert_eq!(reader.refresh().await.unwrap(), 2);
        assert!(!versions.has_changed().unwrap());
    }

    #[tokio::test]
    async fn first_append_keeps_records_of_a_previous_writer() {
        let temp = TempDir::new().unwrap();
        let first = writable_tree(&temp).await;
        let second = KeyedDrive::live(Arc::new(
            Tree::load(first.key(), temp.path().join("tree")).await.unwrap(),
        ));
        first
            .put(&KeyPath::new("/a"), b"a", WriteOptions::default())
            .await
            .unwrap();
        drop(first);

        second
            .put(&KeyPath::new("/b"), b"b", WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(second.version(), 2);
        let reloaded = Tree::load(second.key(), temp.path().join("tree")).await.unwrap();
        assert_eq!(reloaded.version(), 2);
        assert!(reloaded.get("/a").is_some());
    }

    #[tokio::test]
    async fn checkout_is_isolated_from_later_writes() {
        let temp = TempDir::new().unwrap();
        let drive = writable_tree(&temp).await;
        drive
            .put(&KeyPath::new("/a"), b"one", WriteOptions::default())
            .await
            .unwrap();
        let pinned = drive.checkout(1).unwrap();
        drive
            .put(&KeyPath::new("/b"), b"two", WriteOptions::default())
            .await
            .unwrap();

        let listed = pinned.list(&KeyPath::root(), &Filter::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(pinned.version(), 1);
        assert!(!pinned.writable());
        assert!(matches!(
            pinned.del(&KeyPath::new("/a")).await,
            Err(Error::ReadOnly { .. })
        ));
    }

    #[rstest::rstest]
    #[case(0)]
    #[case(2)]
    #[tokio::test]
    async fn checkout_out_of_range_is_invalid(#[case] version: u64) {
        let temp = TempDir::new().unwrap();
        let drive = writable_tree(&temp).await;
        drive
            .put(&KeyPath::new("/a"), b"a", WriteOptions::default())
            .await
            .unwrap();
        assert!(matches!(
            drive.checkout(version),
            Err(Error::InvalidVersion { .. })
        ));
    }

    #[tokio::test]
    async fn readdir_lists_one_level() {
        let temp = TempDir::new().unwrap();
        let drive = writable_tree(&temp).await;
        for key in ["/a/b.txt", "/a/c/d.txt", "/e.txt"] {
            drive
                .put(&KeyPath::new(key), b"", WriteOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(drive.readdir(&KeyPath::root()).await.unwrap(), vec!["a", "e.txt"]);
        assert_eq!(drive.readdir(&KeyPath::new("/a")).await.unwrap(), vec!["b.txt", "c"]);
    }

    #[tokio::test]
    async fn identical_content_shares_one_blob() {
        let temp = TempDir::new().unwrap();
        let drive = writable_tree(&temp).await;
        drive.put(&KeyPath::new("/a"), b"same", WriteOptions::default()).await.unwrap();
        drive.put(&KeyPath::new("/b"), b"same", WriteOptions::default()).await.unwrap();
        let blobs = std::fs::read_dir(temp.path().join("tree").join(StorePath::Blobs))
            .unwrap()
            .count();
        assert_eq!(blobs, 1);
    }

    #[tokio::test]
    async fn read_only_tree_rejects_writes() {
        let temp = TempDir::new().unwrap();
        let tree = Tree::load(DriveKey::generate(), temp.path().join("ro")).await.unwrap();
        let drive = KeyedDrive::live(Arc::new(tree));
        assert!(!drive.writable());
        let err = drive
            .write(&KeyPath::new("/a"), WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReadOnly { .. }));
    }
}
