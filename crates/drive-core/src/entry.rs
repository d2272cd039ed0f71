//! Entries, diff events and pass counters

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Content reference of a regular file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    pub byte_length: u64,
    /// `sha256:<hex>` of the content, when the backend addresses blobs by hash
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Metadata record for one key of a drive.
///
/// An entry is either a regular file (`blob` set) or a symlink (`linkname`
/// set), never both. A missing key is represented by the absence of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    /// Sequence number assigned by the owning tree (0 for local trees)
    pub seq: u64,
    #[serde(default)]
    pub blob: Option<Blob>,
    #[serde(default)]
    pub executable: bool,
    #[serde(default)]
    pub linkname: Option<String>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl Entry {
    /// A regular file entry.
    pub fn file(key: impl Into<String>, byte_length: u64) -> Self {
        Self {
            key: key.into(),
            seq: 0,
            blob: Some(Blob {
                byte_length,
                checksum: None,
            }),
            executable: false,
            linkname: None,
            metadata: None,
        }
    }

    /// A symlink entry.
    pub fn symlink(key: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            seq: 0,
            blob: None,
            executable: false,
            linkname: Some(target.into()),
            metadata: None,
        }
    }

    pub fn is_symlink(&self) -> bool {
        self.linkname.is_some()
    }

    /// Blob length, 0 for symlinks.
    pub fn blob_length(&self) -> u64 {
        self.blob.as_ref().map_or(0, |b| b.byte_length)
    }
}

/// Blob length of an optional entry, 0 when absent.
pub fn blob_length(entry: Option<&Entry>) -> u64 {
    entry.map_or(0, Entry::blob_length)
}

/// Kind of change applied to a destination key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffOp {
    Add,
    Remove,
    Change,
}

impl DiffOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Change => "change",
        }
    }

    /// Single-character marker used in reports.
    pub fn symbol(&self) -> char {
        match self {
            Self::Add => '+',
            Self::Remove => '-',
            Self::Change => '~',
        }
    }
}

impl std::fmt::Display for DiffOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One observed difference between source and destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEvent {
    pub key: String,
    pub op: DiffOp,
    pub bytes_added: u64,
    pub bytes_removed: u64,
}

impl DiffEvent {
    pub fn add(key: impl Into<String>, bytes_added: u64) -> Self {
        Self {
            key: key.into(),
            op: DiffOp::Add,
            bytes_added,
            bytes_removed: 0,
        }
    }

    pub fn remove(key: impl Into<String>, bytes_removed: u64) -> Self {
        Self {
            key: key.into(),
            op: DiffOp::Remove,
            bytes_added: 0,
            bytes_removed,
        }
    }

    pub fn change(key: impl Into<String>, bytes_added: u64, bytes_removed: u64) -> Self {
        Self {
            key: key.into(),
            op: DiffOp::Change,
            bytes_added,
            bytes_removed,
        }
    }
}

/// Running totals of one mirror pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Count {
    pub add: u64,
    pub remove: u64,
    pub change: u64,
    /// Source entries visited under the prefix after filtering
    pub files: u64,
}

impl Count {
    pub fn record(&mut self, event: &DiffEvent) {
        match event.op {
            DiffOp::Add => self.add += 1,
            DiffOp::Remove => self.remove += 1,
            DiffOp::Change => self.change += 1,
        }
    }

    pub fn has_changes(&self) -> bool {
        self.add > 0 || self.remove > 0 || self.change > 0
    }

    /// Accumulate another pass into this one.
    pub fn absorb(&mut self, other: &Count) {
        self.add += other.add;
        self.remove += other.remove;
        self.change += other.change;
        self.files += other.files;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove_carry_one_side_only() {
        let add = DiffEvent::add("/a", 10);
        assert_eq!(add.bytes_removed, 0);
        let remove = DiffEvent::remove("/a", 10);
        assert_eq!(remove.bytes_added, 0);
    }

    #[test]
    fn count_records_by_op() {
        let mut count = Count::default();
        count.record(&DiffEvent::add("/a", 1));
        count.record(&DiffEvent::change("/b", 1, 2));
        count.record(&DiffEvent::change("/c", 1, 2));
        assert_eq!((count.add, count.remove, count.change), (1, 0, 2));
        assert!(count.has_changes());
        assert!(!Count::default().has_changes());
    }

    #[test]
    fn symlink_has_no_blob_length() {
        let link = Entry::symlink("/l", "/target");
        assert!(link.is_symlink());
        assert_eq!(link.blob_length(), 0);
        assert_eq!(blob_length(None), 0);
        assert_eq!(blob_length(Some(&Entry::file("/f", 7))), 7);
    }

    #[test]
    fn entry_serializes_without_checksum_when_absent() {
        let json = serde_json::to_string(&Entry::file("/f", 3)).unwrap();
        assert!(!json.contains("checksum"));
        let back: Entry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Entry::file("/f", 3));
    }
}
