//! Drive backed by a plain directory

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use drive_fs::KeyPath;
use tracing::debug;

use super::blob::WriteTarget;
use super::{BlobReader, BlobWriter, CloseFlag, DriveOps, EntryOptions, WriteOptions};
use crate::entry::Entry;
use crate::filter::Filter;
use crate::{Error, Result};

/// Local directory tree. Keys map to files below `root`.
#[derive(Debug, Clone)]
pub struct LocalDrive {
    root: PathBuf,
    closed: CloseFlag,
}

impl LocalDrive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            closed: CloseFlag::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn root_exists(&self) -> bool {
        tokio::fs::try_exists(&self.root).await.unwrap_or(false)
    }

    /// Build the entry for a native path, `None` for directories and
    /// missing files.
    async fn entry_at(&self, key: &KeyPath, path: &Path) -> Result<Option<Entry>> {
        let meta = match tokio::fs::symlink_metadata(path).await {
            Ok(meta) => meta,
            Err(e) if is_missing(&e) => return Ok(None),
            Err(e) => return Err(Error::io(path, e)),
        };

        if meta.file_type().is_symlink() {
            let target = tokio::fs::read_link(path)
                .await
                .map_err(|e| Error::io(path, e))?;
            return Ok(Some(Entry::symlink(
                key.as_str(),
                target.to_string_lossy().into_owned(),
            )));
        }

        if !meta.is_file() {
            return Ok(None);
        }

        let mut entry = Entry::file(key.as_str(), meta.len());
        entry.executable = is_executable(&meta);
        Ok(Some(entry))
    }

    /// Remove empty directories from `dir` upwards, stopping at the root.
    async fn prune_empty_parents(&self, mut dir: Option<&Path>) {
        while let Some(current) = dir {
            if current == self.root.as_path() || !current.starts_with(&self.root) {
                break;
            }
            if tokio::fs::remove_dir(current).await.is_err() {
                break;
            }
            debug!(dir = %current.display(), "Removed empty directory");
            dir = current.parent();
        }
    }
}

fn is_missing(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory)
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    false
}

#[async_trait]
impl DriveOps for LocalDrive {
    async fn ready(&self) -> Result<()> {
        self.closed.check()?;
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(Error::storage(&self.root, "not a directory")),
            // A missing root reads as an empty tree
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(&self.root, e.to_string())),
        }
    }

    fn release(&self) {
        self.closed.close();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }

    fn version(&self) -> u64 {
        0
    }

    fn writable(&self) -> bool {
        true
    }

    async fn entry(&self, key: &KeyPath, _options: EntryOptions) -> Result<Option<Entry>> {
        self.closed.check()?;
        self.entry_at(key, &key.to_native(&self.root)).await
    }

    async fn list(&self, prefix: &KeyPath, filter: &Filter) -> Result<Vec<Entry>> {
        self.closed.check()?;
        let mut out = Vec::new();
        if !filter.allows(prefix) {
            return Ok(out);
        }

        let start = prefix.to_native(&self.root);
        match tokio::fs::symlink_metadata(&start).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                out.extend(self.entry_at(prefix, &start).await?);
                return Ok(out);
            }
            Err(e) if is_missing(&e) => return Ok(out),
            Err(e) => return Err(Error::io(&start, e)),
        }

        let mut pending = vec![(prefix.clone(), start)];
        while let Some((dir_key, dir_path)) = pending.pop() {
            self.closed.check()?;
            let mut reader = match tokio::fs::read_dir(&dir_path).await {
                Ok(reader) => reader,
                Err(e) if is_missing(&e) => continue,
                Err(e) => return Err(Error::io(&dir_path, e)),
            };

            while let Some(child) = reader
                .next_entry()
                .await
                .map_err(|e| Error::io(&dir_path, e))?
            {
                let name = child.file_name().to_string_lossy().into_owned();
                let key = dir_key.join(&name);
                if !filter.allows(&key) {
                    continue;
                }
                let file_type = child
                    .file_type()
                    .await
                    .map_err(|e| Error::io(child.path(), e))?;
                if file_type.is_dir() {
                    pending.push((key, child.path()));
                } else if let Some(entry) = self.entry_at(&key, &child.path()).await? {
                    out.push(entry);
                }
            }
        }

        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    async fn readdir(&self, dir: &KeyPath) -> Result<Vec<String>> {
        self.closed.check()?;
        let path = dir.to_native(&self.root);
        let mut reader = match tokio::fs::read_dir(&path).await {
            Ok(reader) => reader,
            Err(e) if is_missing(&e) => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(&path, e)),
        };
        let mut names = Vec::new();
        while let Some(child) = reader.next_entry().await.map_err(|e| Error::io(&path, e))? {
            names.push(child.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn read(&self, entry: &Entry) -> Result<BlobReader> {
        self.closed.check()?;
        let path = KeyPath::new(&entry.key).to_native(&self.root);
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| Error::io(&path, e))?;
        Ok(BlobReader::new(file, self.closed.clone()))
    }

    async fn write(&self, key: &KeyPath, options: WriteOptions) -> Result<BlobWriter> {
        self.closed.check()?;
        if key.is_root() {
            return Err(Error::Unsupported {
                operation: "write to the root key".into(),
            });
        }
        let path = key.to_native(&self.root);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(parent, e))?;
        }
        let tag = uuid::Uuid::new_v4().simple().to_string();
        let temp_path = drive_fs::io::temp_sibling(&path, &tag);
        let file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|e| Error::io(&temp_path, e))?;
        Ok(BlobWriter::new(
            file,
            temp_path,
            self.closed.clone(),
            WriteTarget::Local {
                path,
                key: key.clone(),
                executable: options.executable,
            },
        ))
    }

    async fn del(&self, key: &KeyPath) -> Result<()> {
        self.closed.check()?;
        let path = key.to_native(&self.root);
        match tokio::fs::symlink_metadata(&path).await {
            Ok(meta) if meta.is_dir() => return Ok(()),
            Ok(_) => {}
            Err(e) if is_missing(&e) => return Ok(()),
            Err(e) => return Err(Error::io(&path, e)),
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if is_missing(&e) => return Ok(()),
            Err(e) => return Err(Error::io(&path, e)),
        }
        self.prune_empty_parents(path.parent()).await;
        Ok(())
    }

    async fn symlink(&self, key: &KeyPath, target: &str) -> Result<()> {
        self.closed.check()?;
        let path = key.to_native(&self.root);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(parent, e))?;
        }
        let tag = uuid::Uuid::new_v4().simple().to_string();
        let temp_path = drive_fs::io::temp_sibling(&path, &tag);
        create_symlink(target, &temp_path).await?;
        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(Error::io(&path, e));
        }
        Ok(())
    }
}

#[cfg(unix)]
async fn create_symlink(target: &str, path: &Path) -> Result<()> {
    tokio::fs::symlink(target, path)
        .await
        .map_err(|e| Error::io(path, e))
}

#[cfg(not(unix))]
async fn create_symlink(_target: &str, _path: &Path) -> Result<()> {
    Err(Error::Unsupported {
        operation: "symlink on this platform".into(),
    })
}
