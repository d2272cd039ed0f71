//! Blob read and write streams

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use drive_fs::{ChecksumHasher, KeyPath, checksum};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::keyed::Tree;
use super::{CloseFlag, DriveOps, WriteOptions};
use crate::entry::{Blob, Entry};
use crate::{Error, Result};

/// Buffer size used when streaming blobs.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Read stream over one blob.
#[derive(Debug)]
pub struct BlobReader {
    file: File,
    closed: CloseFlag,
}

impl BlobReader {
    pub(crate) fn new(file: File, closed: CloseFlag) -> Self {
        Self { file, closed }
    }

    /// Read up to `buf.len()` bytes. Returns 0 at end of blob.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.closed.check()?;
        Ok(self.file.read(buf).await?)
    }

    /// Fill `buf` as far as the blob allows. Returns fewer bytes only at the end.
    pub async fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_chunk(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = self.read_chunk(&mut buf).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }
}

/// Where a finished write lands.
pub(crate) enum WriteTarget {
    Local {
        path: PathBuf,
        key: KeyPath,
        executable: bool,
    },
    Keyed {
        tree: Arc<Tree>,
        key: KeyPath,
        executable: bool,
        metadata: Option<BTreeMap<String, String>>,
    },
}

/// Write stream for one key.
///
/// Bytes go to a temporary file that only replaces the key on [`finish`].
/// Dropping an unfinished writer discards the temporary file.
///
/// [`finish`]: BlobWriter::finish
pub struct BlobWriter {
    file: Option<File>,
    temp_path: PathBuf,
    hasher: ChecksumHasher,
    closed: CloseFlag,
    target: WriteTarget,
    finished: bool,
}

impl std::fmt::Debug for BlobWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobWriter")
            .field("temp_path", &self.temp_path)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl BlobWriter {
    pub(crate) fn new(file: File, temp_path: PathBuf, closed: CloseFlag, target: WriteTarget) -> Self {
        Self {
            file: Some(file),
            temp_path,
            hasher: ChecksumHasher::new(),
            closed,
            target,
            finished: false,
        }
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.closed.check()?;
        let file = self.file.as_mut().ok_or(Error::SessionClosed)?;
        file.write_all(chunk)
            .await
            .map_err(|e| Error::io(&self.temp_path, e))?;
        self.hasher.update(chunk);
        Ok(())
    }

    /// Bytes written so far.
    pub fn len(&self) -> u64 {
        self.hasher.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hasher.is_empty()
    }

    /// Flush the content and make it visible under the key.
    pub async fn finish(mut self) -> Result<Entry> {
        self.closed.check()?;
        if let Some(mut file) = self.file.take() {
            file.flush().await.map_err(|e| Error::io(&self.temp_path, e))?;
            file.sync_all().await.map_err(|e| Error::io(&self.temp_path, e))?;
        }

        let byte_length = self.hasher.len();
        let digest = std::mem::take(&mut self.hasher).finish();

        let entry = match &self.target {
            WriteTarget::Local {
                path,
                key,
                executable,
            } => {
                set_executable(&self.temp_path, *executable).await?;
                tokio::fs::rename(&self.temp_path, path)
                    .await
                    .map_err(|e| Error::io(path, e))?;
                let mut entry = Entry::file(key.as_str(), byte_length);
                entry.executable = *executable;
                entry
            }
            WriteTarget::Keyed {
                tree,
                key,
                executable,
                metadata,
            } => {
                let hex = checksum::digest_hex(&digest).ok_or_else(|| Error::CorruptRecord {
                    path: self.temp_path.clone(),
                    message: format!("unexpected checksum {digest}"),
                })?;
                let blob_path = tree.blob_path(hex);
                if tokio::fs::try_exists(&blob_path).await.unwrap_or(false) {
                    tokio::fs::remove_file(&self.temp_path)
                        .await
                        .map_err(|e| Error::io(&self.temp_path, e))?;
                } else {
                    tokio::fs::rename(&self.temp_path, &blob_path)
                        .await
                        .map_err(|e| Error::io(&blob_path, e))?;
                }
                let entry = Entry {
                    key: key.to_string(),
                    seq: 0,
                    blob: Some(Blob {
                        byte_length,
                        checksum: Some(digest.clone()),
                    }),
                    executable: *executable,
                    linkname: None,
                    metadata: metadata.clone(),
                };
                tree.put(entry).await?
            }
        };

        self.finished = true;
        Ok(entry)
    }
}

impl Drop for BlobWriter {
    fn drop(&mut self) {
        if !self.finished {
            self.file.take();
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

#[cfg(unix)]
async fn set_executable(path: &std::path::Path, executable: bool) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = if executable { 0o755 } else { 0o644 };
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|e| Error::io(path, e))
}

#[cfg(not(unix))]
async fn set_executable(_path: &std::path::Path, _executable: bool) -> Result<()> {
    Ok(())
}

/// Copy one source entry to `key` on `destination`.
///
/// Symlinks are retargeted; blobs are streamed in full with their
/// executable flag and metadata.
pub async fn copy_entry<S, D>(source: &S, destination: &D, key: &KeyPath, entry: &Entry) -> Result<()>
where
    S: DriveOps + ?Sized,
    D: DriveOps + ?Sized,
{
    if let Some(target) = &entry.linkname {
        return destination.symlink(key, target).await;
    }

    let mut reader = source.read(entry).await?;
    let mut writer = destination.write(key, WriteOptions::from_entry(entry)).await?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read_chunk(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_chunk(&buf[..n]).await?;
    }
    writer.finish().await?;
    Ok(())
}
