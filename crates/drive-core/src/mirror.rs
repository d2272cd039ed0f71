//! Tree diff and apply
//!
//! A [`Mirror`] walks the source under a prefix in key order, brings each
//! destination key in line with it, then removes destination keys the source
//! no longer has. Every applied difference is yielded as a [`DiffEvent`].

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use drive_fs::KeyPath;
use futures::Stream;
use tracing::{debug, warn};

use crate::drive::{DriveOps, EntryOptions, copy_entry};
use crate::entry::{Count, DiffEvent, Entry};
use crate::equality::same;
use crate::filter::Filter;
use crate::{Error, Result};

/// Parameters of a single pass.
#[derive(Debug, Clone, Default)]
pub struct PassOptions {
    /// Only keys at or below this prefix are compared
    pub prefix: KeyPath,
    pub filter: Filter,
    /// Report differences without touching the destination
    pub dry_run: bool,
    /// Bound on destination entry lookups
    pub entry_timeout: Option<Duration>,
}

impl PassOptions {
    fn lookup(&self) -> EntryOptions {
        EntryOptions {
            timeout: self.entry_timeout,
        }
    }

    /// Whether `key` is in scope for this pass.
    pub fn covers(&self, key: &KeyPath) -> bool {
        key.is_within(&self.prefix) && self.filter.allows(key)
    }
}

enum Phase {
    Pending,
    Source(VecDeque<Entry>),
    Removals(VecDeque<Entry>),
    Retry(VecDeque<Entry>),
    Done,
}

/// One diff pass from `source` into `destination`.
///
/// Events come out in key order: additions and changes first, then removals.
/// Errors scoped to one key are yielded and the walk continues; errors that
/// make a handle unusable end the pass.
///
/// A source key that fails before removals ran is retried once after them,
/// since a stale destination entry can block it (a directory where the source
/// has a file, or a file where the source has a directory).
pub struct Mirror<'a, S: ?Sized, D: ?Sized> {
    source: &'a S,
    destination: &'a D,
    options: &'a PassOptions,
    phase: Phase,
    seen: HashSet<String>,
    deferred: VecDeque<Entry>,
    count: Count,
}

/// Start a pass. Nothing is read until the first call to [`Mirror::next`].
pub fn mirror<'a, S, D>(source: &'a S, destination: &'a D, options: &'a PassOptions) -> Mirror<'a, S, D>
where
    S: DriveOps + ?Sized,
    D: DriveOps + ?Sized,
{
    Mirror {
        source,
        destination,
        options,
        phase: Phase::Pending,
        seen: HashSet::new(),
        deferred: VecDeque::new(),
        count: Count::default(),
    }
}

impl<'a, S, D> Mirror<'a, S, D>
where
    S: DriveOps + ?Sized,
    D: DriveOps + ?Sized,
{
    /// Totals so far; final once [`next`](Self::next) returns `None`.
    pub fn count(&self) -> Count {
        self.count
    }

    /// Apply the next difference.
    pub async fn next(&mut self) -> Option<Result<DiffEvent>> {
        loop {
            match &mut self.phase {
                Phase::Done => return None,
                Phase::Pending => {
                    debug!(prefix = %self.options.prefix, dry_run = self.options.dry_run, "Starting pass");
                    match self.source.list(&self.options.prefix, &self.options.filter).await {
                        Ok(entries) => self.phase = Phase::Source(entries.into()),
                        Err(e) => return Some(Err(self.abort(e))),
                    }
                }
                Phase::Source(queue) => {
                    let Some(src) = queue.pop_front() else {
                        match self.pending_removals().await {
                            Ok(removals) => self.phase = Phase::Removals(removals),
                            Err(e) => return Some(Err(self.abort(e))),
                        }
                        continue;
                    };
                    self.count.files += 1;
                    self.seen.insert(src.key.clone());
                    match self.sync_entry(&src).await {
                        Ok(Some(event)) => {
                            self.count.record(&event);
                            return Some(Ok(event));
                        }
                        Ok(None) => {}
                        Err(e) if e.aborts_pass() || matches!(e, Error::EntryLookupTimeout { .. }) => {
                            return Some(Err(self.recover(&src.key, e)));
                        }
                        Err(e) => {
                            debug!(key = %src.key, error = %e, "Deferring key until after removals");
                            self.deferred.push_back(src);
                        }
                    }
                }
                Phase::Removals(queue) => {
                    let Some(dst) = queue.pop_front() else {
                        if self.deferred.is_empty() {
                            return self.finish();
                        }
                        self.phase = Phase::Retry(std::mem::take(&mut self.deferred));
                        continue;
                    };
                    let event = DiffEvent::remove(dst.key.as_str(), dst.blob_length());
                    if !self.options.dry_run {
                        if let Err(e) = self.destination.del(&KeyPath::new(&dst.key)).await {
                            return Some(Err(self.recover(&dst.key, e)));
                        }
                    }
                    self.count.record(&event);
                    return Some(Ok(event));
                }
                Phase::Retry(queue) => {
                    let Some(src) = queue.pop_front() else {
                        return self.finish();
                    };
                    match self.sync_entry(&src).await {
                        Ok(Some(event)) => {
                            self.count.record(&event);
                            return Some(Ok(event));
                        }
                        Ok(None) => {}
                        Err(e) => return Some(Err(self.recover(&src.key, e))),
                    }
                }
            }
        }
    }

    fn finish(&mut self) -> Option<Result<DiffEvent>> {
        debug!(count = ?self.count, "Pass complete");
        self.phase = Phase::Done;
        None
    }

    /// Bring one destination key in line with its source entry.
    async fn sync_entry(&self, src: &Entry) -> Result<Option<DiffEvent>> {
        let key = KeyPath::new(&src.key);
        let dst = self.destination.entry(&key, self.options.lookup()).await?;
        apply(self.source, Some(src), self.destination, dst.as_ref(), &key, self.options.dry_run).await
    }

    async fn pending_removals(&self) -> Result<VecDeque<Entry>> {
        let existing = self
            .destination
            .list(&self.options.prefix, &self.options.filter)
            .await?;
        Ok(existing
            .into_iter()
            .filter(|entry| !self.seen.contains(&entry.key))
            .collect())
    }

    fn abort(&mut self, error: Error) -> Error {
        self.phase = Phase::Done;
        error
    }

    fn recover(&mut self, key: &str, error: Error) -> Error {
        if error.aborts_pass() {
            return self.abort(error);
        }
        warn!(key, error = %error, "Skipping key");
        error
    }

    /// Adapt the pass into a stream of results. The final count is lost; use
    /// [`next`](Self::next) directly when it is needed.
    pub fn into_stream(self) -> impl Stream<Item = Result<DiffEvent>> + 'a
    where
        S: 'a,
        D: 'a,
    {
        futures::stream::unfold(self, |mut pass| async move {
            let item = pass.next().await?;
            Some((item, pass))
        })
    }
}

/// Reconcile one key given both sides' entries.
async fn apply<S, D>(
    source: &S,
    src: Option<&Entry>,
    destination: &D,
    dst: Option<&Entry>,
    key: &KeyPath,
    dry_run: bool,
) -> Result<Option<DiffEvent>>
where
    S: DriveOps + ?Sized,
    D: DriveOps + ?Sized,
{
    let event = match (src, dst) {
        (None, None) => return Ok(None),
        (None, Some(dst)) => {
            if !dry_run {
                destination.del(key).await?;
            }
            return Ok(Some(DiffEvent::remove(key.as_str(), dst.blob_length())));
        }
        (Some(src), None) => DiffEvent::add(key.as_str(), src.blob_length()),
        (Some(src), Some(dst)) => {
            if same(source, Some(src), destination, Some(dst)).await? {
                return Ok(None);
            }
            DiffEvent::change(key.as_str(), src.blob_length(), dst.blob_length())
        }
    };

    if !dry_run {
        if let Some(src) = src {
            copy_entry(source, destination, key, src).await?;
        }
    }
    Ok(Some(event))
}

/// Reconcile a single key, as reported by an exact change notification.
///
/// Keys outside the prefix or rejected by the filter are ignored.
pub async fn apply_key<S, D>(
    source: &S,
    destination: &D,
    key: &KeyPath,
    options: &PassOptions,
) -> Result<Option<DiffEvent>>
where
    S: DriveOps + ?Sized,
    D: DriveOps + ?Sized,
{
    if !options.covers(key) {
        return Ok(None);
    }
    let src = source.entry(key, options.lookup()).await?;
    let dst = destination.entry(key, options.lookup()).await?;
    apply(source, src.as_ref(), destination, dst.as_ref(), key, options.dry_run).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::{LocalDrive, WriteOptions};
    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    async fn seeded(files: &[(&str, &str)]) -> (TempDir, LocalDrive, LocalDrive) {
        let temp = TempDir::new().unwrap();
        let src = LocalDrive::new(temp.path().join("src"));
        let dst = LocalDrive::new(temp.path().join("dst"));
        for (key, content) in files {
            src.put(&KeyPath::new(key), content.as_bytes(), WriteOptions::default())
                .await
                .unwrap();
        }
        (temp, src, dst)
    }

    async fn run(src: &LocalDrive, dst: &LocalDrive, options: &PassOptions) -> (Vec<DiffEvent>, Count) {
        let mut pass = mirror(src, dst, options);
        let mut events = Vec::new();
        while let Some(item) = pass.next().await {
            events.push(item.unwrap());
        }
        (events, pass.count())
    }

    #[tokio::test]
    async fn additions_then_removals_in_key_order() {
        let (_temp, src, dst) = seeded(&[("/b.txt", "bb"), ("/a.txt", "a")]).await;
        dst.put(&KeyPath::new("/z.txt"), b"zzz", WriteOptions::default())
            .await
            .unwrap();
        dst.put(&KeyPath::new("/c.txt"), b"c", WriteOptions::default())
            .await
            .unwrap();

        let (events, count) = run(&src, &dst, &PassOptions::default()).await;
        assert_eq!(
            events,
            vec![
                DiffEvent::add("/a.txt", 1),
                DiffEvent::add("/b.txt", 2),
                DiffEvent::remove("/c.txt", 1),
                DiffEvent::remove("/z.txt", 3),
            ]
        );
        assert_eq!(count.files, 2);
        assert_eq!((count.add, count.remove, count.change), (2, 2, 0));
    }

    #[tokio::test]
    async fn changed_content_reports_both_lengths() {
        let (_temp, src, dst) = seeded(&[("/f", "new content")]).await;
        dst.put(&KeyPath::new("/f"), b"old", WriteOptions::default())
            .await
            .unwrap();

        let (events, _) = run(&src, &dst, &PassOptions::default()).await;
        assert_eq!(events, vec![DiffEvent::change("/f", 11, 3)]);
        let entry = dst.entry(&KeyPath::new("/f"), EntryOptions::default()).await.unwrap().unwrap();
        let content = dst.read(&entry).await.unwrap().read_to_end().await.unwrap();
        assert_eq!(content, b"new content");
    }

    #[tokio::test]
    async fn prefix_limits_both_sides() {
        let (_temp, src, dst) = seeded(&[("/docs/a.md", "a"), ("/other.txt", "o")]).await;
        dst.put(&KeyPath::new("/keep.txt"), b"k", WriteOptions::default())
            .await
            .unwrap();
        let options = PassOptions {
            prefix: KeyPath::new("/docs"),
            ..Default::default()
        };

        let (events, count) = run(&src, &dst, &options).await;
        assert_eq!(events, vec![DiffEvent::add("/docs/a.md", 1)]);
        assert_eq!(count.files, 1);
        assert!(
            dst.entry(&KeyPath::new("/keep.txt"), EntryOptions::default())
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn stream_yields_the_same_events() {
        let (_temp, src, dst) = seeded(&[("/one", "1"), ("/two", "2")]).await;
        let options = PassOptions::default();
        let events: Vec<_> = mirror(&src, &dst, &options)
            .into_stream()
            .map(|item| item.unwrap().key)
            .collect()
            .await;
        assert_eq!(events, vec!["/one", "/two"]);
    }

    #[tokio::test]
    async fn apply_key_handles_each_side() {
        let (_temp, src, dst) = seeded(&[("/a", "a")]).await;
        let options = PassOptions::default();
        let key = KeyPath::new("/a");

        let added = apply_key(&src, &dst, &key, &options).await.unwrap();
        assert_eq!(added, Some(DiffEvent::add("/a", 1)));
        assert_eq!(apply_key(&src, &dst, &key, &options).await.unwrap(), None);

        src.del(&key).await.unwrap();
        let removed = apply_key(&src, &dst, &key, &options).await.unwrap();
        assert_eq!(removed, Some(DiffEvent::remove("/a", 1)));
        assert_eq!(apply_key(&src, &dst, &key, &options).await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_replaces_destination_directory() {
        let (_temp, src, dst) = seeded(&[("/a", "file")]).await;
        dst.put(&KeyPath::new("/a/b"), b"bb", WriteOptions::default())
            .await
            .unwrap();

        let (events, count) = run(&src, &dst, &PassOptions::default()).await;
        assert_eq!(events, vec![DiffEvent::remove("/a/b", 2), DiffEvent::add("/a", 4)]);
        assert_eq!((count.files, count.add, count.remove), (1, 1, 1));

        let entry = dst.entry(&KeyPath::new("/a"), EntryOptions::default()).await.unwrap().unwrap();
        let content = dst.read(&entry).await.unwrap().read_to_end().await.unwrap();
        assert_eq!(content, b"file");
        let (again, _) = run(&src, &dst, &PassOptions::default()).await;
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn directory_replaces_destination_file() {
        let (_temp, src, dst) = seeded(&[("/a/b", "nested")]).await;
        dst.put(&KeyPath::new("/a"), b"flat", WriteOptions::default())
            .await
            .unwrap();

        let (events, count) = run(&src, &dst, &PassOptions::default()).await;
        assert_eq!(events, vec![DiffEvent::remove("/a", 4), DiffEvent::add("/a/b", 6)]);
        assert_eq!((count.files, count.add, count.remove), (1, 1, 1));
        let listed: Vec<_> = dst
            .list(&KeyPath::root(), &Filter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.key)
            .collect();
        assert_eq!(listed, vec!["/a/b"]);
    }

    #[tokio::test]
    async fn closed_destination_aborts_the_pass() {
        let (_temp, src, dst) = seeded(&[("/a", "a"), ("/b", "b")]).await;
        dst.release();
        let options = PassOptions::default();
        let mut pass = mirror(&src, &dst, &options);
        assert!(matches!(pass.next().await, Some(Err(Error::SessionClosed))));
        assert!(pass.next().await.is_none());
    }
}
