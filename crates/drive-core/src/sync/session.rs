//! Mirror sessions
//!
//! A [`MirrorSession`] owns the handles of one source/destination pair. It
//! runs one full pass, reports the summary, and in live mode keeps the
//! destination in line with the source until cancelled.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;

use drive_fs::KeyPath;
use futures::future::OptionFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{SyncState, Teardown};
use crate::config::{MirrorOptions, ValidatedMirror, WatchConfig};
use crate::drive::{Drive, DriveId, DriveKey, DriveOps, DriveStore};
use crate::entry::Count;
use crate::mirror::{apply_key, mirror};
use crate::report::{MirrorObserver, Summary};
use crate::watch::{self, TriggerBatch};
use crate::{Error, Result};

type PassFuture<'a> = Pin<Box<dyn Future<Output = Result<Count>> + Send + 'a>>;

/// Totals of a finished session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// Completed passes, full or per-key
    pub passes: u64,
    /// Count of the first full pass
    pub first: Count,
    /// Sum over every pass
    pub total: Count,
    /// The session ended through cancellation
    pub stopped: bool,
}

impl SessionReport {
    fn record(&mut self, count: &Count) {
        if self.passes == 0 {
            self.first = *count;
        }
        self.passes += 1;
        self.total.absorb(count);
    }
}

/// One source/destination pair and the handles opened for it.
pub struct MirrorSession {
    source: Drive,
    destination: Drive,
    options: ValidatedMirror,
    watch: WatchConfig,
    teardown: Teardown,
}

impl std::fmt::Debug for MirrorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorSession")
            .field("source", &self.source.label())
            .field("destination", &self.destination.label())
            .field("live", &self.options.live)
            .finish()
    }
}

impl MirrorSession {
    /// Validate everything, then open both drives.
    ///
    /// An absent destination creates a new writable tree in `store`. Nothing
    /// is opened when validation fails; anything opened before a later
    /// failure is released again.
    pub async fn open(
        store: &DriveStore,
        source: &str,
        destination: Option<&str>,
        options: &MirrorOptions,
        watch: WatchConfig,
    ) -> Result<Self> {
        let validated = options.validate()?;
        for identifier in [Some(source), destination] {
            if let DriveId::Key(encoded) = DriveId::classify(identifier) {
                DriveKey::decode(&encoded)?;
            }
        }

        let teardown = Teardown::new();

        let source = store.resolve(Some(source)).await?;
        teardown.push(source.clone());
        source.ready().await?;
        if let Drive::Local(local) = &source {
            if !local.root_exists().await {
                if !validated.live {
                    return Err(Error::StorageUnavailable {
                        path: local.root().to_path_buf(),
                        reason: "source directory does not exist".into(),
                    });
                }
                warn!(root = %local.root().display(), "Source does not exist yet, waiting for it");
            }
        }

        // Pinned before the destination is resolved, which may create a tree
        let source = match validated.version {
            Some(version) => {
                let pinned = source.checkout(version)?;
                teardown.push(pinned.clone());
                pinned
            }
            None => source,
        };

        let destination = store.resolve(destination).await?;
        teardown.push(destination.clone());
        destination.ready().await?;
        if !validated.pass.dry_run && !destination.writable() {
            return Err(Error::ReadOnly {
                drive: destination.label(),
            });
        }

        if validated.pass.dry_run {
            info!("Dry run, the destination will not be modified");
        }
        debug!(
            source = %source.label(),
            destination = %destination.label(),
            live = validated.live,
            "Session opened"
        );

        Ok(Self {
            source,
            destination,
            options: validated,
            watch,
            teardown,
        })
    }

    pub fn source(&self) -> &Drive {
        &self.source
    }

    pub fn destination(&self) -> &Drive {
        &self.destination
    }

    /// Run until the work is done or `cancel` fires.
    ///
    /// Handles are released on every exit path. Cancellation errors raised
    /// by in-flight work after `cancel` fired are not failures.
    pub async fn run(self, observer: &dyn MirrorObserver, cancel: CancellationToken) -> Result<SessionReport> {
        let mut report = SessionReport::default();
        let outcome = self.drive(observer, &cancel, &mut report).await;
        self.teardown.release();

        match outcome {
            Ok(()) => Ok(report),
            Err(e) if e.is_cancellation() && cancel.is_cancelled() => {
                debug!(error = %e, "Ignoring error from cancelled work");
                report.stopped = true;
                Ok(report)
            }
            Err(e) => Err(e),
        }
    }

    async fn drive(
        &self,
        observer: &dyn MirrorObserver,
        cancel: &CancellationToken,
        report: &mut SessionReport,
    ) -> Result<()> {
        // Subscribed before the first pass so changes made during it are seen
        let mut subscription = if self.options.live {
            Some(watch::subscribe(&self.source, &self.options.pass.prefix, self.watch.options()).await?)
        } else {
            None
        };

        let first = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                report.stopped = true;
                return Ok(());
            }
            count = self.full_pass(observer) => count?,
        };
        report.record(&first);
        observer.on_summary(&Summary {
            count: first,
            version: self.destination.version(),
        });

        let Some(subscription) = subscription.as_mut() else {
            return Ok(());
        };

        let mut state = SyncState::Idle;
        let mut in_flight: Option<PassFuture<'_>> = None;
        let mut watching = true;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    state = state.on_cancel().next;
                    debug!(%state, "Session cancelled");
                    report.stopped = true;
                    return Ok(());
                }
                Some(outcome) = OptionFuture::from(in_flight.as_mut()) => {
                    in_flight = None;
                    match outcome {
                        Ok(count) => report.record(&count),
                        Err(e) if e.is_cancellation() => return Err(e),
                        Err(e) => {
                            warn!(error = %e, "Pass aborted");
                            observer.on_error(&e);
                        }
                    }
                    let transition = state.on_pass_complete();
                    if transition.start_pass {
                        debug!("Running pass for coalesced triggers");
                        in_flight = Some(Box::pin(self.full_pass(observer)));
                    }
                    state = transition.next;
                }
                batch = subscription.next(), if watching => {
                    let Some(batch) = batch else {
                        warn!("Change notifications ended");
                        watching = false;
                        if !state.is_busy() {
                            return Ok(());
                        }
                        continue;
                    };
                    let transition = state.on_trigger();
                    if transition.start_pass {
                        in_flight = Some(self.pass_for(batch, observer));
                    } else {
                        debug!(%state, "Pass in flight, coalescing trigger");
                    }
                    state = transition.next;
                }
            }

            if !watching && !state.is_busy() {
                return Ok(());
            }
        }
    }

    /// Exact keys take the per-key path; anything coarse re-walks the tree.
    fn pass_for<'a>(&'a self, batch: TriggerBatch, observer: &'a dyn MirrorObserver) -> PassFuture<'a> {
        match batch {
            TriggerBatch::Keys(keys) if self.watch.incremental => Box::pin(self.key_pass(keys, observer)),
            _ => Box::pin(self.full_pass(observer)),
        }
    }

    async fn full_pass(&self, observer: &dyn MirrorObserver) -> Result<Count> {
        let mut pass = mirror(&self.source, &self.destination, &self.options.pass);
        while let Some(item) = pass.next().await {
            match item {
                Ok(event) => observer.on_diff(&event),
                Err(e) if e.aborts_pass() => return Err(e),
                Err(e) => observer.on_error(&e),
            }
        }
        Ok(pass.count())
    }

    async fn key_pass(&self, keys: BTreeSet<KeyPath>, observer: &dyn MirrorObserver) -> Result<Count> {
        debug!(keys = keys.len(), "Applying changed keys");
        let mut count = Count::default();
        for key in &keys {
            match apply_key(&self.source, &self.destination, key, &self.options.pass).await {
                Ok(Some(event)) => {
                    count.record(&event);
                    observer.on_diff(&event);
                }
                Ok(None) => {}
                Err(e) if e.aborts_pass() => return Err(e),
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping key");
                    observer.on_error(&e);
                }
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::{KeyedDrive, WriteOptions};
    use crate::entry::DiffOp;
    use crate::report::RecordingObserver;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(10);

    fn write(root: &std::path::Path, key: &str, content: &str) {
        let path = root.join(key.trim_start_matches('/'));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    async fn keyed(store: &DriveStore) -> KeyedDrive {
        store.create().await.unwrap()
    }

    #[tokio::test]
    async fn one_shot_mirror_reports_summary() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        write(&src, "a.txt", "alpha");
        write(&src, "dir/b.txt", "beta");
        let store = DriveStore::new(temp.path().join("store"));

        let session = MirrorSession::open(
            &store,
            src.to_str().unwrap(),
            None,
            &MirrorOptions::default(),
            WatchConfig::default(),
        )
        .await
        .unwrap();
        let destination = session.destination().clone();
        let observer = RecordingObserver::new();
        let report = session.run(&observer, CancellationToken::new()).await.unwrap();

        assert_eq!(report.passes, 1);
        assert_eq!(report.first.add, 2);
        assert!(!report.stopped);
        let summaries = observer.summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].count.files, 2);
        assert_eq!(summaries[0].version, 2);
        assert!(destination.is_closed());
    }

    #[tokio::test]
    async fn missing_source_is_fatal_without_live() {
        let temp = TempDir::new().unwrap();
        let store = DriveStore::new(temp.path().join("store"));
        let missing = temp.path().join("missing");
        let err = MirrorSession::open(
            &store,
            missing.to_str().unwrap(),
            Some(temp.path().join("dst").to_str().unwrap()),
            &MirrorOptions::default(),
            WatchConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable { .. }));
    }

    #[tokio::test]
    async fn invalid_input_opens_nothing() {
        let temp = TempDir::new().unwrap();
        let store = DriveStore::new(temp.path().join("store"));
        let bad_key = "z".repeat(51) + "!";
        let err = MirrorSession::open(&store, temp.path().to_str().unwrap(), Some(bad_key.as_str()), &MirrorOptions::default(), WatchConfig::default())
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let options = MirrorOptions {
            version: Some(0),
            ..Default::default()
        };
        let err = MirrorSession::open(&store, temp.path().to_str().unwrap(), None, &options, WatchConfig::default())
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(store.list_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_checkout_creates_no_destination_tree() {
        let temp = TempDir::new().unwrap();
        let store = DriveStore::new(temp.path().join("store"));
        let source = keyed(&store).await;
        source.put(&KeyPath::new("/a.txt"), b"a", WriteOptions::default()).await.unwrap();
        let before = store.list_keys().await.unwrap();
        assert_eq!(before.len(), 1);

        let options = MirrorOptions {
            version: Some(99),
            ..Default::default()
        };
        let err = MirrorSession::open(&store, &source.key().encode(), None, &options, WatchConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidVersion { .. }));
        assert_eq!(store.list_keys().await.unwrap(), before);
    }

    #[tokio::test]
    async fn checkout_of_local_source_is_rejected() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        write(&src, "a", "a");
        let store = DriveStore::new(temp.path().join("store"));
        let options = MirrorOptions {
            version: Some(1),
            ..Default::default()
        };
        let err = MirrorSession::open(&store, src.to_str().unwrap(), None, &options, WatchConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotVersioned { .. }));
        assert!(store.list_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_only_destination_needs_dry_run() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        write(&src, "a", "a");
        let store = DriveStore::new(temp.path().join("store"));
        let foreign = DriveKey::generate().encode();

        let err = MirrorSession::open(&store, src.to_str().unwrap(), Some(foreign.as_str()), &MirrorOptions::default(), WatchConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReadOnly { .. }));

        let options = MirrorOptions {
            dry_run: true,
            ..Default::default()
        };
        let session = MirrorSession::open(&store, src.to_str().unwrap(), Some(foreign.as_str()), &options, WatchConfig::default())
            .await
            .unwrap();
        let observer = RecordingObserver::new();
        let report = session.run(&observer, CancellationToken::new()).await.unwrap();
        assert_eq!(report.first.add, 1);
    }

    #[tokio::test]
    async fn live_session_applies_changes_until_cancelled() {
        let temp = TempDir::new().unwrap();
        let store = DriveStore::new(temp.path().join("store"));
        let source = keyed(&store).await;
        source.put(&KeyPath::new("/a.txt"), b"a", WriteOptions::default()).await.unwrap();
        let dst = temp.path().join("dst");

        let options = MirrorOptions {
            live: true,
            ..Default::default()
        };
        let session = MirrorSession::open(
            &store,
            &source.key().encode(),
            Some(dst.to_str().unwrap()),
            &options,
            WatchConfig::default(),
        )
        .await
        .unwrap();

        let observer = Arc::new(RecordingObserver::new());
        let cancel = CancellationToken::new();
        let task = {
            let observer = Arc::clone(&observer);
            let cancel = cancel.clone();
            tokio::spawn(async move { session.run(&*observer, cancel).await })
        };

        assert!(observer.wait_for(WAIT, |o| !o.summaries().is_empty()).await);
        source.put(&KeyPath::new("/b.txt"), b"bee", WriteOptions::default()).await.unwrap();
        assert!(
            observer
                .wait_for(WAIT, |o| !o.events_for("/b.txt", DiffOp::Add).is_empty())
                .await
        );
        assert_eq!(std::fs::read_to_string(dst.join("b.txt")).unwrap(), "bee");

        source.del(&KeyPath::new("/a.txt")).await.unwrap();
        assert!(
            observer
                .wait_for(WAIT, |o| !o.events_for("/a.txt", DiffOp::Remove).is_empty())
                .await
        );
        assert!(!dst.join("a.txt").exists());

        cancel.cancel();
        let report = task.await.unwrap().unwrap();
        assert!(report.stopped);
        assert!(report.passes >= 3);
    }

    #[tokio::test]
    async fn cancel_before_first_pass_stops_cleanly() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        write(&src, "a", "a");
        let store = DriveStore::new(temp.path().join("store"));
        let session = MirrorSession::open(&store, src.to_str().unwrap(), None, &MirrorOptions::default(), WatchConfig::default())
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let observer = RecordingObserver::new();
        let report = session.run(&observer, cancel).await.unwrap();
        assert!(report.stopped);
        assert_eq!(report.passes, 0);
        assert!(observer.summaries().is_empty());
    }
}
