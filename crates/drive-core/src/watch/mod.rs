//! Change notifications
//!
//! Every backend's change signal is normalized into [`TriggerBatch`]es on a
//! bounded channel:
//!
//! - local directories: recursive filesystem watch, exact keys for file
//!   writes and a resync for anything structural
//! - keyed trees: version growth, reported as the exact keys appended since
//!   the last batch (incremental) or as a resync; appends by other processes
//!   are read in when the tree's log file changes
//! - pinned checkouts: never change, so never trigger
//!
//! A full channel is not an error: the dropped batches collapse into one
//! resync on the next receive.

mod fs;
mod tree;

pub use fs::classify;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use drive_fs::KeyPath;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::Result;
use crate::drive::{Drive, KeyedDrive};

/// Something changed in a watched drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerBatch {
    /// Exactly these keys changed
    Keys(BTreeSet<KeyPath>),
    /// Unknown extent; the next pass must re-walk the tree
    Resync,
}

/// Options for [`subscribe`].
#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    /// Start watching immediately instead of on the first [`Subscription::next`]
    pub eager_open: bool,
    /// Report appended keys instead of a resync for keyed trees
    pub incremental: bool,
    /// Queued batches before overflow collapses them into a resync
    pub capacity: usize,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            eager_open: true,
            incremental: true,
            capacity: 64,
        }
    }
}

/// Producer half handed to a watch backend.
#[derive(Debug, Clone)]
pub(crate) struct TriggerSender {
    tx: mpsc::Sender<TriggerBatch>,
    overflow: Arc<AtomicBool>,
}

impl TriggerSender {
    pub(crate) fn send(&self, batch: TriggerBatch) {
        match self.tx.try_send(batch) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.overflow.store(true, Ordering::SeqCst);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// Keeps a watch backend alive; dropping it stops the backend.
pub(crate) struct WatchGuard {
    _watcher: Option<notify::RecommendedWatcher>,
    _task: Option<AbortOnDrop>,
}

impl WatchGuard {
    pub(crate) fn watcher(watcher: notify::RecommendedWatcher) -> Self {
        Self {
            _watcher: Some(watcher),
            _task: None,
        }
    }

    pub(crate) fn task(handle: JoinHandle<()>) -> Self {
        Self {
            _watcher: None,
            _task: Some(AbortOnDrop(handle)),
        }
    }

    pub(crate) fn with_watcher(mut self, watcher: Option<notify::RecommendedWatcher>) -> Self {
        self._watcher = watcher;
        self
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

enum Source {
    Fs { root: PathBuf, prefix: KeyPath },
    Tree { drive: KeyedDrive, prefix: KeyPath, incremental: bool },
    /// Pinned checkouts never change
    Fixed,
}

/// Stream of trigger batches for one drive.
pub struct Subscription {
    rx: mpsc::Receiver<TriggerBatch>,
    sender: Option<TriggerSender>,
    overflow: Arc<AtomicBool>,
    source: Option<Source>,
    _guard: Option<WatchGuard>,
    fixed: bool,
}

/// Watch `drive` for changes at or below `prefix`.
pub async fn subscribe(drive: &Drive, prefix: &KeyPath, options: WatchOptions) -> Result<Subscription> {
    let source = match drive {
        Drive::Local(local) => Source::Fs {
            root: local.root().to_path_buf(),
            prefix: prefix.clone(),
        },
        Drive::Keyed(keyed) if keyed.is_pinned() => Source::Fixed,
        Drive::Keyed(keyed) => Source::Tree {
            drive: keyed.clone(),
            prefix: prefix.clone(),
            incremental: options.incremental,
        },
    };

    let (tx, rx) = mpsc::channel(options.capacity.max(1));
    let overflow = Arc::new(AtomicBool::new(false));
    let mut subscription = Subscription {
        rx,
        sender: Some(TriggerSender {
            tx,
            overflow: Arc::clone(&overflow),
        }),
        overflow,
        source: Some(source),
        _guard: None,
        fixed: false,
    };
    if options.eager_open {
        subscription.open()?;
    }
    Ok(subscription)
}

impl Subscription {
    fn open(&mut self) -> Result<()> {
        let (Some(source), Some(sender)) = (self.source.take(), self.sender.take()) else {
            return Ok(());
        };
        match source {
            Source::Fs { root, prefix } => {
                debug!(root = %root.display(), prefix = %prefix, "Watching directory");
                self._guard = Some(fs::open(root, prefix, sender)?);
            }
            Source::Tree {
                drive,
                prefix,
                incremental,
            } => {
                debug!(key = %drive.key(), prefix = %prefix, incremental, "Watching tree");
                self._guard = Some(tree::open(&drive, prefix, incremental, sender));
            }
            Source::Fixed => {
                debug!("Pinned checkout, no changes to watch");
                self.fixed = true;
            }
        }
        Ok(())
    }

    /// Wait for the next batch. `None` once the backend has stopped.
    pub async fn next(&mut self) -> Option<TriggerBatch> {
        if let Err(e) = self.open() {
            warn!(error = %e, "Failed to start watching");
            return None;
        }
        if self.fixed {
            return std::future::pending().await;
        }
        let batch = self.rx.recv().await?;
        if self.overflow.swap(false, Ordering::SeqCst) {
            debug!("Trigger channel overflowed, resyncing");
            return Some(TriggerBatch::Resync);
        }
        Some(batch)
    }
}
