//! Version watch for keyed trees
//!
//! Appends made through this process arrive on the tree's version channel.
//! Appends made by another process are noticed by watching the tree's log
//! file and reading the new records into the shared tree.

use std::path::Path;
use std::sync::Arc;

use drive_fs::{KeyPath, StorePath};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use super::{TriggerBatch, TriggerSender, WatchGuard};
use crate::drive::KeyedDrive;

/// Report growth of `drive` from its current version on.
pub(super) fn open(drive: &KeyedDrive, prefix: KeyPath, incremental: bool, sender: TriggerSender) -> WatchGuard {
    let tree = Arc::clone(drive.tree());
    let mut versions = drive.subscribe_version();
    // Baseline taken now so appends before the first receive are not lost
    let mut seen = *versions.borrow_and_update();

    let log_changed = Arc::new(Notify::new());
    let watcher = match watch_log(tree.dir(), Arc::clone(&log_changed)) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            debug!(dir = %tree.dir().display(), error = %e, "Not watching tree log for other writers");
            None
        }
    };

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = versions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = log_changed.notified() => {
                    // Growth shows up on the version channel
                    if let Err(e) = tree.refresh().await {
                        warn!(key = %tree.key(), error = %e, "Failed to read tree log");
                    }
                    continue;
                }
            }

            let current = *versions.borrow_and_update();
            if current <= seen {
                continue;
            }
            trace!(from = seen, to = current, "Tree grew");
            let batch = if incremental {
                let keys: std::collections::BTreeSet<KeyPath> = tree
                    .changed_keys(seen, current)
                    .into_iter()
                    .filter(|key| key.is_within(&prefix))
                    .collect();
                if keys.is_empty() {
                    seen = current;
                    continue;
                }
                TriggerBatch::Keys(keys)
            } else {
                TriggerBatch::Resync
            };
            seen = current;
            sender.send(batch);
        }
    });
    WatchGuard::task(task).with_watcher(watcher)
}

/// Signal `log_changed` whenever the log file in `dir` is touched.
fn watch_log(dir: &Path, log_changed: Arc<Notify>) -> notify::Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            let touches_log = match &res {
                Ok(event) => event
                    .paths
                    .iter()
                    .any(|path| path.file_name().is_some_and(|name| name == StorePath::Log.as_str())),
                Err(_) => true,
            };
            if touches_log {
                log_changed.notify_one();
            }
        },
        notify::Config::default(),
    )?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}
