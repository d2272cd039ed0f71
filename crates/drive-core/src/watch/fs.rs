//! Filesystem watch for local drives

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use drive_fs::KeyPath;
use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use super::{TriggerBatch, TriggerSender, WatchGuard};
use crate::Result;

/// How often a missing root is checked for.
const ROOT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Start watching `root`. A missing root is waited for, then reported as a
/// resync once it appears.
pub(super) fn open(root: PathBuf, prefix: KeyPath, sender: TriggerSender) -> Result<WatchGuard> {
    if root.is_dir() {
        return Ok(WatchGuard::watcher(start(&root, prefix, sender)?));
    }

    debug!(root = %root.display(), "Watch target missing, waiting for it");
    let task = tokio::spawn(async move {
        while !tokio::fs::try_exists(&root).await.unwrap_or(false) {
            tokio::time::sleep(ROOT_POLL_INTERVAL).await;
        }
        match start(&root, prefix, sender.clone()) {
            Ok(watcher) => {
                sender.send(TriggerBatch::Resync);
                let _watcher = watcher;
                std::future::pending::<()>().await;
            }
            Err(e) => warn!(root = %root.display(), error = %e, "Failed to watch directory"),
        }
    });
    Ok(WatchGuard::task(task))
}

fn start(root: &Path, prefix: KeyPath, sender: TriggerSender) -> Result<RecommendedWatcher> {
    let base = dunce::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let handler_base = base.clone();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if let Some(batch) = classify(&event, &handler_base, &prefix) {
                    sender.send(batch);
                }
            }
            Err(e) => {
                warn!(error = %e, "Watch error, resyncing");
                sender.send(TriggerBatch::Resync);
            }
        },
        notify::Config::default(),
    )?;
    watcher.watch(&base, RecursiveMode::Recursive)?;
    Ok(watcher)
}

/// Normalize one filesystem event.
///
/// File-level creates, writes, metadata changes and removes yield the exact
/// keys below `prefix`. Directory and rename events, and anything the
/// platform cannot attribute, yield a resync when they touch the prefix.
/// Access events are ignored.
pub fn classify(event: &Event, root: &Path, prefix: &KeyPath) -> Option<TriggerBatch> {
    let exact = match event.kind {
        EventKind::Access(_) => return None,
        EventKind::Create(CreateKind::File)
        | EventKind::Modify(ModifyKind::Data(_))
        | EventKind::Modify(ModifyKind::Metadata(_))
        | EventKind::Remove(RemoveKind::File) => true,
        _ => false,
    };

    let keys: Vec<KeyPath> = event
        .paths
        .iter()
        .filter_map(|path| KeyPath::from_native(root, path))
        .collect();

    if exact {
        let keys: BTreeSet<KeyPath> = keys.into_iter().filter(|k| k.is_within(prefix)).collect();
        return (!keys.is_empty()).then_some(TriggerBatch::Keys(keys));
    }

    let touches_prefix = event.paths.is_empty()
        || keys
            .iter()
            .any(|key| key.is_within(prefix) || prefix.is_within(key));
    touches_prefix.then_some(TriggerBatch::Resync)
}
