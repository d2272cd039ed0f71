//! Live mirroring of a local directory through the filesystem watcher

use std::sync::Arc;
use std::time::Duration;

use drive_core::{DiffOp, DriveStore, MirrorOptions, MirrorSession, RecordingObserver, SessionReport, WatchConfig};
use drive_test_utils::TestDir;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(15);

struct Running {
    observer: Arc<RecordingObserver>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<drive_core::Result<SessionReport>>,
}

fn spawn(session: MirrorSession) -> Running {
    let observer = Arc::new(RecordingObserver::new());
    let cancel = CancellationToken::new();
    let task = {
        let observer = Arc::clone(&observer);
        let cancel = cancel.clone();
        tokio::spawn(async move { session.run(&*observer, cancel).await })
    };
    Running {
        observer,
        cancel,
        task,
    }
}

impl Running {
    async fn stop(self) -> SessionReport {
        self.cancel.cancel();
        self.task.await.unwrap().unwrap()
    }
}

/// Move a fully written file into place so the watcher never sees it half written.
fn drop_in(dir: &TestDir, relative: &str, content: &str) {
    let staged = dir.write(&format!("staging/{relative}"), content);
    let target = dir.path(relative);
    std::fs::create_dir_all(target.parent().unwrap()).unwrap();
    std::fs::rename(staged, target).unwrap();
}

fn live() -> MirrorOptions {
    MirrorOptions {
        live: true,
        ..Default::default()
    }
}

async fn open_live(dir: &TestDir, store: &DriveStore, watch: WatchConfig) -> Running {
    let session = MirrorSession::open(
        store,
        &dir.arg("src"),
        Some(dir.arg("dst").as_str()),
        &live(),
        watch,
    )
    .await
    .unwrap();
    spawn(session)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_file_added_during_mirror_is_added_once() {
    let dir = TestDir::new();
    dir.write("src/init-file.txt", "Just an initial file");
    let store = DriveStore::new(dir.path("store"));
    let running = open_live(&dir, &store, WatchConfig::default()).await;

    assert!(running.observer.wait_for(WAIT, |o| !o.summaries().is_empty()).await);
    let summary = running.observer.summaries()[0];
    assert_eq!(summary.count.files, 1);
    assert_eq!(summary.count.add, 1);
    assert_eq!(summary.to_string(), "Total files: 1 (+1 -0 ~0)");

    drop_in(&dir, "src/new-file.txt", "file added during mirror");
    let arrived = running
        .observer
        .wait_for(WAIT, |o| !o.events_for("/new-file.txt", DiffOp::Add).is_empty())
        .await;
    assert!(arrived, "events: {:?}", running.observer.events());

    // later passes over the same state add nothing
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(running.observer.events_for("/new-file.txt", DiffOp::Add).len(), 1);
    assert_eq!(dir.read("dst/new-file.txt"), "file added during mirror");

    assert!(running.observer.errors().is_empty());

    let report = running.stop().await;
    assert!(report.stopped);
    assert!(report.passes >= 2);
    assert_eq!(report.total.remove, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_deleted_and_changed_files_follow() {
    let dir = TestDir::new();
    dir.write("src/keep.txt", "v1");
    dir.write("src/gone.txt", "bye");
    let store = DriveStore::new(dir.path("store"));
    let running = open_live(&dir, &store, WatchConfig::default()).await;
    assert!(running.observer.wait_for(WAIT, |o| !o.summaries().is_empty()).await);

    dir.remove("src/gone.txt");
    drop_in(&dir, "src/keep.txt", "version two");

    let converged = running
        .observer
        .wait_for(WAIT, |_| dir.files("dst") == dir.files("src"))
        .await;
    assert!(converged, "destination: {:?}", dir.files("dst").keys().collect::<Vec<_>>());
    assert_eq!(running.observer.events_for("/gone.txt", DiffOp::Remove).len(), 1);
    assert!(running.observer.errors().is_empty());

    running.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_coarse_watch_still_converges() {
    let dir = TestDir::new();
    dir.mkdir("src");
    let store = DriveStore::new(dir.path("store"));
    let watch = WatchConfig {
        incremental: false,
        ..Default::default()
    };
    let running = open_live(&dir, &store, watch).await;
    assert!(running.observer.wait_for(WAIT, |o| !o.summaries().is_empty()).await);
    assert_eq!(running.observer.summaries()[0].count.files, 0);

    for name in ["a", "b", "c"] {
        drop_in(&dir, &format!("src/docs/{name}.md"), name);
    }
    let converged = running
        .observer
        .wait_for(WAIT, |_| dir.files("dst").len() == 3)
        .await;
    assert!(converged);
    dir.assert_same_files("src", "dst");

    running.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_control_paths_never_cross() {
    let dir = TestDir::new();
    dir.write("src/a.txt", "a");
    let store = DriveStore::new(dir.path("store"));
    let running = open_live(&dir, &store, WatchConfig::default()).await;
    assert!(running.observer.wait_for(WAIT, |o| !o.summaries().is_empty()).await);

    drop_in(&dir, "src/.git/HEAD", "ref: refs/heads/main");
    drop_in(&dir, "src/b.txt", "b");
    assert!(
        running
            .observer
            .wait_for(WAIT, |_| dir.path("dst/b.txt").exists())
            .await
    );
    dir.assert_file_not_exists("dst/.git/HEAD");
    assert!(running.observer.events().iter().all(|e| !e.key.contains(".git")));

    running.stop().await;
}
