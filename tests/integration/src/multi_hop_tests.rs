//! Mirroring through a keyed drive: directory to tree to directory

use std::sync::Arc;
use std::time::Duration;

use drive_core::{
    Drive, DriveOps, DriveStore, LogObserver, MirrorOptions, MirrorSession, RecordingObserver, WatchConfig,
};
use drive_test_utils::TestDir;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(15);

/// One-shot mirror. Returns the destination key when it is a keyed drive.
async fn mirror_once(
    store: &DriveStore,
    source: &str,
    destination: Option<&str>,
    options: MirrorOptions,
) -> Option<String> {
    let session = MirrorSession::open(store, source, destination, &options, WatchConfig::default())
        .await
        .unwrap();
    let key = session.destination().key().map(|key| key.encode());
    session.run(&LogObserver, CancellationToken::new()).await.unwrap();
    key
}

fn key_of(drive: &Drive) -> String {
    drive.key().expect("keyed drive").encode()
}

#[tokio::test]
async fn test_directory_through_tree_to_directory() {
    let dir = TestDir::new();
    dir.write("src/index.html", "<h1>home</h1>");
    dir.write("src/assets/app.js", "console.log(1)");
    dir.write("src/node_modules/.package-lock.json", "{}");
    let store = DriveStore::new(dir.path("store"));

    let key = mirror_once(&store, &dir.arg("src"), None, MirrorOptions::default())
        .await
        .unwrap();
    mirror_once(&store, &key, Some(dir.arg("out").as_str()), MirrorOptions::default()).await;

    dir.assert_same_files("src/assets", "out/assets");
    dir.assert_file_contains("out/index.html", "<h1>home</h1>");
    dir.assert_file_not_exists("out/node_modules/.package-lock.json");
}

#[tokio::test]
async fn test_checkout_restores_an_earlier_snapshot() {
    let dir = TestDir::new();
    dir.write("src/a.txt", "first");
    let store = DriveStore::new(dir.path("store"));

    let key = mirror_once(&store, &dir.arg("src"), None, MirrorOptions::default())
        .await
        .unwrap();
    let first = dir.files("src");

    dir.write("src/a.txt", "second");
    dir.write("src/b.txt", "added");
    mirror_once(&store, &dir.arg("src"), Some(&key), MirrorOptions::default()).await;

    let at_one = MirrorOptions {
        version: Some(1),
        ..Default::default()
    };
    mirror_once(&store, &key, Some(dir.arg("old").as_str()), at_one).await;
    mirror_once(&store, &key, Some(dir.arg("new").as_str()), MirrorOptions::default()).await;

    assert_eq!(dir.files("old"), first);
    dir.assert_same_files("src", "new");
}

#[tokio::test]
async fn test_prefix_mirrors_a_subtree() {
    let dir = TestDir::new();
    dir.write("src/docs/guide.md", "guide");
    dir.write("src/docs/api/index.md", "api");
    dir.write("src/readme.md", "readme");
    let store = DriveStore::new(dir.path("store"));

    let options = MirrorOptions {
        prefix: Some("/docs".into()),
        ..Default::default()
    };
    let key = mirror_once(&store, &dir.arg("src"), None, options).await.unwrap();
    let tree = store.resolve(Some(&key)).await.unwrap();
    let keys: Vec<String> = tree
        .list(&drive_core::KeyPath::root(), &drive_core::Filter::default())
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.key)
        .collect();
    assert_eq!(keys, vec!["/docs/api/index.md", "/docs/guide.md"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_live_chain_propagates_writes() {
    let dir = TestDir::new();
    dir.write("src/start.txt", "start");
    let store = DriveStore::new(dir.path("store"));
    let live = MirrorOptions {
        live: true,
        ..Default::default()
    };

    let upstream = MirrorSession::open(&store, &dir.arg("src"), None, &live, WatchConfig::default())
        .await
        .unwrap();
    let key = key_of(upstream.destination());
    let downstream = MirrorSession::open(&store, &key, Some(dir.arg("out").as_str()), &live, WatchConfig::default())
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let observer = Arc::new(RecordingObserver::new());
    let up = tokio::spawn({
        let cancel = cancel.clone();
        async move { upstream.run(&LogObserver, cancel).await }
    });
    let down = tokio::spawn({
        let cancel = cancel.clone();
        let observer = Arc::clone(&observer);
        async move { downstream.run(&*observer, cancel).await }
    });

    let staged = dir.write("staging/late.txt", "late arrival");
    std::fs::rename(staged, dir.path("src/late.txt")).unwrap();

    let converged = observer
        .wait_for(WAIT, |_| dir.files("out").len() == 2 && dir.path("out/late.txt").exists())
        .await;
    assert!(converged, "out: {:?}", dir.files("out").keys().collect::<Vec<_>>());
    dir.assert_same_files("src", "out");

    cancel.cancel();
    assert!(up.await.unwrap().unwrap().stopped);
    assert!(down.await.unwrap().unwrap().stopped);
}
