use drive_fs::{ConfigStore, Error};
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde::{Deserialize, Serialize};
use std::fs;
use tempfile::TempDir;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct WatchSection {
    prefix: String,
    filter: Vec<String>,
    live: bool,
}

fn expected() -> WatchSection {
    WatchSection {
        prefix: "/docs".into(),
        filter: vec!["*.log".into(), "/tmp".into()],
        live: true,
    }
}

#[rstest]
#[case("mirror.toml", "prefix = \"/docs\"\nfilter = [\"*.log\", \"/tmp\"]\nlive = true\n")]
#[case("mirror.json", r#"{"prefix": "/docs", "filter": ["*.log", "/tmp"], "live": true}"#)]
#[case("mirror.yaml", "prefix: /docs\nfilter:\n  - \"*.log\"\n  - /tmp\nlive: true\n")]
#[case("mirror.YML", "prefix: /docs\nfilter: ['*.log', '/tmp']\nlive: true\n")]
fn loads_every_supported_format(#[case] name: &str, #[case] content: &str) {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join(name);
    fs::write(&path, content).unwrap();

    let loaded: WatchSection = ConfigStore::new().load(&path).unwrap();

    assert_eq!(loaded, expected());
}

#[test]
fn unknown_extension_is_rejected() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("mirror.ini");
    fs::write(&path, "live=true").unwrap();

    let result: drive_fs::Result<WatchSection> = ConfigStore::new().load(&path);

    assert!(matches!(result, Err(Error::UnsupportedFormat { extension }) if extension == "ini"));
}

#[test]
fn malformed_content_reports_format() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("mirror.json");
    fs::write(&path, "{ not json").unwrap();

    let result: drive_fs::Result<WatchSection> = ConfigStore::new().load(&path);

    match result {
        Err(Error::ConfigParse { format, .. }) => assert_eq!(format, "JSON"),
        other => panic!("expected ConfigParse, got {:?}", other),
    }
}

#[test]
fn saved_config_loads_back() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nested").join("mirror.toml");
    let store = ConfigStore::new();

    store.save(&path, &expected()).unwrap();
    let loaded: WatchSection = store.load(&path).unwrap();

    assert_eq!(loaded, expected());
}

#[test]
fn missing_file_is_io_error() {
    let temp = TempDir::new().unwrap();
    let result: drive_fs::Result<WatchSection> =
        ConfigStore::new().load(&temp.path().join("absent.toml"));

    assert!(matches!(result, Err(Error::Io { .. })));
}
