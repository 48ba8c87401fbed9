use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use softshelf::config::{Config, ConfigLoader};
use softshelf::error::ShelfError;

#[test]
fn environment_beats_config_file_for_base_url() {
    let config = Config {
        base_url: Some("http://from-config:9000/".to_string()),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(
        config,
        Utf8PathBuf::from("/data"),
        Some("http://from-env:8080/".to_string()),
    );
    assert_eq!(resolved.base_url, "http://from-env:8080");
}

#[test]
fn config_values_override_defaults() {
    let config = Config {
        base_url: Some("http://store.local".to_string()),
        install_root: Some(Utf8PathBuf::from("/opt/apps")),
        ledger_path: Some(Utf8PathBuf::from("/var/lib/shelf.json")),
        shortcut_dir: Some(Utf8PathBuf::from("/home/u/.local/share/applications")),
        timeout_secs: Some(0),
        harden_archive_paths: Some(true),
    };
    let resolved = ConfigLoader::resolve_config(config, Utf8PathBuf::from("/data"), None);

    assert_eq!(resolved.base_url, "http://store.local");
    assert_eq!(resolved.install_root, Utf8PathBuf::from("/opt/apps"));
    assert_eq!(resolved.ledger_path, Utf8PathBuf::from("/var/lib/shelf.json"));
    assert!(resolved.shortcut_dir.is_some());
    assert_eq!(resolved.timeout, None);
    assert!(resolved.harden_archive_paths);
}

#[test]
fn explicit_config_file_is_read() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("softshelf.json");
    fs::write(&path, r#"{"install_root": "/srv/apps", "timeout_secs": 5}"#).unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.install_root, Utf8PathBuf::from("/srv/apps"));
    assert_eq!(resolved.timeout, Some(Duration::from_secs(5)));
}

#[test]
fn unknown_config_key_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("softshelf.json");
    fs::write(&path, r#"{"install_dir": "/srv/apps"}"#).unwrap();

    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(ShelfError::ConfigParse(_))
    );
}

#[test]
fn missing_explicit_config_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");

    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(ShelfError::ConfigRead(_))
    );
}
