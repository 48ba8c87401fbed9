use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use chrono::NaiveDateTime;

use softshelf::domain::{
    CatalogEntry, InstallationState, InstalledRecord, PackageId, TIMESTAMP_FORMAT, now_timestamp,
};
use softshelf::error::{ErrorCategory, ShelfError};

fn entry(id: &str, version: &str) -> CatalogEntry {
    CatalogEntry {
        id: id.parse().unwrap(),
        name: id.to_string(),
        description: String::new(),
        version: version.to_string(),
        main_file: String::new(),
        icon: String::new(),
    }
}

fn installed(id: &str, version: &str) -> InstalledRecord {
    InstalledRecord {
        id: id.parse().unwrap(),
        name: id.to_string(),
        version: version.to_string(),
        dir_path: Utf8PathBuf::from(format!("/apps/{id}")),
        main_file: "bin/run".to_string(),
        icon_path: format!("{id}.png"),
        download_date: now_timestamp(),
    }
}

#[test]
fn version_comparison_is_exact_string_equality() {
    let catalog = entry("x", "1.10");
    assert_eq!(
        InstallationState::derive(&catalog, Some(&installed("x", "1.10"))),
        InstallationState::UpToDate
    );
    // "1.1" and "1.10" are different versions, and so are "1.0" and "1.0 ".
    assert_eq!(
        InstallationState::derive(&catalog, Some(&installed("x", "1.1"))),
        InstallationState::Outdated
    );
    assert_eq!(
        InstallationState::derive(&entry("x", "1.0"), Some(&installed("x", "1.0 "))),
        InstallationState::Outdated
    );
    assert_eq!(
        InstallationState::derive(&catalog, None),
        InstallationState::NotInstalled
    );
}

#[test]
fn state_serializes_in_snake_case() {
    let json = serde_json::to_string(&InstallationState::NotInstalled).unwrap();
    assert_eq!(json, "\"not_installed\"");
    assert_eq!(InstallationState::UpToDate.to_string(), "up to date");
}

#[test]
fn package_ids_are_plain_path_components() {
    for good in ["x", "App_2", "tool-1.0", "7zip"] {
        assert!(good.parse::<PackageId>().is_ok(), "{good}");
    }
    for bad in ["", " ", "a/b", "a\\b", "..", ".hidden", "a..b", "-flag"] {
        let err = bad.parse::<PackageId>().unwrap_err();
        assert_matches!(err, ShelfError::InvalidPackageId(_));
        assert_eq!(err.category(), ErrorCategory::Usage);
    }
}

#[test]
fn record_paths_resolve_under_directory() {
    let record = installed("x", "1");
    assert_eq!(record.main_file_path(), Utf8PathBuf::from("/apps/x/bin/run"));
    assert_eq!(record.icon_file_path(), Utf8PathBuf::from("/apps/x/x.png"));
}

#[test]
fn timestamps_use_ledger_format() {
    let stamp = now_timestamp();
    assert!(NaiveDateTime::parse_from_str(&stamp, TIMESTAMP_FORMAT).is_ok());
    assert_eq!(stamp.len(), "2024-01-01 00:00:00".len());
}
