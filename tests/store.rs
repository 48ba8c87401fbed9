use std::fs;
use std::sync::Arc;
use std::thread;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use softshelf::domain::{InstalledRecord, PackageId};
use softshelf::error::{ErrorCategory, ShelfError};
use softshelf::store::RecordStore;

fn record(id: &str, version: &str) -> InstalledRecord {
    InstalledRecord {
        id: id.parse().unwrap(),
        name: format!("{id} app"),
        version: version.to_string(),
        dir_path: Utf8PathBuf::from(format!("/apps/{id}")),
        main_file: "run.exe".to_string(),
        icon_path: format!("{id} app.png"),
        download_date: "2024-05-01 10:00:00".to_string(),
    }
}

fn ledger_in(temp: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(temp.path().join("downloaded_software.json")).unwrap()
}

#[test]
fn upserted_record_reads_back_unchanged() {
    let temp = tempfile::tempdir().unwrap();
    let store = RecordStore::new(ledger_in(&temp));
    let original = record("x", "1.0");

    store.upsert(original.clone()).unwrap();

    assert_eq!(store.get(&original.id).unwrap(), original);
    assert_eq!(store.load_all().unwrap(), vec![original]);
}

#[test]
fn upsert_is_idempotent() {
    let temp = tempfile::tempdir().unwrap();
    let store = RecordStore::new(ledger_in(&temp));

    store.upsert(record("x", "1.0")).unwrap();
    let once = fs::read(store.path().as_std_path()).unwrap();
    store.upsert(record("x", "1.0")).unwrap();
    let twice = fs::read(store.path().as_std_path()).unwrap();

    assert_eq!(once, twice);
    assert_eq!(store.load_all().unwrap().len(), 1);
}

#[test]
fn missing_ledger_is_empty_and_not_created_by_reads() {
    let temp = tempfile::tempdir().unwrap();
    let store = RecordStore::new(ledger_in(&temp));

    assert!(store.load_all().unwrap().is_empty());
    let id: PackageId = "x".parse().unwrap();
    assert_matches!(store.get(&id), Err(ShelfError::NotFound(_)));
    assert!(!store.path().as_std_path().exists());
}

#[test]
fn corrupt_ledger_is_reported_not_reset() {
    let temp = tempfile::tempdir().unwrap();
    let path = ledger_in(&temp);
    fs::write(path.as_std_path(), b"[{\"id\": \"x\",").unwrap();
    let store = RecordStore::new(path.clone());

    let err = store.load_all().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::StoreCorrupt);
    assert_matches!(err, ShelfError::LedgerCorrupt { .. });

    assert_matches!(
        store.upsert(record("y", "1")),
        Err(ShelfError::LedgerCorrupt { .. })
    );
    assert_eq!(
        fs::read(path.as_std_path()).unwrap(),
        b"[{\"id\": \"x\","
    );
}

#[test]
fn delete_returns_removed_record() {
    let temp = tempfile::tempdir().unwrap();
    let store = RecordStore::new(ledger_in(&temp));
    store.upsert(record("a", "1")).unwrap();
    store.upsert(record("b", "1")).unwrap();

    let removed = store.delete(&"a".parse().unwrap()).unwrap();
    assert_eq!(removed.id.as_str(), "a");

    let remaining: Vec<_> = store
        .load_all()
        .unwrap()
        .into_iter()
        .map(|record| record.id.to_string())
        .collect();
    assert_eq!(remaining, ["b"]);
}

#[test]
fn delete_of_unknown_id_leaves_file_alone() {
    let temp = tempfile::tempdir().unwrap();
    let store = RecordStore::new(ledger_in(&temp));
    store.upsert(record("a", "1")).unwrap();
    let before = fs::read(store.path().as_std_path()).unwrap();

    let err = store.delete(&"ghost".parse().unwrap()).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::NotFound);
    assert_eq!(fs::read(store.path().as_std_path()).unwrap(), before);
}

#[test]
fn ledger_file_uses_snake_case_fields() {
    let temp = tempfile::tempdir().unwrap();
    let store = RecordStore::new(ledger_in(&temp));
    store.upsert(record("x", "1.0")).unwrap();

    let raw: serde_json::Value =
        serde_json::from_slice(&fs::read(store.path().as_std_path()).unwrap()).unwrap();
    let row = &raw.as_array().unwrap()[0];
    assert_eq!(row["dir_path"], "/apps/x");
    assert_eq!(row["main_file"], "run.exe");
    assert_eq!(row["download_date"], "2024-05-01 10:00:00");
}

#[test]
fn concurrent_upserts_keep_every_identifier() {
    let temp = tempfile::tempdir().unwrap();
    let store = Arc::new(RecordStore::new(ledger_in(&temp)));

    let handles: Vec<_> = (0..16)
        .map(|n| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.upsert(record(&format!("pkg{n}"), "1")))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let mut ids: Vec<_> = store
        .load_all()
        .unwrap()
        .into_iter()
        .map(|record| record.id.to_string())
        .collect();
    ids.sort();
    let mut expected: Vec<_> = (0..16).map(|n| format!("pkg{n}")).collect();
    expected.sort();
    assert_eq!(ids, expected);
}
