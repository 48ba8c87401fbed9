use std::fs;
use std::io::{self, Read, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::domain::{InstalledRecord, PackageId};
use crate::error::ShelfError;

/// Whole-table JSON ledger of installed packages.
///
/// Every mutation is a read-modify-write of the full file. The internal lock
/// serializes those cycles; it does not serialize work on the install
/// directories, which the coordinator guards per identifier.
#[derive(Debug)]
pub struct RecordStore {
    path: Utf8PathBuf,
    write_lock: Mutex<()>,
}

impl RecordStore {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// A missing ledger file is an empty table. A present but unreadable one is not.
    pub fn load_all(&self) -> Result<Vec<InstalledRecord>, ShelfError> {
        read_table(&self.path)
    }

    pub fn get(&self, id: &PackageId) -> Result<InstalledRecord, ShelfError> {
        self.load_all()?
            .into_iter()
            .find(|record| &record.id == id)
            .ok_or_else(|| ShelfError::NotFound(id.to_string()))
    }

    /// Replaces the record sharing `record.id` in place, or appends it.
    pub fn upsert(&self, record: InstalledRecord) -> Result<(), ShelfError> {
        let _guard = self.lock();
        let mut table = read_table(&self.path)?;
        let slot = table.iter().position(|existing| existing.id == record.id);
        // Older ledgers were append-only and may hold duplicates; collapse them.
        table.retain(|existing| existing.id != record.id);
        match slot {
            Some(index) => table.insert(index, record),
            None => table.push(record),
        }
        write_table(&self.path, &table)
    }

    /// Removes every record for `id` and returns the first one removed.
    pub fn delete(&self, id: &PackageId) -> Result<InstalledRecord, ShelfError> {
        let _guard = self.lock();
        let mut table = read_table(&self.path)?;
        let index = table
            .iter()
            .position(|record| &record.id == id)
            .ok_or_else(|| ShelfError::NotFound(id.to_string()))?;
        let removed = table.remove(index);
        table.retain(|record| &record.id != id);
        write_table(&self.path, &table)?;
        Ok(removed)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn read_table(path: &Utf8Path) -> Result<Vec<InstalledRecord>, ShelfError> {
    let mut file = match fs::File::open(path.as_std_path()) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(ShelfError::LedgerOpen {
                path: path.as_std_path().to_path_buf(),
                source,
            });
        }
    };
    let mut content = String::new();
    file.read_to_string(&mut content)
        .map_err(|source| ShelfError::LedgerOpen {
            path: path.as_std_path().to_path_buf(),
            source,
        })?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&content).map_err(|source| ShelfError::LedgerCorrupt {
        path: path.as_std_path().to_path_buf(),
        source,
    })
}

/// Writes the table to a sibling temp file and renames it over `path`, so a
/// failed write leaves the previous ledger untouched.
fn write_table(path: &Utf8Path, table: &[InstalledRecord]) -> Result<(), ShelfError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let create_err = |source: io::Error| ShelfError::LedgerCreate {
        path: path.as_std_path().to_path_buf(),
        source,
    };

    let content = serde_json::to_vec_pretty(table).map_err(ShelfError::LedgerEncode)?;
    fs::create_dir_all(parent.as_std_path()).map_err(create_err)?;
    let mut temp = Builder::new()
        .prefix(".softshelf-ledger")
        .tempfile_in(parent.as_std_path())
        .map_err(create_err)?;
    temp.write_all(&content).map_err(create_err)?;
    temp.write_all(b"\n").map_err(create_err)?;
    temp.as_file().sync_all().map_err(create_err)?;
    temp.persist(path.as_std_path())
        .map_err(|err| create_err(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, version: &str) -> InstalledRecord {
        InstalledRecord {
            id: id.parse().unwrap(),
            name: id.to_uppercase(),
            version: version.to_string(),
            dir_path: Utf8PathBuf::from(format!("/apps/{id}")),
            main_file: "main.exe".to_string(),
            icon_path: format!("{id}.png"),
            download_date: "2024-05-01 10:00:00".to_string(),
        }
    }

    #[test]
    fn upsert_keeps_position_of_replaced_record() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("ledger.json")).unwrap();
        let store = RecordStore::new(path);

        store.upsert(record("a", "1")).unwrap();
        store.upsert(record("b", "1")).unwrap();
        store.upsert(record("a", "2")).unwrap();

        let all = store.load_all().unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(all[0].version, "2");
    }

    #[test]
    fn empty_file_is_empty_table() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("ledger.json")).unwrap();
        fs::write(path.as_std_path(), b"").unwrap();
        assert!(RecordStore::new(path).load_all().unwrap().is_empty());
    }

    #[test]
    fn legacy_duplicates_are_collapsed() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("ledger.json")).unwrap();
        let legacy = vec![record("a", "1"), record("b", "1"), record("a", "1")];
        fs::write(path.as_std_path(), serde_json::to_vec(&legacy).unwrap()).unwrap();

        let store = RecordStore::new(path);
        store.upsert(record("a", "3")).unwrap();
        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].version, "3");
    }
}
