use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::artifact::{ArtifactPipeline, RetrievedBundle};
use crate::domain::{CatalogEntry, InstallationState, InstalledRecord, PackageId, now_timestamp};
use crate::error::ShelfError;
use crate::fs_util::remove_dir_if_exists;
use crate::remote::{ArtifactClient, CatalogClient};
use crate::shortcut::ShortcutIntegration;
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy)]
pub enum ProgressSinkKind {
    Install,
    Update,
    Remove,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn event(&self, _event: ProgressEvent) {}
}

/// Root under which each package gets its own `<root>/<id>` directory.
/// Passed per call so concurrent actions never share a mutable target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTarget {
    root: Utf8PathBuf,
}

impl InstallTarget {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn dir_for(&self, id: &PackageId) -> Utf8PathBuf {
        self.root.join(id.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Install,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
pub enum Action {
    Install(CatalogEntry),
    Update(CatalogEntry),
    Delete(PackageId),
}

impl Action {
    pub fn id(&self) -> &PackageId {
        match self {
            Action::Install(entry) | Action::Update(entry) => &entry.id,
            Action::Delete(id) => id,
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Install(_) => ActionKind::Install,
            Action::Update(_) => ActionKind::Update,
            Action::Delete(_) => ActionKind::Delete,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionReport {
    pub action: ActionKind,
    /// The stored record, or for a delete the record that was removed.
    pub record: InstalledRecord,
    pub shortcut_warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogView {
    pub id: PackageId,
    pub name: String,
    pub description: String,
    pub version: String,
    pub state: InstallationState,
    pub installed_version: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogResult {
    pub packages: Vec<CatalogView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub installed: Vec<InstalledRecord>,
}

/// One lock per identifier, created on first use and dropped from the table
/// once no caller holds or waits on it.
#[derive(Debug, Default)]
struct IdLocks {
    table: Mutex<HashMap<PackageId, Arc<Mutex<()>>>>,
}

impl IdLocks {
    fn handle(&self, id: &PackageId) -> Arc<Mutex<()>> {
        let mut table = self.table();
        table.entry(id.clone()).or_default().clone()
    }

    /// Runs `f` while holding the lock for `id`.
    fn with<R>(&self, id: &PackageId, f: impl FnOnce() -> R) -> R {
        let lock = self.handle(id);
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };
        drop(lock);
        self.prune(id);
        result
    }

    fn prune(&self, id: &PackageId) {
        let mut table = self.table();
        // The table's own handle is the only one left.
        if table.get(id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            table.remove(id);
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<PackageId, Arc<Mutex<()>>>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.table().len()
    }
}

/// Lifecycle coordinator: joins the catalog with the ledger and sequences
/// install, update and delete across the filesystem and the ledger.
pub struct App<C: CatalogClient, A: ArtifactClient, S: ShortcutIntegration> {
    store: RecordStore,
    catalog: C,
    pipeline: ArtifactPipeline<A>,
    shortcuts: S,
    locks: IdLocks,
}

impl<C: CatalogClient, A: ArtifactClient, S: ShortcutIntegration> App<C, A, S> {
    pub fn new(store: RecordStore, catalog: C, pipeline: ArtifactPipeline<A>, shortcuts: S) -> Self {
        Self {
            store,
            catalog,
            pipeline,
            shortcuts,
            locks: IdLocks::default(),
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn state_of(&self, entry: &CatalogEntry) -> Result<InstallationState, ShelfError> {
        let record = self.installed_record(&entry.id)?;
        Ok(InstallationState::derive(entry, record.as_ref()))
    }

    /// Every catalog entry with its state derived from the current ledger.
    pub fn overview(&self, sink: &dyn ProgressSink) -> Result<CatalogResult, ShelfError> {
        sink.event(ProgressEvent {
            message: "phase=Fetch; loading catalog".to_string(),
            elapsed: None,
        });
        let entries = self.catalog.fetch_catalog()?;
        let installed: HashMap<PackageId, InstalledRecord> = self
            .store
            .load_all()?
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();

        let packages = entries
            .into_iter()
            .map(|entry| {
                let record = installed.get(&entry.id);
                CatalogView {
                    state: InstallationState::derive(&entry, record),
                    installed_version: record.map(|record| record.version.clone()),
                    id: entry.id,
                    name: entry.name,
                    description: entry.description,
                    version: entry.version,
                }
            })
            .collect();
        Ok(CatalogResult { packages })
    }

    /// Catalog entries for `ids`, in the order given.
    pub fn catalog_entries(&self, ids: &[PackageId]) -> Result<Vec<CatalogEntry>, ShelfError> {
        let mut catalog: HashMap<PackageId, CatalogEntry> = self
            .catalog
            .fetch_catalog()?
            .into_iter()
            .map(|entry| (entry.id.clone(), entry))
            .collect();
        ids.iter()
            .map(|id| {
                catalog
                    .remove(id)
                    .ok_or_else(|| ShelfError::NotFound(format!("{id} (not in catalog)")))
            })
            .collect()
    }

    /// Catalog entries whose installed version differs from the catalog's.
    pub fn outdated(&self) -> Result<Vec<CatalogEntry>, ShelfError> {
        let installed: HashMap<PackageId, InstalledRecord> = self
            .store
            .load_all()?
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        Ok(self
            .catalog
            .fetch_catalog()?
            .into_iter()
            .filter(|entry| {
                InstallationState::derive(entry, installed.get(&entry.id))
                    == InstallationState::Outdated
            })
            .collect())
    }

    pub fn installed(&self) -> Result<ListResult, ShelfError> {
        Ok(ListResult {
            installed: self.store.load_all()?,
        })
    }

    pub fn info(&self, id: &PackageId) -> Result<InstalledRecord, ShelfError> {
        self.store.get(id)
    }

    /// Installs `entry` under `target`. A previous install of the same id in
    /// another directory is removed so the ledger never loses track of it.
    pub fn install(
        &self,
        entry: &CatalogEntry,
        target: &InstallTarget,
        sink: &dyn ProgressSink,
    ) -> Result<ActionReport, ShelfError> {
        self.locks.with(&entry.id, || {
            sink.event(ProgressEvent {
                message: format!("phase=Resolve; install {} {}", entry.id, entry.version),
                elapsed: None,
            });
            let previous = self.installed_record(&entry.id)?;
            let dir = target.dir_for(&entry.id);
            if let Some(previous) = &previous {
                release_previous_dir(previous, &dir)?;
            }
            acquire_dir(&dir, sink)?;
            let bundle = self.pipeline.retrieve(&entry.id, dir.as_std_path(), sink)?;

            let record = build_record(entry, &dir, &bundle);
            self.persist(&record, sink)?;
            let previous_name = previous.as_ref().map(|record| record.name.as_str());
            let shortcut_warning = self.link(&record, previous_name);

            tracing::info!(package = %entry.id, version = %entry.version, dir = %dir, "installed");
            Ok(ActionReport {
                action: ActionKind::Install,
                record,
                shortcut_warning,
            })
        })
    }

    pub fn update(
        &self,
        entry: &CatalogEntry,
        target: &InstallTarget,
        sink: &dyn ProgressSink,
    ) -> Result<ActionReport, ShelfError> {
        self.locks.with(&entry.id, || {
            sink.event(ProgressEvent {
                message: format!("phase=Resolve; update {} to {}", entry.id, entry.version),
                elapsed: None,
            });
            let previous = self.installed_record(&entry.id)?;
            if previous.is_none() {
                tracing::warn!(
                    package = %entry.id,
                    "no installed record, updating as fresh install"
                );
            }

            let dir = target.dir_for(&entry.id);
            if let Some(previous) = &previous {
                release_previous_dir(previous, &dir)?;
            }
            acquire_dir(&dir, sink)?;
            let bundle = self.pipeline.retrieve(&entry.id, dir.as_std_path(), sink)?;

            let record = build_record(entry, &dir, &bundle);
            self.persist(&record, sink)?;
            let previous_name = previous.as_ref().map(|record| record.name.as_str());
            let shortcut_warning =
                self.link(&record, Some(previous_name.unwrap_or(&record.name)));

            tracing::info!(
                package = %entry.id,
                from = previous.as_ref().map(|record| record.version.as_str()).unwrap_or("-"),
                to = %entry.version,
                "updated"
            );
            Ok(ActionReport {
                action: ActionKind::Update,
                record,
                shortcut_warning,
            })
        })
    }

    /// Removes the install directory, then the ledger row, then the shortcut.
    /// The directory goes first so the ledger never forgets a directory that
    /// is still on disk.
    pub fn delete(
        &self,
        id: &PackageId,
        sink: &dyn ProgressSink,
    ) -> Result<ActionReport, ShelfError> {
        self.locks.with(id, || {
            sink.event(ProgressEvent {
                message: format!("phase=Resolve; remove {id}"),
                elapsed: None,
            });
            let record = self.store.get(id)?;

            if !record.dir_path.as_str().is_empty() {
                sink.event(ProgressEvent {
                    message: format!("phase=Store; removing {}", record.dir_path),
                    elapsed: None,
                });
                remove_dir_if_exists(record.dir_path.as_std_path())?;
            }
            let record = self.store.delete(id)?;

            let shortcut_warning = match self.shortcuts.remove_shortcut(&record.name) {
                Ok(()) => None,
                Err(err) => {
                    tracing::warn!(package = %id, error = %err, "shortcut removal failed");
                    Some(err.to_string())
                }
            };

            tracing::info!(package = %id, "removed");
            Ok(ActionReport {
                action: ActionKind::Delete,
                record,
                shortcut_warning,
            })
        })
    }

    pub fn perform(
        &self,
        action: &Action,
        target: &InstallTarget,
        sink: &dyn ProgressSink,
    ) -> Result<ActionReport, ShelfError> {
        match action {
            Action::Install(entry) => self.install(entry, target, sink),
            Action::Update(entry) => self.update(entry, target, sink),
            Action::Delete(id) => self.delete(id, sink),
        }
    }

    /// Runs each action on its own worker thread and returns the outcomes in
    /// input order. Actions on the same identifier take turns; the rest run
    /// in parallel.
    pub fn run_batch(
        &self,
        actions: &[Action],
        target: &InstallTarget,
        sink: &dyn ProgressSink,
    ) -> Vec<Result<ActionReport, ShelfError>> {
        thread::scope(|scope| {
            let handles: Vec<_> = actions
                .iter()
                .map(|action| {
                    let handle = scope.spawn(move || self.perform(action, target, sink));
                    (action.id(), handle)
                })
                .collect();
            handles
                .into_iter()
                .map(|(id, handle)| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(ShelfError::WorkerPanicked(id.to_string())))
                })
                .collect()
        })
    }

    fn installed_record(&self, id: &PackageId) -> Result<Option<InstalledRecord>, ShelfError> {
        match self.store.get(id) {
            Ok(record) => Ok(Some(record)),
            Err(ShelfError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn persist(&self, record: &InstalledRecord, sink: &dyn ProgressSink) -> Result<(), ShelfError> {
        sink.event(ProgressEvent {
            message: format!("phase=Store; recording {} in ledger", record.id),
            elapsed: None,
        });
        self.store.upsert(record.clone())
    }

    /// Recreates the launcher for `record`. Failures are reported, never fatal:
    /// the install on disk and in the ledger stands without a shortcut.
    fn link(&self, record: &InstalledRecord, replaced: Option<&str>) -> Option<String> {
        if let Some(old_name) = replaced {
            if let Err(err) = self.shortcuts.remove_shortcut(old_name) {
                tracing::warn!(package = %record.id, error = %err, "old shortcut removal failed");
            }
        }
        match self
            .shortcuts
            .create_shortcut(record.main_file_path().as_std_path(), &record.name)
        {
            Ok(()) => None,
            Err(err) => {
                tracing::warn!(package = %record.id, error = %err, "shortcut creation failed");
                Some(err.to_string())
            }
        }
    }
}

/// Removes the directory of an earlier install when it lives somewhere other
/// than `dir`, which `acquire_dir` clears anyway.
fn release_previous_dir(previous: &InstalledRecord, dir: &Utf8Path) -> Result<(), ShelfError> {
    if !previous.dir_path.as_str().is_empty() && previous.dir_path.as_path() != dir {
        tracing::debug!(package = %previous.id, old = %previous.dir_path, "removing previous install");
        remove_dir_if_exists(previous.dir_path.as_std_path())?;
    }
    Ok(())
}

/// Clears any previous contents of `dir` and creates it fresh.
fn acquire_dir(dir: &Utf8Path, sink: &dyn ProgressSink) -> Result<(), ShelfError> {
    sink.event(ProgressEvent {
        message: format!("phase=Prepare; preparing {dir}"),
        elapsed: None,
    });
    remove_dir_if_exists(dir.as_std_path())?;
    fs::create_dir_all(dir.as_std_path()).map_err(|err| ShelfError::filesystem(dir.as_std_path(), err))
}

fn build_record(entry: &CatalogEntry, dir: &Utf8Path, bundle: &RetrievedBundle) -> InstalledRecord {
    let name = if entry.name.trim().is_empty() {
        bundle.name.clone()
    } else {
        entry.name.clone()
    };
    let version = if entry.version.trim().is_empty() {
        bundle.version.clone()
    } else {
        entry.version.clone()
    };
    InstalledRecord {
        id: entry.id.clone(),
        name,
        version,
        dir_path: dir.to_path_buf(),
        main_file: bundle.primary_name.clone(),
        icon_path: bundle.icon_name.clone(),
        download_date: now_timestamp(),
    }
}
