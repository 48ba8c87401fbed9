use std::fs;
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use zip::ZipArchive;

use crate::error::ShelfError;

/// How archive member names are turned into paths under the target directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchivePathPolicy {
    /// Plain path join, `..` and absolute names included.
    #[default]
    Lenient,
    /// Members that would land outside the target directory are rejected.
    Hardened,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedMember {
    /// Member name as stored in the archive.
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
}

/// Extracts every member in archive order and reports where each one landed.
pub fn extract_zip<R: Read + Seek>(
    reader: R,
    target_dir: &Path,
    policy: ArchivePathPolicy,
) -> Result<Vec<ExtractedMember>, ShelfError> {
    let mut archive = ZipArchive::new(reader).map_err(ShelfError::ArchiveOpen)?;
    let mut members = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(ShelfError::ArchiveOpen)?;
        let name = entry.name().to_string();
        let entry_path = match policy {
            ArchivePathPolicy::Lenient => target_dir.join(&name),
            ArchivePathPolicy::Hardened => match entry.enclosed_name() {
                Some(path) => target_dir.join(path),
                None => return Err(ShelfError::UnsafeArchivePath(name)),
            },
        };
        let entry_err = |source: io::Error| ShelfError::ArchiveEntry {
            name: name.clone(),
            source,
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path).map_err(entry_err)?;
            members.push(ExtractedMember {
                name,
                path: entry_path,
                is_dir: true,
            });
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(entry_err)?;
        }
        let mut outfile = fs::File::create(&entry_path).map_err(entry_err)?;
        io::copy(&mut entry, &mut outfile).map_err(entry_err)?;
        members.push(ExtractedMember {
            name,
            path: entry_path,
            is_dir: false,
        });
    }
    Ok(members)
}

/// Returns whether anything was removed.
pub fn remove_dir_if_exists(path: &Path) -> Result<bool, ShelfError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(ShelfError::filesystem(path, err)),
    }
}
