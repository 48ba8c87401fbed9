use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use camino::Utf8PathBuf;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ShelfError;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Identifier shared by a catalog entry and its installed record.
///
/// Doubles as the install directory name, so anything that is not a plain
/// file name component is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageId(String);

impl PackageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn package_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("static regex"))
}

impl FromStr for PackageId {
    type Err = ShelfError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if !package_id_regex().is_match(trimmed) || trimmed.contains("..") {
            return Err(ShelfError::InvalidPackageId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for PackageId {
    type Error = ShelfError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PackageId> for String {
    fn from(value: PackageId) -> Self {
        value.0
    }
}

/// One installable package as advertised by the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: PackageId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub version: String,
    #[serde(default)]
    pub main_file: String,
    #[serde(default)]
    pub icon: String,
}

/// Ledger row for an installed package. Paths inside are relative to `dir_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledRecord {
    pub id: PackageId,
    pub name: String,
    pub version: String,
    pub dir_path: Utf8PathBuf,
    pub main_file: String,
    pub icon_path: String,
    pub download_date: String,
}

impl InstalledRecord {
    pub fn main_file_path(&self) -> Utf8PathBuf {
        self.dir_path.join(&self.main_file)
    }

    pub fn icon_file_path(&self) -> Utf8PathBuf {
        self.dir_path.join(&self.icon_path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallationState {
    NotInstalled,
    UpToDate,
    Outdated,
}

impl InstallationState {
    pub fn derive(entry: &CatalogEntry, record: Option<&InstalledRecord>) -> Self {
        match record {
            None => InstallationState::NotInstalled,
            Some(record) if record.version == entry.version => InstallationState::UpToDate,
            Some(_) => InstallationState::Outdated,
        }
    }
}

impl fmt::Display for InstallationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallationState::NotInstalled => write!(f, "not installed"),
            InstallationState::UpToDate => write!(f, "up to date"),
            InstallationState::Outdated => write!(f, "outdated"),
        }
    }
}

pub fn now_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn entry(version: &str) -> CatalogEntry {
        CatalogEntry {
            id: "A".parse().unwrap(),
            name: "Alpha".to_string(),
            description: String::new(),
            version: version.to_string(),
            main_file: "alpha.exe".to_string(),
            icon: String::new(),
        }
    }

    fn record(version: &str) -> InstalledRecord {
        InstalledRecord {
            id: "A".parse().unwrap(),
            name: "Alpha".to_string(),
            version: version.to_string(),
            dir_path: Utf8PathBuf::from("/apps/A"),
            main_file: "alpha.exe".to_string(),
            icon_path: "Alpha.png".to_string(),
            download_date: "2024-01-01 00:00:00".to_string(),
        }
    }

    #[test]
    fn state_derivation() {
        let catalog = entry("2");
        assert_eq!(
            InstallationState::derive(&catalog, None),
            InstallationState::NotInstalled
        );
        assert_eq!(
            InstallationState::derive(&catalog, Some(&record("2"))),
            InstallationState::UpToDate
        );
        assert_eq!(
            InstallationState::derive(&catalog, Some(&record("1"))),
            InstallationState::Outdated
        );
    }

    #[test]
    fn package_id_rejects_path_components() {
        assert_matches!(
            "../etc".parse::<PackageId>(),
            Err(ShelfError::InvalidPackageId(_))
        );
        assert_matches!(
            "a/b".parse::<PackageId>(),
            Err(ShelfError::InvalidPackageId(_))
        );
        assert_matches!("".parse::<PackageId>(), Err(ShelfError::InvalidPackageId(_)));
        assert_eq!("  app-1.2 ".parse::<PackageId>().unwrap().as_str(), "app-1.2");
    }

    #[test]
    fn record_uses_ledger_field_names() {
        let json = serde_json::to_value(record("1")).unwrap();
        for key in [
            "id",
            "name",
            "version",
            "dir_path",
            "main_file",
            "icon_path",
            "download_date",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn catalog_entry_reads_camel_case() {
        let entry: CatalogEntry = serde_json::from_str(
            r#"{"id":"x","name":"X","description":"d","version":"1.0","mainFile":"x.exe","icon":""}"#,
        )
        .unwrap();
        assert_eq!(entry.main_file, "x.exe");
    }
}
