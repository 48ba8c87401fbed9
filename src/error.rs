use std::io;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Coarse failure classes shown to the user and mapped onto exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    NetworkFailure,
    DecodeFailure,
    FilesystemFailure,
    NotFound,
    StoreCorrupt,
    Integration,
    Usage,
}

impl ErrorCategory {
    pub fn label(self) -> &'static str {
        match self {
            ErrorCategory::NetworkFailure => "network failure",
            ErrorCategory::DecodeFailure => "decode failure",
            ErrorCategory::FilesystemFailure => "filesystem failure",
            ErrorCategory::NotFound => "not found",
            ErrorCategory::StoreCorrupt => "ledger corrupt",
            ErrorCategory::Integration => "desktop integration failure",
            ErrorCategory::Usage => "invalid usage",
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum ShelfError {
    #[error("invalid package id: {0}")]
    InvalidPackageId(String),

    #[error("package not installed: {0}")]
    NotFound(String),

    #[error("failed to open ledger {path}")]
    LedgerOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write ledger {path}")]
    LedgerCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("ledger {path} is corrupt")]
    #[diagnostic(help("fix or remove the file; it is never silently reset"))]
    LedgerCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode ledger")]
    LedgerEncode(#[source] serde_json::Error),

    #[error("catalog request failed: {0}")]
    CatalogHttp(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("failed to decode catalog response")]
    CatalogDecode(#[source] serde_json::Error),

    #[error("download request failed: {0}")]
    RetrievalHttp(String),

    #[error("download returned status {status}: {message}")]
    RetrievalStatus { status: u16, message: String },

    #[error("failed to decode download envelope")]
    EnvelopeDecode(#[source] serde_json::Error),

    #[error("archive payload is not valid base64")]
    PayloadDecode(#[source] base64::DecodeError),

    #[error("failed to write archive to {path}")]
    ArchiveWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to open archive")]
    ArchiveOpen(#[source] zip::result::ZipError),

    #[error("failed to extract archive member {name}")]
    ArchiveEntry {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("archive contains no files")]
    EmptyArchive,

    #[error("archive member escapes install directory: {0}")]
    UnsafeArchivePath(String),

    #[error("icon payload is not valid base64")]
    IconDecode(#[source] base64::DecodeError),

    #[error("failed to write icon {path}")]
    IconWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("filesystem error at {path}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("shortcut integration failed: {0}")]
    Shortcut(String),

    #[error("worker for {0} panicked")]
    WorkerPanicked(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("unable to resolve a data directory for this user")]
    MissingHomeDir,
}

impl ShelfError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ShelfError::NotFound(_) => ErrorCategory::NotFound,
            ShelfError::LedgerCorrupt { .. } => ErrorCategory::StoreCorrupt,
            ShelfError::CatalogHttp(_)
            | ShelfError::CatalogStatus { .. }
            | ShelfError::RetrievalHttp(_)
            | ShelfError::RetrievalStatus { .. } => ErrorCategory::NetworkFailure,
            ShelfError::CatalogDecode(_)
            | ShelfError::EnvelopeDecode(_)
            | ShelfError::PayloadDecode(_)
            | ShelfError::ArchiveOpen(_)
            | ShelfError::EmptyArchive
            | ShelfError::UnsafeArchivePath(_)
            | ShelfError::IconDecode(_)
            | ShelfError::LedgerEncode(_) => ErrorCategory::DecodeFailure,
            ShelfError::LedgerOpen { .. }
            | ShelfError::LedgerCreate { .. }
            | ShelfError::ArchiveWrite { .. }
            | ShelfError::ArchiveEntry { .. }
            | ShelfError::IconWrite { .. }
            | ShelfError::Filesystem { .. }
            | ShelfError::WorkerPanicked(_) => ErrorCategory::FilesystemFailure,
            ShelfError::Shortcut(_) => ErrorCategory::Integration,
            ShelfError::InvalidPackageId(_)
            | ShelfError::ConfigRead(_)
            | ShelfError::ConfigParse(_)
            | ShelfError::MissingHomeDir => ErrorCategory::Usage,
        }
    }

    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ShelfError::Filesystem {
            path: path.into(),
            source,
        }
    }
}
