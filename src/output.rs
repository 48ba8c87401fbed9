use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ActionKind, ActionReport, CatalogResult, ListResult, ProgressEvent};
use crate::domain::{InstalledRecord, PackageId};
use crate::error::{ErrorCategory, ShelfError};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

/// Outcome of one action inside a batch, success or categorized failure.
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub id: PackageId,
    pub action: ActionKind,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ActionReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn new(id: PackageId, action: ActionKind, result: Result<ActionReport, ShelfError>) -> Self {
        match result {
            Ok(report) => Self {
                id,
                action,
                ok: true,
                report: Some(report),
                category: None,
                error: None,
            },
            Err(err) => Self {
                id,
                action,
                ok: false,
                report: None,
                category: Some(err.category().label()),
                error: Some(error_chain(&err)),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    pub outcomes: Vec<ActionOutcome>,
}

impl BatchResult {
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|outcome| !outcome.ok).count()
    }
}

/// `"message: cause: cause"` for a failure and its sources.
pub fn error_chain(err: &ShelfError) -> String {
    let mut text = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

pub fn category_message(err: &ShelfError) -> String {
    let hint = match err.category() {
        ErrorCategory::NetworkFailure => "check the store server address and try again",
        ErrorCategory::DecodeFailure => "the server sent a package this client cannot read",
        ErrorCategory::FilesystemFailure => "check permissions and free space in the install directory",
        ErrorCategory::NotFound => "nothing is installed under that id",
        ErrorCategory::StoreCorrupt => "the ledger file must be repaired or removed by hand",
        ErrorCategory::Integration => "the package works, only its shortcut is affected",
        ErrorCategory::Usage => "check the command line and config file",
    };
    format!("{}: {} ({hint})", err.category().label(), error_chain(err))
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_catalog(result: &CatalogResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_list(result: &ListResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_info(result: &InstalledRecord) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_batch(result: &BatchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl crate::app::ProgressSink for JsonOutput {
    fn event(&self, event: ProgressEvent) {
        tracing::debug!(message = %event.message, "progress");
    }
}
