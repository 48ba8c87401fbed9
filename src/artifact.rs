use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tempfile::Builder;

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::PackageId;
use crate::error::ShelfError;
use crate::fs_util::{ArchivePathPolicy, ExtractedMember, extract_zip};
use crate::remote::ArtifactClient;

/// Body of `GET /appStore/download/{id}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadEnvelope {
    #[serde(default)]
    name: String,
    #[serde(default)]
    main_file: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    icon: String,
    file: String,
}

/// Files a retrieval left on disk, plus the metadata needed for a ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrievedBundle {
    pub name: String,
    pub version: String,
    pub primary_file: PathBuf,
    /// Archive member name of the primary file, relative to the target directory.
    pub primary_name: String,
    pub icon_file: PathBuf,
    pub icon_name: String,
}

pub struct ArtifactPipeline<A: ArtifactClient> {
    client: A,
    policy: ArchivePathPolicy,
}

impl<A: ArtifactClient> ArtifactPipeline<A> {
    pub fn new(client: A, policy: ArchivePathPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> ArchivePathPolicy {
        self.policy
    }

    /// Downloads `id` and unpacks it into `target_dir`, which must exist.
    ///
    /// Nothing is rolled back on failure: members extracted before the error
    /// stay on disk and the caller owns the directory cleanup.
    pub fn retrieve(
        &self,
        id: &PackageId,
        target_dir: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<RetrievedBundle, ShelfError> {
        sink.event(ProgressEvent {
            message: format!("phase=Fetch; downloading {id}"),
            elapsed: None,
        });
        let start = Instant::now();
        let body = self.client.download(id)?;
        sink.event(ProgressEvent {
            message: format!("download.response bytes={}", body.len()),
            elapsed: Some(start.elapsed()),
        });

        sink.event(ProgressEvent {
            message: "phase=Verify; decoding payload".to_string(),
            elapsed: None,
        });
        let envelope: DownloadEnvelope =
            serde_json::from_slice(&body).map_err(ShelfError::EnvelopeDecode)?;
        drop(body);
        let archive = decode_base64(&envelope.file).map_err(ShelfError::PayloadDecode)?;

        sink.event(ProgressEvent {
            message: format!("phase=Store; extracting into {}", target_dir.display()),
            elapsed: None,
        });
        let members = self.unpack(&archive, target_dir)?;
        drop(archive);

        let primary = select_primary(&members, &envelope.main_file)
            .ok_or(ShelfError::EmptyArchive)?;
        if primary.name != envelope.main_file {
            tracing::warn!(
                package = %id,
                declared = %envelope.main_file,
                chosen = %primary.name,
                "declared main file not in archive, using first file"
            );
        }

        let icon = decode_base64(&envelope.icon).map_err(ShelfError::IconDecode)?;
        let icon_name = icon_file_name(&envelope.name, id);
        let icon_file = target_dir.join(&icon_name);
        fs::write(&icon_file, &icon).map_err(|source| ShelfError::IconWrite {
            path: icon_file.clone(),
            source,
        })?;

        tracing::debug!(
            package = %id,
            members = members.len(),
            primary = %primary.name,
            "artifact unpacked"
        );

        Ok(RetrievedBundle {
            name: envelope.name,
            version: envelope.version,
            primary_file: primary.path.clone(),
            primary_name: primary.name.clone(),
            icon_file,
            icon_name,
        })
    }

    /// Persists the raw archive as a temp file under `target_dir` and extracts
    /// from it. The temp file is gone once this returns.
    fn unpack(
        &self,
        archive: &[u8],
        target_dir: &Path,
    ) -> Result<Vec<ExtractedMember>, ShelfError> {
        let write_err = |source: std::io::Error| ShelfError::ArchiveWrite {
            path: target_dir.to_path_buf(),
            source,
        };
        let mut temp = Builder::new()
            .prefix(".softshelf-archive")
            .suffix(".zip")
            .tempfile_in(target_dir)
            .map_err(write_err)?;
        temp.write_all(archive).map_err(write_err)?;
        temp.flush().map_err(write_err)?;
        let file = temp.as_file_mut();
        file.seek(SeekFrom::Start(0)).map_err(write_err)?;
        extract_zip(file, target_dir, self.policy)
    }
}

/// The member whose name equals `declared`, otherwise the first file in
/// archive order. Directories never qualify.
pub fn select_primary<'a>(
    members: &'a [ExtractedMember],
    declared: &str,
) -> Option<&'a ExtractedMember> {
    let mut files = members.iter().filter(|member| !member.is_dir);
    let first = files.clone().next();
    files.find(|member| member.name == declared).or(first)
}

fn decode_base64(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: String = payload
        .chars()
        .filter(|ch| !ch.is_ascii_whitespace())
        .collect();
    STANDARD.decode(compact)
}

fn icon_file_name(name: &str, id: &PackageId) -> String {
    let stem = name.trim();
    let stem = if stem.is_empty() { id.as_str() } else { stem };
    let stem: String = stem
        .chars()
        .map(|ch| if matches!(ch, '/' | '\\') { '_' } else { ch })
        .collect();
    format!("{stem}.png")
}
