//! Persistence of delivered artifacts.
//!
//! The artifact of a batch is written exactly once, at the very end, with an
//! atomic write (temp file + rename) so readers never observe a partial PDF.
//! Every write gets its own uniquely named temp file, so concurrent batches
//! asking for the same name never share one. Stored artifacts are addressed
//! by a sanitised file name only.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// URL prefix under which stored artifacts are served.
pub const DOWNLOAD_PREFIX: &str = "/downloads";

static FINAL_EXTENSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.[^/.]+$").unwrap());
static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9_-]").unwrap());

/// Strip the final extension and replace anything outside `[A-Za-z0-9_-]`
/// with `_`. Returns `None` when nothing is left.
pub fn sanitize_output_name(name: &str) -> Option<String> {
    let stem = FINAL_EXTENSION.replace(name.trim(), "");
    let safe = UNSAFE_CHARS.replace_all(&stem, "_").into_owned();
    (!safe.is_empty()).then_some(safe)
}

/// `converted_output_<unix millis>`.
pub fn default_output_name() -> String {
    format!("converted_output_{}", chrono::Utc::now().timestamp_millis())
}

/// File name (with `.pdf`) for a requested output name.
pub fn output_file_name(requested: Option<&str>) -> String {
    let base = requested
        .and_then(sanitize_output_name)
        .unwrap_or_else(default_output_name);
    format!("{base}.pdf")
}

/// A persisted artifact and where clients can fetch it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredArtifact {
    pub file_name: String,
    pub path: PathBuf,
    pub download_path: String,
}

/// Directory holding delivered artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn artifact(&self, file_name: &str) -> StoredArtifact {
        StoredArtifact {
            file_name: file_name.to_string(),
            path: self.dir.join(file_name),
            download_path: format!("{DOWNLOAD_PREFIX}/{file_name}"),
        }
    }

    /// Write `bytes` as `file_name`, replacing any previous artifact of the
    /// same name. On failure nothing partial is left in the directory.
    pub async fn persist(&self, file_name: &str, bytes: Vec<u8>) -> io::Result<StoredArtifact> {
        if !is_stored_name(file_name) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("refusing to store artifact as '{file_name}'"),
            ));
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        let artifact = self.artifact(file_name);

        let dir = self.dir.clone();
        let target = artifact.path.clone();
        let len = bytes.len();
        tokio::task::spawn_blocking(move || write_atomically(&dir, &target, &bytes))
            .await
            .map_err(io::Error::other)??;
        debug!("Stored {} ({} bytes)", artifact.path.display(), len);
        Ok(artifact)
    }

    /// Look up a stored artifact by bare file name.
    pub fn locate(&self, file_name: &str) -> Option<StoredArtifact> {
        if !is_stored_name(file_name) {
            return None;
        }
        let artifact = self.artifact(file_name);
        artifact.path.is_file().then_some(artifact)
    }
}

/// Write into a fresh temp file next to `target`, then rename it over
/// `target`. The temp file is deleted on drop unless it was persisted.
fn write_atomically(dir: &Path, target: &Path, bytes: &[u8]) -> io::Result<()> {
    // Timestamp plus tempfile's random suffix.
    let prefix = format!(".partial_{}_", chrono::Utc::now().format("%Y%m%d%H%M%S%3f"));
    let mut tmp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".pdf.tmp")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

/// A bare `<sanitised>.pdf` name with no path components.
fn is_stored_name(file_name: &str) -> bool {
    file_name
        .strip_suffix(".pdf")
        .is_some_and(|stem| !stem.is_empty() && !UNSAFE_CHARS.is_match(stem))
}
