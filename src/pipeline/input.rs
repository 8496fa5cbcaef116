//! Batch ingress: one [`InputItem`] per uploaded file.
//!
//! Items come either from memory (CLI, tests) or from a file the transport
//! layer already stored on disk. An on-disk upload belongs to the batch:
//! it is read once for its single conversion attempt and removed afterwards,
//! whatever the outcome.

use crate::pipeline::classify::extension_of;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Where an item's bytes live.
#[derive(Debug, Clone)]
pub enum ItemSource {
    Memory(Vec<u8>),
    /// A temporary upload owned by the batch; deleted after its attempt.
    Upload(PathBuf),
}

/// One uploaded file. Immutable once created.
#[derive(Debug, Clone)]
pub struct InputItem {
    source: ItemSource,
    original_name: String,
    declared_media_type: Option<String>,
    extension: String,
}

impl InputItem {
    pub fn from_bytes(
        original_name: impl Into<String>,
        declared_media_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Self {
        Self::new(ItemSource::Memory(bytes), original_name.into(), declared_media_type)
    }

    pub fn from_upload(
        original_name: impl Into<String>,
        declared_media_type: Option<&str>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self::new(ItemSource::Upload(path.into()), original_name.into(), declared_media_type)
    }

    fn new(source: ItemSource, original_name: String, declared_media_type: Option<&str>) -> Self {
        let extension = extension_of(&original_name);
        Self {
            source,
            original_name,
            declared_media_type: declared_media_type.map(str::to_string),
            extension,
        }
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn declared_media_type(&self) -> Option<&str> {
        self.declared_media_type.as_deref()
    }

    /// Lower-case extension including the dot, or `""`.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn upload_path(&self) -> Option<&Path> {
        match &self.source {
            ItemSource::Upload(p) => Some(p),
            ItemSource::Memory(_) => None,
        }
    }

    /// Take the item's bytes, consuming it.
    pub async fn into_bytes(self) -> std::io::Result<Vec<u8>> {
        match self.source {
            ItemSource::Memory(bytes) => Ok(bytes),
            ItemSource::Upload(path) => tokio::fs::read(&path).await,
        }
    }
}

/// Delete a temporary upload, logging rather than propagating failures.
pub async fn release_upload(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Released upload {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove upload {}: {}", path.display(), e),
    }
}
