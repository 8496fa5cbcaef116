//! Error types for the merge2pdf library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`MergeError`] is **fatal**: the batch cannot produce an artifact
//!   (malformed tool identifier, nothing convertible, or an internal failure
//!   outside any single item). Returned as `Err(MergeError)` from
//!   [`crate::convert::convert`].
//!
//! * [`ItemError`] is **non-fatal**: one uploaded file (or one archive member)
//!   failed to convert but the rest of the batch is unaffected. Stored inside
//!   [`crate::output::Outcome::Failed`].
//!
//! Classification misses are not errors at all: they become
//! [`SkipReason`]s and never abort the batch on their own.

use crate::output::ItemReport;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All fatal errors returned by the merge2pdf library.
#[derive(Debug, Error)]
pub enum MergeError {
    // ── Request errors ────────────────────────────────────────────────────
    /// The tool identifier is not of the form `<something>-to-pdf`.
    #[error("Unknown tool '{tool}': expected an identifier such as 'jpg-to-pdf'")]
    InvalidToolIntent { tool: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Batch outcome errors ──────────────────────────────────────────────
    /// No item converted, or the artifact ended up with zero pages.
    #[error("No files were successfully converted into the PDF ({skipped} skipped, {failed} failed). Check file types and tool compatibility.")]
    NoDeliverableOutput {
        skipped: usize,
        failed: usize,
        items: Vec<ItemReport>,
    },

    // ── Internal errors ───────────────────────────────────────────────────
    /// Unexpected failure outside the per-item scope. All temporary
    /// resources and any partial artifact have been removed.
    #[error("Internal error while {stage}: {detail}")]
    Critical { stage: &'static str, detail: String },
}

impl MergeError {
    pub(crate) fn critical(stage: &'static str, detail: impl ToString) -> Self {
        MergeError::Critical {
            stage,
            detail: detail.to_string(),
        }
    }

    /// Structured, user-facing description of this failure.
    ///
    /// Distinguishes "nothing convertible was found" from "an internal error
    /// occurred" and carries per-item diagnostics for the former.
    pub fn report(&self) -> FailureReport {
        let kind = match self {
            MergeError::InvalidToolIntent { .. } | MergeError::InvalidConfig(_) => {
                FailureKind::InvalidRequest
            }
            MergeError::NoDeliverableOutput { .. } => FailureKind::NothingConvertible,
            MergeError::Critical { .. } => FailureKind::InternalError,
        };
        let items = match self {
            MergeError::NoDeliverableOutput { items, .. } => items.clone(),
            _ => Vec::new(),
        };
        FailureReport {
            kind,
            message: self.to_string(),
            items,
        }
    }
}

/// Category of a batch-level failure, as shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidRequest,
    NothingConvertible,
    InternalError,
}

/// Serialisable failure body returned to callers instead of a raw error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReport {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<ItemReport>,
}

/// A non-fatal error for a single input item or archive member.
///
/// Diagnostics never contain scratch-directory paths; they are redacted
/// before the error is constructed.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemError {
    /// An external capability (renderer, interpreter or decoder) failed.
    #[error("{file}: {capability} failed: {diagnostic}")]
    Conversion {
        file: String,
        capability: String,
        diagnostic: String,
    },

    /// The archive container itself could not be read.
    #[error("{file}: archive could not be read: {diagnostic}")]
    Archive { file: String, diagnostic: String },

    /// One member of an archive failed; siblings are unaffected.
    #[error("{archive} → {entry}: {source}")]
    ArchiveMember {
        archive: String,
        entry: String,
        #[source]
        source: Box<ItemError>,
    },

    /// The conversion exceeded the configured per-item timeout.
    #[error("{file}: conversion timed out after {secs}s")]
    Timeout { file: String, secs: u64 },
}

impl ItemError {
    pub(crate) fn conversion(
        file: impl Into<String>,
        capability: impl Into<String>,
        diagnostic: impl ToString,
    ) -> Self {
        ItemError::Conversion {
            file: file.into(),
            capability: capability.into(),
            diagnostic: diagnostic.to_string(),
        }
    }
}

/// Why an item (or archive member) contributed no pages without failing.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SkipReason {
    /// No strategy accepts this media type / extension under the tool.
    #[error("unsupported file type or tool combination (type {media_type:?}, extension {extension:?}, tool {tool})")]
    Unsupported {
        media_type: Option<String>,
        extension: String,
        tool: String,
    },

    /// An archive whose members were all skipped or failed.
    #[error("no convertible files found in archive")]
    NoConvertibleEntries,
}

/// Failure of an external capability, before it is attributed to an item.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// The program could not be started (usually: not installed).
    #[error("could not start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran but exited unsuccessfully.
    #[error("'{program}' exited with {status}: {stderr}")]
    Exit {
        program: String,
        status: String,
        stderr: String,
    },

    /// The program exited successfully but wrote no output file.
    /// `diagnostic` holds whatever it printed instead.
    #[error("'{program}' produced no output{}", console_suffix(.diagnostic))]
    NoOutput { program: String, diagnostic: String },

    /// Input or output could not be interpreted.
    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn console_suffix(diagnostic: &str) -> String {
    if diagnostic.is_empty() {
        String::new()
    } else {
        format!(": {diagnostic}")
    }
}
