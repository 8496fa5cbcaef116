//! # merge2pdf
//!
//! Merge uploaded files of mixed formats into a single PDF.
//!
//! Each file in a batch is classified, converted to pages by the matching
//! strategy, and appended to one output document in batch order. A file that
//! cannot be converted is recorded and skipped; the batch only fails when
//! nothing at all could be converted.
//!
//! ## Pipeline Overview
//!
//! ```text
//! files + tool
//!  │
//!  ├─ 1. Classify  media type / extension / tool ─▶ strategy
//!  ├─ 2. Convert   raster · office · HTML · PostScript · Outlook · ZIP
//!  │               (external renderers run under a per-item timeout)
//!  ├─ 3. Assemble  append pages to the single output document
//!  └─ 4. Persist   atomic write to the output directory
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use merge2pdf::{convert, ConversionConfig, InputItem};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::default();
//!     let items = vec![
//!         InputItem::from_bytes("cover.png", Some("image/png"), std::fs::read("cover.png")?),
//!         InputItem::from_bytes("report.docx", None, std::fs::read("report.docx")?),
//!     ];
//!     let result = convert(items, "doc-to-pdf", Some("bundle"), &config).await?;
//!     println!("{} -> {}", result.message(), result.artifact.path.display());
//!     Ok(())
//! }
//! ```
//!
//! ## External renderers
//!
//! | Strategy   | Default capability | Override variable |
//! |------------|--------------------|-------------------|
//! | office     | LibreOffice `soffice` | `MERGE2PDF_SOFFICE` |
//! | HTML       | Chromium / Chrome  | `MERGE2PDF_CHROMIUM` |
//! | PostScript | Ghostscript `gs`   | `MERGE2PDF_GHOSTSCRIPT` |
//!
//! Images, Outlook messages and ZIP archives are handled in-process. Any
//! capability can be replaced with a trait object through
//! [`ConversionConfigBuilder`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `merge2pdf` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder};
pub use convert::{convert, convert_sync};
pub use error::{CapabilityError, FailureKind, FailureReport, ItemError, MergeError, SkipReason};
pub use output::{BatchResult, ItemReport, Outcome};
pub use pipeline::classify::{StrategyTag, ToolIntent, KNOWN_TOOLS};
pub use pipeline::input::InputItem;
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use store::{ArtifactStore, StoredArtifact};
