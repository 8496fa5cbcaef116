//! Batch Orchestrator: the library's entry point.
//!
//! ```text
//!  Idle ─▶ Processing(item 1) ─▶ … ─▶ Processing(item N) ─▶ Finalizing ─┬─▶ Delivered
//!                                                                       └─▶ Undeliverable
//! ```
//!
//! Items are processed strictly one after another, so page order follows
//! batch order (and entry order inside archives). Per-item problems are
//! recorded in the item's report and never stop the batch. Only two things
//! escape as `Err`: a batch that produced nothing ([`MergeError::NoDeliverableOutput`])
//! and a failure outside any item ([`MergeError::Critical`]).
//!
//! The artifact is written once, after the last item, and temporary uploads
//! are released on every path.

use crate::config::ConversionConfig;
use crate::error::MergeError;
use crate::output::{BatchResult, ItemReport, Outcome};
use crate::pipeline::assemble::PageAssembler;
use crate::pipeline::classify::ToolIntent;
use crate::pipeline::dispatch::Dispatcher;
use crate::pipeline::input::{release_upload, InputItem};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::store::{output_file_name, ArtifactStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Convert a batch of uploaded files into one PDF.
///
/// # Arguments
/// * `items`      : uploaded files, in the order their pages should appear
/// * `tool`       : tool identifier such as `"jpg-to-pdf"` or `"zip-to-pdf"`
/// * `output_name`: requested artifact name; sanitised, or generated when `None`
/// * `config`     : conversion configuration
///
/// # Returns
/// `Ok(BatchResult)` when at least one item converted, even if others were
/// skipped or failed (see [`BatchResult::items`]).
///
/// # Errors
/// - [`MergeError::InvalidToolIntent`] for a malformed tool identifier
/// - [`MergeError::NoDeliverableOutput`] when nothing was converted
/// - [`MergeError::Critical`] when the artifact could not be finalised or stored
pub async fn convert(
    items: Vec<InputItem>,
    tool: impl AsRef<str>,
    output_name: Option<&str>,
    config: &ConversionConfig,
) -> Result<BatchResult, MergeError> {
    let uploads: Vec<PathBuf> = items
        .iter()
        .filter_map(|item| item.upload_path().map(Path::to_path_buf))
        .collect();

    let result = run_batch(items, tool.as_ref(), output_name, config).await;

    // Items release their own upload after their attempt; this catches
    // anything left behind by an early return.
    for path in &uploads {
        release_upload(path).await;
    }
    result
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    items: Vec<InputItem>,
    tool: impl AsRef<str>,
    output_name: Option<&str>,
    config: &ConversionConfig,
) -> Result<BatchResult, MergeError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| MergeError::critical("starting the async runtime", e))?
        .block_on(convert(items, tool, output_name, config))
}

async fn run_batch(
    items: Vec<InputItem>,
    tool: &str,
    output_name: Option<&str>,
    config: &ConversionConfig,
) -> Result<BatchResult, MergeError> {
    let start = Instant::now();
    let tool: ToolIntent = tool.parse()?;
    let total = items.len();
    let file_name = output_file_name(output_name);
    let callback: ProgressCallback = config
        .progress_callback
        .clone()
        .unwrap_or_else(|| Arc::new(NoopProgressCallback) as ProgressCallback);

    info!("Starting batch: {} item(s) with {} into {}", total, tool, file_name);
    callback.on_batch_start(total);

    // ── Processing ───────────────────────────────────────────────────────
    let dispatcher = Dispatcher::new(config, &tool);
    debug!("Scratch root: {}", dispatcher.workspace().root().display());
    let mut assembler = PageAssembler::new();
    let mut reports = Vec::with_capacity(total);

    for (i, item) in items.into_iter().enumerate() {
        let index = i + 1;
        let upload = item.upload_path().map(Path::to_path_buf);
        callback.on_item_start(index, total, item.original_name());

        let report = dispatcher.process(item, &mut assembler).await;
        if let Some(path) = upload {
            release_upload(&path).await;
        }

        match &report.outcome {
            Outcome::Converted { pages } => callback.on_item_converted(index, total, pages.len()),
            Outcome::Skipped { reason } => callback.on_item_skipped(index, total, &reason.to_string()),
            Outcome::Failed { error } => callback.on_item_failed(index, total, &error.to_string()),
        }
        reports.push(report);
    }

    let succeeded: Vec<&ItemReport> = reports.iter().filter(|r| r.is_converted()).collect();
    let succeeded_count = succeeded.len();
    let processed_names: Vec<String> = succeeded.iter().map(|r| r.name.clone()).collect();
    callback.on_batch_complete(total, succeeded_count);

    // ── Finalizing ───────────────────────────────────────────────────────
    let total_pages = assembler.page_count();
    if succeeded_count == 0 || total_pages == 0 {
        let skipped = reports
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Skipped { .. }))
            .count();
        let failed = reports.iter().filter(|r| r.is_failed()).count();
        warn!(
            "Batch undeliverable: {} skipped, {} failed, {} page(s)",
            skipped, failed, total_pages
        );
        return Err(MergeError::NoDeliverableOutput {
            skipped,
            failed,
            items: reports,
        });
    }

    let bytes = tokio::task::spawn_blocking(move || assembler.finalize())
        .await
        .map_err(|e| MergeError::critical("finalizing the artifact", e))?
        .map_err(|e| MergeError::critical("finalizing the artifact", e))?;
    debug!("Finalized artifact: {} bytes", bytes.len());

    let store = ArtifactStore::new(&config.output_dir);
    debug!("Persisting {} into {}", file_name, store.dir().display());
    let artifact = store
        .persist(&file_name, bytes)
        .await
        .map_err(|e| MergeError::critical("persisting the artifact", e))?;

    let result = BatchResult {
        succeeded_count,
        processed_names,
        artifact,
        total_pages,
        items: reports,
        duration_ms: start.elapsed().as_millis() as u64,
    };
    info!(
        "Batch complete: {} of {} item(s), {} page(s), {}ms",
        succeeded_count, total, total_pages, result.duration_ms
    );
    Ok(result)
}
