//! Per-item dispatch: classify, convert under a time limit, append.
//!
//! ```text
//!  InputItem ─▶ classify ─┬─ Unsupported ─────────────────────▶ Skipped
//!                         ├─ Archive ─▶ archive::expand ──────▶ Converted | Skipped | Failed
//!                         └─ leaf ─▶ ScratchDir + timeout ─┬──▶ Converted (pages appended)
//!                                                          └──▶ Failed
//! ```
//!
//! Every leaf conversion (an uploaded file or one archive member) gets its
//! own scratch directory, released on every exit path, and runs under the
//! configured timeout. Capability diagnostics are redacted before they are
//! stored in a report.

use crate::config::ConversionConfig;
use crate::error::{CapabilityError, ItemError, SkipReason};
use crate::output::ItemReport;
use crate::pipeline::archive;
use crate::pipeline::assemble::PageAssembler;
use crate::pipeline::classify::{classify, effective_media_type, Classification, StrategyTag, ToolIntent};
use crate::pipeline::input::InputItem;
use crate::pipeline::mail::{self, MailParser};
use crate::pipeline::markup::{self, BrowserRenderer, PrintOptions};
use crate::pipeline::office::{self, DocumentRenderer};
use crate::pipeline::page::{Page, PageSize, Pages};
use crate::pipeline::postscript::{self, PostscriptInterpreter};
use crate::pipeline::raster;
use crate::pipeline::scratch::Workspace;
use crate::store::sanitize_output_name;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Capabilities resolved once per batch.
struct Capabilities {
    document: Arc<dyn DocumentRenderer>,
    browser: Arc<dyn BrowserRenderer>,
    postscript: Arc<dyn PostscriptInterpreter>,
    mail: Arc<dyn MailParser>,
}

/// Converts items of one batch. Holds no mutable state; the caller owns the
/// [`PageAssembler`].
pub struct Dispatcher<'a> {
    config: &'a ConversionConfig,
    tool: &'a ToolIntent,
    workspace: Workspace,
    caps: Capabilities,
    print: PrintOptions,
    timeout: Duration,
}

impl<'a> Dispatcher<'a> {
    pub fn new(config: &'a ConversionConfig, tool: &'a ToolIntent) -> Self {
        Self {
            config,
            tool,
            workspace: Workspace::new(&config.scratch_root),
            caps: Capabilities {
                document: config.resolve_document_renderer(),
                browser: config.resolve_browser(),
                postscript: config.resolve_postscript(),
                mail: config.resolve_mail_parser(),
            },
            print: config.print_options(),
            timeout: config.item_timeout(),
        }
    }

    pub fn tool(&self) -> &ToolIntent {
        self.tool
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Classify and convert one uploaded item, appending its pages.
    ///
    /// Never fails: every problem becomes the item's outcome.
    pub async fn process(&self, item: InputItem, assembler: &mut PageAssembler) -> ItemReport {
        let name = item.original_name().to_string();
        let ext = item.extension().to_string();
        let declared = item.declared_media_type().map(str::to_string);

        let tag = match classify(declared.as_deref(), &ext, self.tool) {
            Classification::Strategy(tag) => tag,
            Classification::Unsupported => {
                let reason = SkipReason::Unsupported {
                    media_type: effective_media_type(declared.as_deref(), &ext),
                    extension: ext,
                    tool: self.tool.to_string(),
                };
                warn!("Skipping {}: {}", name, reason);
                return ItemReport::skipped(name, None, reason);
            }
        };
        info!("{}: converting as {}", name, tag);

        let bytes = match item.into_bytes().await {
            Ok(b) => b,
            Err(e) => {
                let error = ItemError::conversion(&name, "upload storage", self.workspace.redact(&e.to_string()));
                warn!("{}", error);
                return ItemReport::failed(name, Some(tag), error);
            }
        };

        if tag == StrategyTag::Archive {
            return archive::expand(self, &name, bytes, assembler).await;
        }

        match self.convert_and_append(&name, tag, bytes, &ext, assembler).await {
            Ok(pages) => ItemReport::converted(name, tag, pages),
            Err(error) => {
                warn!("{}", error);
                ItemReport::failed(name, Some(tag), error)
            }
        }
    }

    /// Run one leaf conversion and hand its pages to the assembler.
    pub(crate) async fn convert_and_append(
        &self,
        name: &str,
        tag: StrategyTag,
        bytes: Vec<u8>,
        ext: &str,
        assembler: &mut PageAssembler,
    ) -> Result<Vec<PageSize>, ItemError> {
        let pages = self.convert_leaf(name, tag, bytes, ext).await?;
        let count = pages.len();
        let sizes = assembler
            .append(pages)
            .map_err(|e| ItemError::conversion(name, "page assembler", e))?;
        debug!("{}: appended {} page(s), artifact now has {}", name, count, assembler.page_count());
        Ok(sizes)
    }

    /// Convert under the item timeout inside a fresh scratch directory.
    async fn convert_leaf(&self, name: &str, tag: StrategyTag, bytes: Vec<u8>, ext: &str) -> Result<Pages, ItemError> {
        let scratch = self
            .workspace
            .scratch_dir(name)
            .map_err(|e| ItemError::conversion(name, "scratch storage", self.workspace.redact(&e.to_string())))?;

        let outcome = tokio::time::timeout(self.timeout, self.run_strategy(name, tag, bytes, ext, scratch.path())).await;
        scratch.release();

        match outcome {
            Ok(Ok(pages)) => Ok(pages),
            Ok(Err(e)) => Err(ItemError::conversion(
                name,
                self.capability_name(tag),
                self.workspace.redact(&e.to_string()),
            )),
            Err(_) => Err(ItemError::Timeout {
                file: name.to_string(),
                secs: self.timeout.as_secs(),
            }),
        }
    }

    async fn run_strategy(
        &self,
        name: &str,
        tag: StrategyTag,
        bytes: Vec<u8>,
        ext: &str,
        workdir: &Path,
    ) -> Result<Pages, CapabilityError> {
        match tag {
            StrategyTag::Raster(kind) => {
                let image = raster::rasterize(bytes, kind).await?;
                Ok(Pages::Single(Page::Image(image)))
            }
            StrategyTag::Office => office::convert(self.caps.document.as_ref(), &bytes, ext, workdir).await,
            StrategyTag::Markup => markup::convert(self.caps.browser.as_ref(), &bytes, &self.print, workdir).await,
            StrategyTag::PostScript => {
                let stem = sanitize_output_name(name).unwrap_or_else(|| "input".to_string());
                postscript::convert(self.caps.postscript.as_ref(), &bytes, &stem, ext, workdir).await
            }
            StrategyTag::MailContainer => {
                mail::convert(
                    Arc::clone(&self.caps.mail),
                    bytes,
                    &self.config.charset,
                    &self.config.text_layout,
                )
                .await
            }
            StrategyTag::Archive => Err(CapabilityError::Invalid("nested archives are not supported".into())),
        }
    }

    fn capability_name(&self, tag: StrategyTag) -> String {
        match tag {
            StrategyTag::Raster(_) => "image decoder".to_string(),
            StrategyTag::Office => self.caps.document.name().to_string(),
            StrategyTag::Markup => self.caps.browser.name().to_string(),
            StrategyTag::PostScript => self.caps.postscript.name().to_string(),
            StrategyTag::MailContainer => self.caps.mail.name().to_string(),
            StrategyTag::Archive => "archive reader".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Outcome;
    use crate::pipeline::raster::tests::png_bytes;
    use async_trait::async_trait;

    struct Failing;

    #[async_trait]
    impl DocumentRenderer for Failing {
        fn name(&self) -> &str {
            "failing renderer"
        }
        async fn render_pdf(&self, _: &[u8], _: &str, workdir: &Path) -> Result<Vec<u8>, CapabilityError> {
            Err(CapabilityError::Invalid(format!("cannot read {}/input.docx", workdir.display())))
        }
    }

    struct Hanging;

    #[async_trait]
    impl DocumentRenderer for Hanging {
        fn name(&self) -> &str {
            "hanging renderer"
        }
        async fn render_pdf(&self, _: &[u8], _: &str, _: &Path) -> Result<Vec<u8>, CapabilityError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Vec::new())
        }
    }

    fn config(scratch: &Path, renderer: Arc<dyn DocumentRenderer>) -> ConversionConfig {
        ConversionConfig::builder()
            .scratch_root(scratch)
            .item_timeout_secs(1)
            .document_renderer(renderer)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn image_is_appended() {
        let scratch = tempfile::tempdir().unwrap();
        let config = config(scratch.path(), Arc::new(Failing));
        let tool: ToolIntent = "png-to-pdf".parse().unwrap();
        let dispatcher = Dispatcher::new(&config, &tool);
        let mut assembler = PageAssembler::new();

        let item = InputItem::from_bytes("dot.png", Some("image/png"), png_bytes(3, 2));
        let report = dispatcher.process(item, &mut assembler).await;
        assert_eq!(
            report.outcome,
            Outcome::Converted { pages: vec![PageSize::new(3.0, 2.0)] }
        );
        assert_eq!(assembler.page_count(), 1);
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unsupported_item_is_skipped() {
        let scratch = tempfile::tempdir().unwrap();
        let config = config(scratch.path(), Arc::new(Failing));
        let tool: ToolIntent = "html-to-pdf".parse().unwrap();
        let dispatcher = Dispatcher::new(&config, &tool);
        let mut assembler = PageAssembler::new();

        let item = InputItem::from_bytes("design.psd", Some("image/vnd.adobe.photoshop"), vec![1, 2]);
        let report = dispatcher.process(item, &mut assembler).await;
        match report.outcome {
            Outcome::Skipped { reason: SkipReason::Unsupported { extension, tool, .. } } => {
                assert_eq!(extension, ".psd");
                assert_eq!(tool, "html-to-pdf");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(assembler.page_count(), 0);
    }

    #[tokio::test]
    async fn failure_diagnostic_is_redacted() {
        let scratch = tempfile::tempdir().unwrap();
        let config = config(scratch.path(), Arc::new(Failing));
        let tool: ToolIntent = "doc-to-pdf".parse().unwrap();
        let dispatcher = Dispatcher::new(&config, &tool);
        let mut assembler = PageAssembler::new();

        let item = InputItem::from_bytes("memo.docx", None, b"PK".to_vec());
        let report = dispatcher.process(item, &mut assembler).await;
        match report.outcome {
            Outcome::Failed { error: ItemError::Conversion { capability, diagnostic, .. } } => {
                assert_eq!(capability, "failing renderer");
                assert!(diagnostic.starts_with("cannot read <scratch>/"), "got {diagnostic}");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn hung_renderer_times_out() {
        let scratch = tempfile::tempdir().unwrap();
        let config = config(scratch.path(), Arc::new(Hanging));
        let tool: ToolIntent = "doc-to-pdf".parse().unwrap();
        let dispatcher = Dispatcher::new(&config, &tool);
        let mut assembler = PageAssembler::new();

        let item = InputItem::from_bytes("slow.docx", None, b"PK".to_vec());
        let report = dispatcher.process(item, &mut assembler).await;
        assert_eq!(
            report.outcome,
            Outcome::Failed { error: ItemError::Timeout { file: "slow.docx".into(), secs: 1 } }
        );
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }
}
