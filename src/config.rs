//! Configuration types for batch conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. The external capabilities (document
//! renderer, browser, PostScript interpreter, mail parser) are trait objects:
//! a pre-built one set on the builder takes precedence, otherwise the
//! default implementation is used, which discovers its executable through
//! the `renderer-locate` crate.

use crate::error::MergeError;
use crate::pipeline::mail::MailParser;
use crate::pipeline::markup::{BrowserRenderer, HeadlessChromium, PaperFormat, PrintOptions};
use crate::pipeline::msg::OutlookMsgParser;
use crate::pipeline::office::{DocumentRenderer, LibreOffice};
use crate::pipeline::postscript::{Ghostscript, PostscriptInterpreter};
use crate::pipeline::text::{CharsetPolicy, TextLayout};
use crate::progress::{BatchProgressCallback, ProgressCallback};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Valid range for [`ConversionConfig::item_timeout_secs`].
pub const ITEM_TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 1..=3600;

/// Configuration for a batch conversion.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use merge2pdf::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .output_dir("/srv/processed")
///     .item_timeout_secs(60)
///     .build()
///     .unwrap();
/// assert_eq!(config.item_timeout_secs, 60);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Directory where delivered artifacts are persisted. Default: `./processed`.
    pub output_dir: PathBuf,

    /// Root of every per-item scratch directory. Default: `$TMP/merge2pdf`.
    ///
    /// Concurrent batches may share it; scratch names never collide.
    pub scratch_root: PathBuf,

    /// Time limit for one item (or one archive member). Range: 1–3600. Default: 120.
    ///
    /// A conversion that overruns is abandoned and recorded as failed. Any
    /// subprocess it started is killed.
    pub item_timeout_secs: u64,

    /// Time the headless browser gives a page to settle before printing. Default: 500.
    pub network_idle_ms: u64,

    /// Page size of HTML documents printed by the browser. Default: A4.
    pub paper_format: PaperFormat,

    /// Characters allowed on drawn text pages.
    pub charset: CharsetPolicy,

    /// Geometry of drawn text pages.
    pub text_layout: TextLayout,

    /// Pre-built office renderer. Default: headless LibreOffice.
    pub document_renderer: Option<Arc<dyn DocumentRenderer>>,

    /// Pre-built HTML renderer. Default: headless Chromium.
    pub browser: Option<Arc<dyn BrowserRenderer>>,

    /// Pre-built PostScript interpreter. Default: Ghostscript.
    pub postscript: Option<Arc<dyn PostscriptInterpreter>>,

    /// Pre-built mail-container parser. Default: Outlook `.msg` reader.
    pub mail_parser: Option<Arc<dyn MailParser>>,

    /// Receives per-item progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("processed"),
            scratch_root: std::env::temp_dir().join("merge2pdf"),
            item_timeout_secs: 120,
            network_idle_ms: 500,
            paper_format: PaperFormat::default(),
            charset: CharsetPolicy::default(),
            text_layout: TextLayout::default(),
            document_renderer: None,
            browser: None,
            postscript: None,
            mail_parser: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("output_dir", &self.output_dir)
            .field("scratch_root", &self.scratch_root)
            .field("item_timeout_secs", &self.item_timeout_secs)
            .field("network_idle_ms", &self.network_idle_ms)
            .field("paper_format", &self.paper_format)
            .field("charset", &self.charset)
            .field("text_layout", &self.text_layout)
            .field(
                "document_renderer",
                &self.document_renderer.as_ref().map(|_| "<dyn DocumentRenderer>"),
            )
            .field("browser", &self.browser.as_ref().map(|_| "<dyn BrowserRenderer>"))
            .field(
                "postscript",
                &self.postscript.as_ref().map(|_| "<dyn PostscriptInterpreter>"),
            )
            .field("mail_parser", &self.mail_parser.as_ref().map(|_| "<dyn MailParser>"))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_secs)
    }

    pub fn print_options(&self) -> PrintOptions {
        PrintOptions {
            format: self.paper_format,
            network_idle_ms: self.network_idle_ms,
            ..PrintOptions::default()
        }
    }

    // ── Capability resolution ────────────────────────────────────────────

    pub fn resolve_document_renderer(&self) -> Arc<dyn DocumentRenderer> {
        match &self.document_renderer {
            Some(r) => Arc::clone(r),
            None => Arc::new(LibreOffice::new()),
        }
    }

    pub fn resolve_browser(&self) -> Arc<dyn BrowserRenderer> {
        match &self.browser {
            Some(b) => Arc::clone(b),
            None => Arc::new(HeadlessChromium::new()),
        }
    }

    pub fn resolve_postscript(&self) -> Arc<dyn PostscriptInterpreter> {
        match &self.postscript {
            Some(p) => Arc::clone(p),
            None => Arc::new(Ghostscript::new()),
        }
    }

    pub fn resolve_mail_parser(&self) -> Arc<dyn MailParser> {
        match &self.mail_parser {
            Some(p) => Arc::clone(p),
            None => Arc::new(OutlookMsgParser),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn scratch_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_root = dir.into();
        self
    }

    pub fn item_timeout_secs(mut self, secs: u64) -> Self {
        self.config.item_timeout_secs = secs;
        self
    }

    pub fn network_idle_ms(mut self, ms: u64) -> Self {
        self.config.network_idle_ms = ms;
        self
    }

    pub fn paper_format(mut self, format: PaperFormat) -> Self {
        self.config.paper_format = format;
        self
    }

    pub fn charset(mut self, policy: CharsetPolicy) -> Self {
        self.config.charset = policy;
        self
    }

    pub fn text_layout(mut self, layout: TextLayout) -> Self {
        self.config.text_layout = layout;
        self
    }

    pub fn document_renderer(mut self, renderer: Arc<dyn DocumentRenderer>) -> Self {
        self.config.document_renderer = Some(renderer);
        self
    }

    pub fn browser(mut self, browser: Arc<dyn BrowserRenderer>) -> Self {
        self.config.browser = Some(browser);
        self
    }

    pub fn postscript(mut self, interpreter: Arc<dyn PostscriptInterpreter>) -> Self {
        self.config.postscript = Some(interpreter);
        self
    }

    pub fn mail_parser(mut self, parser: Arc<dyn MailParser>) -> Self {
        self.config.mail_parser = Some(parser);
        self
    }

    pub fn progress_callback(mut self, callback: Arc<dyn BatchProgressCallback>) -> Self {
        self.config.progress_callback = Some(callback);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, MergeError> {
        let c = &self.config;
        if !ITEM_TIMEOUT_RANGE.contains(&c.item_timeout_secs) {
            return Err(MergeError::InvalidConfig(format!(
                "item timeout must be 1-3600 seconds, got {}",
                c.item_timeout_secs
            )));
        }
        if c.network_idle_ms > c.item_timeout_secs * 1000 {
            return Err(MergeError::InvalidConfig(format!(
                "network idle wait ({} ms) exceeds the item timeout",
                c.network_idle_ms
            )));
        }
        let fallback = c.charset.fallback as u32;
        if !((32..=126).contains(&fallback) || (160..=255).contains(&fallback)) {
            return Err(MergeError::InvalidConfig(format!(
                "charset fallback {:?} cannot be drawn with the page font",
                c.charset.fallback
            )));
        }
        let l = &c.text_layout;
        if l.font_size <= 0.0 || l.leading <= 0.0 || l.page_width <= 0.0 || l.page_height <= 0.0 {
            return Err(MergeError::InvalidConfig(
                "text layout dimensions must be positive".into(),
            ));
        }
        if c.output_dir.as_os_str().is_empty() {
            return Err(MergeError::InvalidConfig("output directory is empty".into()));
        }
        Ok(self.config)
    }
}
