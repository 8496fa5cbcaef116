//! Markup-document (HTML) adapter.
//!
//! The HTML is loaded into a headless browser session and printed to PDF on
//! A4 paper with background graphics, after the page has been given time to
//! settle. The session is a scoped resource: [`convert`] closes it on every
//! exit path, and implementations must also release their process on drop
//! so a cancelled (timed-out) conversion leaks nothing.

use crate::error::CapabilityError;
use crate::pipeline::external;
use crate::pipeline::page::{import_rendered, Pages};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use renderer_locate::Renderer;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Paper size of the printed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaperFormat {
    #[default]
    A4,
    Letter,
}

impl PaperFormat {
    fn css_size(self) -> &'static str {
        match self {
            PaperFormat::A4 => "A4",
            PaperFormat::Letter => "letter",
        }
    }
}

impl std::str::FromStr for PaperFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a4" => Ok(PaperFormat::A4),
            "letter" => Ok(PaperFormat::Letter),
            other => Err(format!("unknown paper format '{other}' (expected a4 or letter)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrintOptions {
    pub format: PaperFormat,
    pub print_background: bool,
    /// Time the page is given to finish loading resources before capture.
    pub network_idle_ms: u64,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            format: PaperFormat::A4,
            print_background: true,
            network_idle_ms: 500,
        }
    }
}

/// Launches browser sessions.
#[async_trait]
pub trait BrowserRenderer: Send + Sync {
    fn name(&self) -> &str;

    /// Start a session whose files live under `workdir`.
    async fn launch(&self, workdir: &Path) -> Result<Box<dyn BrowserSession>, CapabilityError>;
}

/// One live browser page.
#[async_trait]
pub trait BrowserSession: Send {
    async fn set_content(&mut self, html: &str) -> Result<(), CapabilityError>;

    async fn print_pdf(&mut self, options: &PrintOptions) -> Result<Vec<u8>, CapabilityError>;

    /// Tear the session down.
    async fn close(self: Box<Self>) -> Result<(), CapabilityError>;
}

/// Render HTML to imported pages, always closing the browser session.
pub async fn convert(
    browser: &dyn BrowserRenderer,
    html: &[u8],
    options: &PrintOptions,
    workdir: &Path,
) -> Result<Pages, CapabilityError> {
    let html = String::from_utf8_lossy(html);
    let mut session = browser.launch(workdir).await?;

    let printed = match session.set_content(&html).await {
        Ok(()) => session.print_pdf(options).await,
        Err(e) => Err(e),
    };
    if let Err(e) = session.close().await {
        warn!("Failed to close {} session: {}", browser.name(), e);
    }

    import_rendered(&printed?)
}

// ── Headless Chromium ────────────────────────────────────────────────────

/// Chromium / Google Chrome driven through `--headless --print-to-pdf`.
#[derive(Debug, Clone, Default)]
pub struct HeadlessChromium {
    program: Option<PathBuf>,
}

impl HeadlessChromium {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Some(program.into()),
        }
    }
}

#[async_trait]
impl BrowserRenderer for HeadlessChromium {
    fn name(&self) -> &str {
        "headless Chromium"
    }

    async fn launch(&self, workdir: &Path) -> Result<Box<dyn BrowserSession>, CapabilityError> {
        let program = external::resolve_program(self.program.as_deref(), Renderer::Chromium)?;
        let profile = workdir.join("profile");
        tokio::fs::create_dir_all(&profile).await?;
        Ok(Box::new(ChromiumSession {
            program,
            profile,
            page: workdir.join("page.html"),
            output: workdir.join("page.pdf"),
            html: None,
        }))
    }
}

/// Each print is a single short-lived browser process spawned with
/// `kill_on_drop`, so dropping the session mid-print kills it.
struct ChromiumSession {
    program: PathBuf,
    profile: PathBuf,
    page: PathBuf,
    output: PathBuf,
    html: Option<String>,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn set_content(&mut self, html: &str) -> Result<(), CapabilityError> {
        self.html = Some(html.to_string());
        Ok(())
    }

    async fn print_pdf(&mut self, options: &PrintOptions) -> Result<Vec<u8>, CapabilityError> {
        let html = self
            .html
            .as_deref()
            .ok_or_else(|| CapabilityError::Invalid("no content loaded".into()))?;
        tokio::fs::write(&self.page, inject_print_css(html, options)).await?;

        let mut args: Vec<OsString> = [
            "--headless",
            "--disable-gpu",
            "--no-sandbox",
            "--disable-setuid-sandbox",
            "--disable-dev-shm-usage",
            "--no-first-run",
            "--no-pdf-header-footer",
            "--print-to-pdf-no-header",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        args.push(format!("--virtual-time-budget={}", options.network_idle_ms).into());
        let mut user_data = OsString::from("--user-data-dir=");
        user_data.push(&self.profile);
        args.push(user_data);
        let mut print_to = OsString::from("--print-to-pdf=");
        print_to.push(&self.output);
        args.push(print_to);
        args.push(page_url(&self.page).into());

        let run = external::run(&self.program, &args, None).await?;
        debug!("Chromium printed {}", self.output.display());
        external::read_output(&self.program, &self.output, &run.console).await
    }

    async fn close(self: Box<Self>) -> Result<(), CapabilityError> {
        match tokio::fs::remove_dir_all(&self.profile).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn page_url(path: &Path) -> String {
    let s = path.to_string_lossy().replace('\\', "/");
    if s.starts_with('/') {
        format!("file://{s}")
    } else {
        format!("file:///{s}")
    }
}

static HEAD_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<head(\s[^>]*)?>").unwrap());
static HTML_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<html(\s[^>]*)?>").unwrap());

/// Add page-size and background rules the CLI print path cannot set as flags.
fn inject_print_css(html: &str, options: &PrintOptions) -> String {
    let mut css = format!("@page {{ size: {}; }}", options.format.css_size());
    if options.print_background {
        css.push_str(" html, body { -webkit-print-color-adjust: exact; print-color-adjust: exact; }");
    }
    let style = format!("<style>{css}</style>");

    let anchor = HEAD_OPEN.find(html).or_else(|| HTML_OPEN.find(html));
    match anchor {
        Some(m) => format!("{}{}{}", &html[..m.end()], style, &html[m.end()..]),
        None => format!("{style}{html}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::assemble::tests::sample_pdf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counters {
        launched: AtomicUsize,
        closed: AtomicUsize,
    }

    struct FakeBrowser {
        counters: Arc<Counters>,
        fail_print: bool,
    }

    struct FakeSession {
        counters: Arc<Counters>,
        fail_print: bool,
        content: String,
    }

    #[async_trait]
    impl BrowserRenderer for FakeBrowser {
        fn name(&self) -> &str {
            "fake"
        }
        async fn launch(&self, _: &Path) -> Result<Box<dyn BrowserSession>, CapabilityError> {
            self.counters.launched.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSession {
                counters: Arc::clone(&self.counters),
                fail_print: self.fail_print,
                content: String::new(),
            }))
        }
    }

    #[async_trait]
    impl BrowserSession for FakeSession {
        async fn set_content(&mut self, html: &str) -> Result<(), CapabilityError> {
            self.content = html.to_string();
            Ok(())
        }
        async fn print_pdf(&mut self, options: &PrintOptions) -> Result<Vec<u8>, CapabilityError> {
            assert_eq!(options.format, PaperFormat::A4);
            assert!(options.print_background);
            if self.fail_print {
                return Err(CapabilityError::Invalid("renderer crashed".into()));
            }
            Ok(sample_pdf(&[(595, 842)]))
        }
        async fn close(self: Box<Self>) -> Result<(), CapabilityError> {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn session_is_closed_after_success() {
        let counters = Arc::new(Counters::default());
        let browser = FakeBrowser { counters: Arc::clone(&counters), fail_print: false };
        let dir = tempfile::tempdir().unwrap();
        let pages = convert(&browser, b"<p>hi</p>", &PrintOptions::default(), dir.path())
            .await
            .unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(counters.launched.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn session_is_closed_after_failure() {
        let counters = Arc::new(Counters::default());
        let browser = FakeBrowser { counters: Arc::clone(&counters), fail_print: true };
        let dir = tempfile::tempdir().unwrap();
        let err = convert(&browser, b"<p>hi</p>", &PrintOptions::default(), dir.path()).await;
        assert!(err.is_err());
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn print_css_goes_inside_head() {
        let html = "<!DOCTYPE html><html><HEAD><title>t</title></HEAD><body></body></html>";
        let out = inject_print_css(html, &PrintOptions::default());
        assert!(out.starts_with("<!DOCTYPE html><html><HEAD><style>@page { size: A4; }"));
        assert!(out.contains("print-color-adjust: exact"));
    }

    #[test]
    fn print_css_falls_back_to_prefix() {
        let out = inject_print_css("<p>x</p>", &PrintOptions { print_background: false, ..Default::default() });
        assert_eq!(out, "<style>@page { size: A4; }</style><p>x</p>");
    }

    #[test]
    fn letter_paper_sets_letter_page_size() {
        let format: PaperFormat = " Letter".parse().unwrap();
        let options = PrintOptions { format, print_background: false, ..Default::default() };
        assert_eq!(inject_print_css("<p>x</p>", &options), "<style>@page { size: letter; }</style><p>x</p>");
        assert!("legal".parse::<PaperFormat>().is_err());
    }

    #[test]
    fn header_tag_is_not_mistaken_for_head() {
        let out = inject_print_css("<html><header>x</header></html>", &PrintOptions::default());
        assert!(out.starts_with("<html><style>"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn chromium_session_cleans_profile() {
        let dir = tempfile::tempdir().unwrap();
        let browser = HeadlessChromium::with_program("false");
        let mut session = browser.launch(dir.path()).await.unwrap();
        assert!(dir.path().join("profile").exists());
        session.set_content("<p>x</p>").await.unwrap();
        assert!(session.print_pdf(&PrintOptions::default()).await.is_err());
        session.close().await.unwrap();
        assert!(!dir.path().join("profile").exists());
    }
}
