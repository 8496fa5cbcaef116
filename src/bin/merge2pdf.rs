//! CLI binary for merge2pdf.
//!
//! A thin shim over the library crate: reads the given files, maps flags to
//! `ConversionConfig`, runs one batch and reports where the PDF went.

use anyhow::{Context, Result};
use clap::Parser;
use merge2pdf::{
    convert, BatchProgressCallback, ConversionConfig, InputItem, ItemReport, MergeError, Outcome,
    ProgressCallback, KNOWN_TOOLS,
};
use indicatif::{ProgressBar, ProgressStyle};
use merge2pdf::pipeline::markup::PaperFormat;
use renderer_locate::Renderer;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar over the batch plus a log line per
/// file as it finishes.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Start time and name of the file currently being converted.
    current: Mutex<HashMap<usize, (String, Instant)>>,
    pages: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        bar.set_style(style);
        bar.set_prefix("Merging");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            current: Mutex::new(HashMap::new()),
            pages: AtomicUsize::new(0),
        })
    }

    /// Name and elapsed seconds of a finished file.
    fn finish_item(&self, index: usize) -> (String, f64) {
        self.current
            .lock()
            .unwrap()
            .remove(&index)
            .map(|(name, t)| (name, t.elapsed().as_secs_f64()))
            .unwrap_or_default()
    }

    fn log_line(&self, mark: String, index: usize, total: usize, name: &str, detail: String, secs: f64) {
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {:<32}  {}  {}",
            mark,
            index,
            total,
            name,
            detail,
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_items: usize) {
        self.bar.set_length(total_items as u64);
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Merging {total_items} file(s)…"))
        ));
    }

    fn on_item_start(&self, index: usize, _total: usize, name: &str) {
        self.current
            .lock()
            .unwrap()
            .insert(index, (name.to_string(), Instant::now()));
        self.bar.set_message(name.to_string());
    }

    fn on_item_converted(&self, index: usize, total: usize, pages: usize) {
        let (name, secs) = self.finish_item(index);
        self.pages.fetch_add(pages, Ordering::SeqCst);
        self.log_line(green("✓"), index, total, &name, dim(&format!("{pages:>3} page(s)")), secs);
    }

    fn on_item_skipped(&self, index: usize, total: usize, reason: &str) {
        let (name, secs) = self.finish_item(index);
        self.log_line(yellow("–"), index, total, &name, yellow(&truncate(reason)), secs);
    }

    fn on_item_failed(&self, index: usize, total: usize, error: &str) {
        let (name, secs) = self.finish_item(index);
        self.log_line(red("✗"), index, total, &name, red(&truncate(error)), secs);
    }

    fn on_batch_complete(&self, total_items: usize, succeeded: usize) {
        self.bar.finish_and_clear();
        let pages = self.pages.load(Ordering::SeqCst);
        let mark = if succeeded == 0 {
            red("✘")
        } else if succeeded < total_items {
            cyan("⚠")
        } else {
            green("✔")
        };
        eprintln!(
            "{} {}/{} file(s) converted, {} page(s)",
            mark,
            bold(&succeeded.to_string()),
            total_items,
            pages
        );
    }
}

/// Keep log lines on one terminal row.
fn truncate(msg: &str) -> String {
    if msg.chars().count() > 80 {
        let head: String = msg.chars().take(79).collect();
        format!("{head}\u{2026}")
    } else {
        msg.to_string()
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Merge scanned pages into one PDF (written to ./processed/)
  merge2pdf --tool jpg-to-pdf page1.jpg page2.jpg page3.jpg -o scans

  # Office documents, in the order given
  merge2pdf --tool doc-to-pdf cover.docx budget.xlsx slides.pptx -o quarterly

  # Everything inside a ZIP archive
  merge2pdf --tool zip-to-pdf bundle.zip

  # Outlook message body as a text page
  merge2pdf --tool msg-to-pdf meeting.msg

  # Machine-readable result for scripting
  merge2pdf --tool png-to-pdf --json a.png b.png > result.json

  # Which tools exist / which renderers were found
  merge2pdf --list-tools
  merge2pdf --check-renderers

OUTPUT:
  The PDF is written to <output-dir>/<name>.pdf. The name is the value of
  --output with its extension removed and any character outside A-Z, a-z,
  0-9, '_' and '-' replaced by '_'. Without --output a timestamped name
  (converted_output_<millis>.pdf) is used.

  Files that cannot be converted are reported and skipped. The command fails
  only when no file at all could be converted.

ENVIRONMENT VARIABLES:
  MERGE2PDF_SOFFICE       Path to LibreOffice `soffice` (office documents)
  MERGE2PDF_CHROMIUM      Path to Chromium / Chrome (HTML)
  MERGE2PDF_GHOSTSCRIPT   Path to Ghostscript `gs` (PostScript / EPS)
  RUST_LOG                Override the log filter (e.g. merge2pdf=debug)
"#;

/// Merge images, office documents, HTML, PostScript, e-mail and ZIP archives
/// into one PDF.
#[derive(Parser, Debug)]
#[command(
    name = "merge2pdf",
    version,
    about = "Merge files of mixed formats into a single PDF",
    long_about = "Convert every given file with the strategy its type calls for (image \
embedding, LibreOffice, headless Chromium, Ghostscript, Outlook message text or ZIP \
expansion) and append the pages, in order, to one PDF.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Files to merge, in page order.
    #[arg(required_unless_present_any = ["list_tools", "check_renderers"])]
    files: Vec<PathBuf>,

    /// Tool identifier such as jpg-to-pdf, doc-to-pdf or zip-to-pdf.
    #[arg(short, long, env = "MERGE2PDF_TOOL",
          required_unless_present_any = ["list_tools", "check_renderers"])]
    tool: Option<String>,

    /// Name of the merged PDF (sanitised; extension optional).
    #[arg(short, long)]
    output: Option<String>,

    /// Directory receiving the merged PDF.
    #[arg(long, env = "MERGE2PDF_OUTPUT_DIR", default_value = "processed")]
    output_dir: PathBuf,

    /// Directory for per-item scratch space.
    #[arg(long, env = "MERGE2PDF_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Per-file conversion timeout in seconds (1–3600).
    #[arg(long, env = "MERGE2PDF_TIMEOUT", default_value_t = 120,
          value_parser = clap::value_parser!(u64).range(1..=3600))]
    timeout: u64,

    /// Page size for printed HTML documents (a4 or letter).
    #[arg(long, env = "MERGE2PDF_PAPER", default_value = "a4")]
    paper: PaperFormat,

    /// Print the result (or failure report) as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "MERGE2PDF_NO_PROGRESS")]
    no_progress: bool,

    /// List the known tool identifiers and exit.
    #[arg(long)]
    list_tools: bool,

    /// Report which external renderers can be found and exit.
    #[arg(long)]
    check_renderers: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MERGE2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose brings them back.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Informational modes ──────────────────────────────────────────────
    if cli.list_tools {
        print_tools(cli.json)?;
        return Ok(());
    }
    if cli.check_renderers {
        check_renderers();
        return Ok(());
    }

    // ── Read inputs ──────────────────────────────────────────────────────
    let mut items = Vec::with_capacity(cli.files.len());
    for path in &cli.files {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        // The declared type is left empty: classification falls back to the extension.
        items.push(InputItem::from_bytes(name, None, bytes));
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Run batch ────────────────────────────────────────────────────────
    let tool = cli.tool.as_deref().unwrap_or_default();
    match convert(items, tool, cli.output.as_deref(), &config).await {
        Ok(result) => {
            if cli.json {
                let json =
                    serde_json::to_string_pretty(&result).context("Failed to serialise result")?;
                println!("{json}");
            } else {
                if !cli.quiet && !show_progress {
                    print_items(&result.items);
                }
                if !cli.quiet {
                    eprintln!(
                        "{}  {}  {}ms  →  {}",
                        green("✔"),
                        result.message(),
                        result.duration_ms,
                        bold(&result.artifact.path.display().to_string()),
                    );
                    let rejected: Vec<&str> = result.rejected().map(|r| r.name.as_str()).collect();
                    if !rejected.is_empty() {
                        eprintln!(
                            "{}  {} file(s) not converted: {}",
                            yellow("!"),
                            rejected.len(),
                            rejected.join(", ")
                        );
                    }
                }
                println!("{}", result.artifact.path.display());
            }
            Ok(())
        }
        Err(err) => {
            if cli.json {
                let json = serde_json::to_string_pretty(&err.report())
                    .context("Failed to serialise failure report")?;
                println!("{json}");
            } else if let MergeError::NoDeliverableOutput { items, .. } = &err {
                if !cli.quiet && !show_progress {
                    print_items(items);
                }
            }
            Err(err).context("Merge failed")
        }
    }
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .output_dir(&cli.output_dir)
        .item_timeout_secs(cli.timeout)
        .paper_format(cli.paper);

    if let Some(ref dir) = cli.scratch_dir {
        builder = builder.scratch_root(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Per-file outcome lines when no progress bar printed them.
fn print_items(items: &[ItemReport]) {
    for item in items {
        print_item(item, 1);
    }
}

fn print_item(item: &ItemReport, depth: usize) {
    let indent = "  ".repeat(depth);
    let line = match &item.outcome {
        Outcome::Converted { pages } => format!("{} {}  {}", green("✓"), item.name, dim(&format!("{} page(s)", pages.len()))),
        Outcome::Skipped { reason } => format!("{} {}  {}", yellow("–"), item.name, yellow(&reason.to_string())),
        Outcome::Failed { error } => format!("{} {}  {}", red("✗"), item.name, red(&error.to_string())),
    };
    eprintln!("{indent}{line}");
    for entry in &item.entries {
        print_item(entry, depth + 1);
    }
}

fn print_tools(json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(KNOWN_TOOLS).context("Failed to serialise tools")?;
        println!("{out}");
        return Ok(());
    }
    for tool in KNOWN_TOOLS {
        println!("{:<14} {:<20} {}", bold(tool.id), tool.label, dim(&tool.extensions.join(" ")));
    }
    Ok(())
}

fn check_renderers() {
    for renderer in Renderer::ALL {
        match renderer_locate::locate(renderer) {
            Ok(path) => println!(
                "{} {:<12} {}",
                green("✓"),
                format!("{renderer:?}"),
                path.display()
            ),
            Err(e) => println!(
                "{} {:<12} {}  {}",
                red("✗"),
                format!("{renderer:?}"),
                e,
                dim(&format!("(set {})", renderer.env_var()))
            ),
        }
    }
}
