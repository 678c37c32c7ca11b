//! CLI binary for book-illustrator.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig`, runs one manuscript and writes the PDF.

use anyhow::{Context, Result};
use book_illustrator::{
    render_stored, ErrorBody, FsStorage, ManuscriptId, NewManuscript, Pipeline, PipelineConfig, PipelineError,
    PipelineProgressCallback, ProgressCallback, ResolutionSummary, RunStage,
};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner while the manuscript is structured, then a bar over the
/// illustration placeholders.
struct CliProgressCallback {
    bar: ProgressBar,
    unresolved: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Starting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            unresolved: AtomicUsize::new(0),
        })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage(&self, stage: RunStage) {
        let msg = match stage {
            RunStage::Structuring => "Splitting manuscript into blocks…",
            RunStage::ImageResolving => "Resolving illustrations…",
            RunStage::Rendering => "Laying out the book…",
            RunStage::Persisted => "Saving…",
            RunStage::Delivered => "Done",
            RunStage::Received | RunStage::Failed => "",
        };
        self.bar.set_prefix(stage.to_string());
        self.bar.set_message(msg);
        if stage == RunStage::Failed {
            self.bar.finish_and_clear();
        }
    }

    fn on_images_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>2}/{len} illustrations  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
    }

    fn on_image_resolved(&self, index: usize, total: usize) {
        self.bar
            .println(format!("  {} Illustration {:>2}/{:<2}", green("✓"), index + 1, total));
        self.bar.inc(1);
    }

    fn on_image_unresolved(&self, index: usize, total: usize, reason: &str) {
        self.unresolved.fetch_add(1, Ordering::SeqCst);
        let msg = if reason.chars().count() > 80 {
            format!("{}\u{2026}", reason.chars().take(79).collect::<String>())
        } else {
            reason.to_string()
        };
        self.bar.println(format!(
            "  {} Illustration {:>2}/{:<2}  {}",
            red("✗"),
            index + 1,
            total,
            dim(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, summary: ResolutionSummary) {
        self.bar.finish_and_clear();
        let unresolved = self.unresolved.load(Ordering::SeqCst).max(summary.unresolved);
        if unresolved == 0 {
            eprintln!(
                "{} {} illustrations placed",
                green("✔"),
                bold(&summary.resolved.to_string())
            );
        } else {
            eprintln!(
                "{} {} illustrations placed  ({} left out)",
                yellow("⚠"),
                bold(&summary.resolved.to_string()),
                red(&unresolved.to_string())
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Illustrate a manuscript (title and author default to the file name / "Unknown")
  illustrate story.txt --title "The Fox" --author "Anon"

  # Offline layout check with local images instead of generated ones
  illustrate story.txt --test-mode --test-images ./test_images

  # Read the manuscript from stdin, write to a chosen file
  cat story.txt | illustrate - -o fox.pdf

  # Re-render a stored manuscript without calling any model
  illustrate --rerender 2f1c0a4e9b7d4c1e8a5b3d6f7e8c9a0b -o again.pdf

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY            Google Gemini API key (text and image generation)
  ILLUSTRATE_TEST_MODE      Use the local image pool instead of image models
  ILLUSTRATE_TEST_IMAGES    Directory of the local image pool
  ILLUSTRATE_STORAGE        Storage root for manuscripts, snapshots and books
  ILLUSTRATE_FONT           TrueType font embedded in the PDF
  RUST_LOG                  Override the log filter
"#;

/// Turn a plain-text manuscript into an illustrated PDF book.
#[derive(Parser, Debug)]
#[command(
    name = "illustrate",
    version,
    about = "Turn a plain-text manuscript into an illustrated PDF book",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Manuscript text file, or `-` for stdin.
    #[arg(required_unless_present = "rerender")]
    input: Option<PathBuf>,

    /// Book title. Defaults to the input file stem.
    #[arg(long)]
    title: Option<String>,

    /// Book author.
    #[arg(long, default_value = "Unknown")]
    author: String,

    /// Write the PDF here instead of `generated_book_<id>.pdf`.
    #[arg(short, long, env = "ILLUSTRATE_OUTPUT")]
    output: Option<PathBuf>,

    /// Re-render the stored snapshot of this manuscript id.
    #[arg(long, conflicts_with = "input")]
    rerender: Option<ManuscriptId>,

    /// Assign images from the local pool instead of generating them.
    #[arg(long, env = "ILLUSTRATE_TEST_MODE")]
    test_mode: bool,

    /// Directory of the local image pool.
    #[arg(long, env = "ILLUSTRATE_TEST_IMAGES", default_value = "test_images")]
    test_images: PathBuf,

    /// Storage root for manuscripts, snapshots, images and books.
    #[arg(long, env = "ILLUSTRATE_STORAGE", default_value = "media")]
    storage: PathBuf,

    /// TrueType font to embed. Helvetica is used when it cannot be read.
    #[arg(long, env = "ILLUSTRATE_FONT", default_value = "DejaVu_Sans/DejaVuSans.ttf")]
    font: PathBuf,

    /// Text model candidates, in order (repeat or comma-separate).
    #[arg(long = "text-model", value_delimiter = ',')]
    text_models: Vec<String>,

    /// Image model candidates, in order (repeat or comma-separate).
    #[arg(long = "image-model", value_delimiter = ',')]
    image_models: Vec<String>,

    /// edgequake-llm provider for text generation.
    #[arg(long, env = "ILLUSTRATE_TEXT_PROVIDER", default_value = "gemini")]
    provider: String,

    /// Seconds to pause all model calls after a rate-limit response.
    #[arg(long, env = "ILLUSTRATE_BACKOFF", default_value_t = 10)]
    backoff: u64,

    /// Illustrations resolved concurrently.
    #[arg(short, long, env = "ILLUSTRATE_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Per-call model timeout in seconds (0 disables).
    #[arg(long, env = "ILLUSTRATE_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Print a JSON result (or error body) on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Serialize)]
struct JsonResult<'a> {
    manuscript_id: String,
    path: &'a Path,
    bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ResolutionSummary>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level logs unless asked for more.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };

    // ── Re-render mode: storage only, no model clients ──────────────────
    if let Some(id) = cli.rerender {
        let storage = match FsStorage::open(cli.storage.clone()) {
            Ok(s) => s,
            Err(e) => return fail(&cli, e),
        };
        let pdf = match render_stored(&storage, id, Some(cli.font.clone())).await {
            Ok(pdf) => pdf,
            Err(e) => return fail(&cli, e),
        };
        let path = cli
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("generated_book_{id}.pdf")));
        return deliver(&cli, id, &path, &pdf, None).await;
    }

    let config = match build_config(&cli, progress_cb) {
        Ok(c) => c,
        Err(e) => return fail(&cli, e),
    };
    let pipeline = match Pipeline::from_config(config) {
        Ok(p) => p,
        Err(e) => return fail(&cli, e),
    };

    // ── Full run ─────────────────────────────────────────────────────────
    let manuscript = read_manuscript(&cli).await?;
    let book = match pipeline.submit(manuscript).await {
        Ok(b) => b,
        Err(e) => return fail(&cli, e),
    };
    let path = cli.output.clone().unwrap_or_else(|| PathBuf::from(&book.filename));
    deliver(&cli, book.manuscript_id, &path, &book.pdf, Some(book.summary)).await
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig, PipelineError> {
    let mut builder = PipelineConfig::builder()
        .test_mode(cli.test_mode)
        .test_image_dir(&cli.test_images)
        .storage_root(&cli.storage)
        .font_path(Some(cli.font.clone()))
        .text_provider(&cli.provider)
        .rate_limit_backoff_secs(cli.backoff)
        .image_concurrency(cli.concurrency)
        .api_timeout_secs(cli.api_timeout);

    if !cli.text_models.is_empty() {
        builder = builder.text_models(cli.text_models.iter());
    }
    if !cli.image_models.is_empty() {
        builder = builder.image_models(cli.image_models.iter());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build()
}

async fn read_manuscript(cli: &Cli) -> Result<NewManuscript> {
    let input = cli.input.as_deref().context("No manuscript given")?;
    let text = if input == Path::new("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read manuscript from stdin")?;
        buf
    } else {
        tokio::fs::read_to_string(input)
            .await
            .with_context(|| format!("Failed to read manuscript from {}", input.display()))?
    };

    let title = cli.title.clone().unwrap_or_else(|| {
        input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| s != "-")
            .unwrap_or_else(|| "Untitled".to_string())
    });

    Ok(NewManuscript::new(title, cli.author.clone(), text))
}

async fn deliver(
    cli: &Cli,
    id: ManuscriptId,
    path: &Path,
    pdf: &[u8],
    summary: Option<ResolutionSummary>,
) -> Result<()> {
    tokio::fs::write(path, pdf)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    if cli.json {
        let result = JsonResult {
            manuscript_id: id.to_string(),
            path,
            bytes: pdf.len(),
            summary,
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialise result")?
        );
    } else if !cli.quiet {
        eprintln!(
            "{}  {}  {}  →  {}",
            green("✔"),
            id,
            dim(&format!("{} bytes", pdf.len())),
            bold(&path.display().to_string())
        );
    }
    Ok(())
}

/// Report a pipeline error and exit non-zero.
///
/// In JSON mode only the generic body goes to stdout; details stay in the log.
fn fail(cli: &Cli, err: PipelineError) -> Result<()> {
    if cli.json {
        let body = ErrorBody::from(&err);
        println!(
            "{}",
            serde_json::to_string_pretty(&body).context("Failed to serialise error")?
        );
        std::process::exit(1);
    }
    Err(anyhow::Error::new(err).context("Illustration failed"))
}
