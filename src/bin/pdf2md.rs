//! CLI binary for pdf2md-hub.
//!
//! A thin presentation shell over the library: one subcommand per user
//! action (convert, list backends, save the API key).

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pdf2md_hub::{
    BackendKind, BackendRegistry, ConversionConfig, CredentialStore, JobProgressCallback,
    JobRunner, JobState, ProgressCallback, Upload,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner that follows the job through staging, the remote protocol and
/// persistence.
struct CliProgressCallback {
    bar: ProgressBar,
    started: Instant,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            started: Instant::now(),
        })
    }
}

impl JobProgressCallback for CliProgressCallback {
    fn on_job_start(&self, backend: BackendKind, filename: &str) {
        self.bar.set_prefix(backend.label());
        self.bar.set_message(format!("staging {filename}…"));
    }

    fn on_staged(&self, _path: &Path) {
        self.bar.set_message("converting…");
    }

    fn on_remote_state(&self, state: JobState, polls: u32) {
        let msg = match state {
            JobState::Uploading => "uploading…".to_string(),
            JobState::Processing => format!("waiting for the service ({polls} checks)…"),
            JobState::Active => "file ready".to_string(),
            JobState::Converting => "generating markdown…".to_string(),
            JobState::Done => "done".to_string(),
            JobState::Failed => "failed".to_string(),
        };
        self.bar.set_message(msg);
    }

    fn on_job_complete(&self, backend: BackendKind, output_path: &Path, markdown_len: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {}  {}  {}  →  {}",
            green("✔"),
            bold(backend.label()),
            dim(&format!("{markdown_len} chars")),
            dim(&format!("{:.1}s", self.started.elapsed().as_secs_f64())),
            bold(&output_path.display().to_string()),
        );
    }

    fn on_job_error(&self, backend: BackendKind, error: &str) {
        self.bar.finish_and_clear();
        let first = error.lines().next().unwrap_or(error);
        eprintln!("{} {}  {}", red("✘"), bold(backend.label()), red(first));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Fast text extraction (default backend)
  pdf2md convert report.pdf

  # Layout-aware conversion, JSON result on stdout
  pdf2md convert paper.pdf --backend docling --json > result.json

  # Generative conversion of a scan
  pdf2md set-key AIza...
  pdf2md convert scan.pdf --backend gemini

  # Which backends can run here?
  pdf2md backends --probe

BACKENDS:
  Name                Alias        Engine        Output suffix
  ─────────────────   ──────────   ───────────   ─────────────
  fast-extract        pymupdf      pymupdf4llm   _pymupdf.md
  structure-aware     docling      Docling       _docling.md
  model-rendered      marker       Marker        _marker.md
  format-detect       markitdown   MarkItDown    _markitdown.md
  remote-generative   gemini       Gemini API    _gemini.md

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Gemini API key (overrides the .env file)
  PDF2MD_BACKEND          Default backend for `convert`
  PDF2MD_PYTHON           Python interpreter with the engine packages
  PDF2MD_OUTPUT_DIR       Where artifacts are written (default: output)
  PDF2MD_STAGING_DIR      Per-job staging root (default: temp)

SETUP:
  pip install pymupdf4llm docling marker-pdf markitdown
  Output files are named {input stem}_{suffix}.md and replaced on re-runs.
"#;

/// Convert PDF files to Markdown with one of five backends.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2md",
    version,
    about = "Convert PDF files to Markdown with interchangeable backends",
    long_about = "Convert PDF documents to Markdown using PyMuPDF, Docling, Marker, MarkItDown \
or Google Gemini. Every backend runs through the same pipeline: the upload is staged, converted, \
written to output/{name}_{suffix}.md, and the staging copy is always removed.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory for converted Markdown files.
    #[arg(long, global = true, env = "PDF2MD_OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    /// Root for per-job staging directories.
    #[arg(long, global = true, env = "PDF2MD_STAGING_DIR", default_value = "temp")]
    staging_dir: PathBuf,

    /// `.env` file holding GEMINI_API_KEY.
    #[arg(long, global = true, env = "PDF2MD_ENV_FILE", default_value = ".env")]
    env_file: PathBuf,

    /// Python interpreter used for the local engines.
    #[arg(long, global = true, env = "PDF2MD_PYTHON", default_value = "python3")]
    python: String,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDF2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDF2MD_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert one PDF and save the Markdown artifact.
    Convert(ConvertArgs),

    /// List the backends and whether they can be used.
    Backends {
        /// Also check that each engine's Python package imports.
        #[arg(long)]
        probe: bool,

        /// Print the list as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Save the Gemini API key to the .env file.
    SetKey {
        /// The API key. Replaces any existing key.
        key: String,
    },
}

#[derive(clap::Args, Debug)]
struct ConvertArgs {
    /// PDF file to convert.
    file: PathBuf,

    /// Backend: fast-extract, structure-aware, model-rendered, format-detect,
    /// remote-generative (or pymupdf, docling, marker, markitdown, gemini).
    #[arg(short, long, env = "PDF2MD_BACKEND", default_value = "fast-extract")]
    backend: BackendKind,

    /// Print the job outcome as JSON instead of the Markdown preview.
    #[arg(long)]
    json: bool,

    /// Do not print the Markdown to stdout; only save the artifact.
    #[arg(long)]
    no_preview: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "PDF2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Upper bound on one local engine call, in seconds.
    #[arg(long, env = "PDF2MD_ENGINE_TIMEOUT", default_value_t = 600)]
    engine_timeout: u64,

    /// Gemini model used by the remote backend.
    #[arg(long, env = "PDF2MD_GEMINI_MODEL", default_value = "gemini-2.0-flash")]
    model: String,

    /// Delay between remote file-status checks, in milliseconds.
    #[arg(long, env = "PDF2MD_POLL_INTERVAL_MS", default_value_t = 2000)]
    poll_interval_ms: u64,

    /// Give up waiting for the remote service after this many seconds.
    #[arg(long, env = "PDF2MD_POLL_TIMEOUT", default_value_t = 300)]
    poll_timeout: u64,

    /// Gemini REST base URL.
    #[arg(long, env = "PDF2MD_API_BASE", hide = true)]
    api_base: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner gives the feedback that matters; library INFO logs would
    // only tear through it.
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || matches!(cli.command, Command::Convert(ref a) if !a.no_progress) {
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

    match &cli.command {
        Command::Convert(args) => run_convert(&cli, args).await,
        Command::Backends { probe, json } => run_backends(&cli, *probe, *json).await,
        Command::SetKey { key } => run_set_key(&cli, key),
    }
}

// ── Subcommands ──────────────────────────────────────────────────────────────

async fn run_convert(cli: &Cli, args: &ConvertArgs) -> Result<()> {
    let config = build_config(cli, Some(args))?;
    let credentials =
        CredentialStore::open(&config.env_file).context("Failed to load credentials")?;

    let progress: Option<ProgressCallback> = if !cli.quiet && !args.no_progress && !args.json {
        Some(CliProgressCallback::new() as Arc<dyn JobProgressCallback>)
    } else {
        None
    };

    let mut registry = BackendRegistry::new(config.clone());
    let mut runner = JobRunner::new(&config);
    if let Some(ref cb) = progress {
        registry = registry.with_progress(Arc::clone(cb));
        runner = runner.with_progress(Arc::clone(cb));
    }

    let adapter = registry
        .adapter(args.backend, credentials.current())
        .context("Failed to set up backend")?;
    let upload = Upload::from_path(&args.file)
        .await
        .with_context(|| format!("Failed to read '{}'", args.file.display()))?;

    // Dropping the job future on Ctrl-C drops its staging guard, so the
    // staged copy is still removed.
    let result = tokio::select! {
        r = runner.execute(&upload, adapter.as_ref()) => Some(r),
        _ = tokio::signal::ctrl_c() => None,
    };
    registry.shutdown().await;

    let outcome = match result {
        Some(r) => r.context("Conversion failed")?,
        None => bail!("Interrupted; staging was cleaned up and no output was written"),
    };

    if args.json {
        let json =
            serde_json::to_string_pretty(&outcome).context("Failed to serialise output")?;
        println!("{json}");
        return Ok(());
    }

    if !args.no_preview {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(outcome.markdown.as_bytes())
            .context("Failed to write to stdout")?;
        if !outcome.markdown.ends_with('\n') {
            handle.write_all(b"\n").context("Failed to write to stdout")?;
        }
    }

    if progress.is_none() && !cli.quiet {
        eprintln!(
            "{}  {}  {}ms  →  {}",
            green("✔"),
            outcome.backend,
            outcome.duration_ms,
            bold(&outcome.output_path.display().to_string()),
        );
    }
    Ok(())
}

async fn run_backends(cli: &Cli, probe: bool, json: bool) -> Result<()> {
    let config = build_config(cli, None)?;
    let credentials =
        CredentialStore::open(&config.env_file).context("Failed to load credentials")?;
    let registry = BackendRegistry::new(config);
    let mut statuses = registry.available(credentials.current().as_ref());

    if probe {
        for status in statuses.iter_mut().filter(|s| s.enabled) {
            if let Err(e) = registry.probe(status.kind).await {
                status.enabled = false;
                status.reason = Some(e.to_string());
            }
        }
    }

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&statuses).context("Failed to serialise backends")?
        );
        return Ok(());
    }

    for status in &statuses {
        let mark = if status.enabled { green("✓") } else { red("✗") };
        println!(
            "{mark} {:<18} {:<11} {}",
            status.kind.name(),
            status.kind.label(),
            dim(status.kind.summary()),
        );
        if let Some(reason) = &status.reason {
            println!("    {}", red(reason.lines().last().unwrap_or(reason)));
        }
    }
    Ok(())
}

fn run_set_key(cli: &Cli, key: &str) -> Result<()> {
    let store = CredentialStore::open(&cli.env_file).context("Failed to load credentials")?;
    let saved = store.save(key).context("Failed to save API key")?;
    if !cli.quiet {
        eprintln!(
            "{} API key {} saved to {}",
            green("✔"),
            saved,
            bold(&store.path().display().to_string())
        );
        if std::env::var(pdf2md_hub::credentials::API_KEY_VAR).is_ok() {
            eprintln!(
                "{} GEMINI_API_KEY is also set in the environment and takes precedence",
                cyan("⚠")
            );
        }
    }
    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn build_config(cli: &Cli, convert: Option<&ConvertArgs>) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .output_dir(&cli.output_dir)
        .staging_dir(&cli.staging_dir)
        .env_file(&cli.env_file)
        .python(cli.python.clone());

    if let Some(args) = convert {
        builder = builder
            .engine_timeout_secs(args.engine_timeout)
            .model(args.model.clone())
            .poll_interval_ms(args.poll_interval_ms)
            .poll_timeout_ms(args.poll_timeout.saturating_mul(1000));
        if let Some(ref base) = args.api_base {
            builder = builder.api_base(base.clone());
        }
    }

    builder.build().context("Invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn subcommands_cover_convert_backends_and_set_key() {
        let cmd = Cli::command();
        let names: Vec<_> = cmd.get_subcommands().map(|c| c.get_name()).collect();
        assert_eq!(names, ["convert", "backends", "set-key"]);
    }

    #[test]
    fn backend_accepts_suffix_alias() {
        let cli = Cli::try_parse_from(["pdf2md", "convert", "a.pdf", "--backend", "docling"]).unwrap();
        match cli.command {
            Command::Convert(args) => assert_eq!(args.backend, BackendKind::StructureAware),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
