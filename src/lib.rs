//! # pdf2md-hub
//!
//! Convert PDF documents to Markdown through five interchangeable backends.
//!
//! ## Why this crate?
//!
//! No single PDF converter wins on every document. A fast text extractor is
//! fine for born-digital reports, a layout model does better on multi-column
//! papers, and a generative model can read scans. This crate puts all of them
//! behind one contract, `convert(path) -> markdown`, and runs every job
//! through the same stage → run → persist → cleanup pipeline.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Upload (bytes + filename)
//!  │
//!  ├─ 1. Stage    temp/<job-uuid>/<filename>, %PDF header checked
//!  ├─ 2. Run      BackendAdapter::convert (one of five engines)
//!  ├─ 3. Persist  output/{base}_{suffix}.md, atomic replace
//!  └─ 4. Cleanup  staging removed on every exit path (RAII guard)
//! ```
//!
//! | Backend | Engine | Suffix |
//! |---------|--------|--------|
//! | `fast-extract` | pymupdf4llm | `pymupdf` |
//! | `structure-aware` | Docling | `docling` |
//! | `model-rendered` | Marker (long-lived worker) | `marker` |
//! | `format-detect` | MarkItDown | `markitdown` |
//! | `remote-generative` | Gemini Files API | `gemini` |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2md_hub::{BackendKind, BackendRegistry, ConversionConfig, CredentialStore, JobRunner, Upload};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::default();
//!     let credentials = CredentialStore::open(&config.env_file)?;
//!     let registry = BackendRegistry::new(config.clone());
//!
//!     let adapter = registry.adapter(BackendKind::StructureAware, credentials.current())?;
//!     let upload = Upload::from_path("paper.pdf").await?;
//!     let outcome = JobRunner::new(&config).execute(&upload, adapter.as_ref()).await?;
//!
//!     println!("{}", outcome.markdown);
//!     eprintln!("saved to {}", outcome.output_path.display());
//!     registry.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2md` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! //!
//! Disable `cli` when using only the library:
//! ```toml
//! pdf2md-hub = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod credentials;
pub mod error;
pub mod job;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::registry::BackendStatus;
pub use backend::remote::{ConversionRequest, JobState, RemoteFile, RemoteFileState};
pub use backend::{BackendAdapter, BackendKind, BackendRegistry, GenerativeService};
pub use config::{ConversionConfig, ConversionConfigBuilder, GenerationParams, PollPolicy, RemoteSettings};
pub use credentials::{ApiKey, CredentialStore};
pub use error::Pdf2MdError;
pub use job::{output_filename, JobOutcome, JobRunner, StagedFile, Upload};
pub use progress::{JobProgressCallback, NoopProgress, ProgressCallback};
