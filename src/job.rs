//! Job Runner: stage → run → persist → cleanup.
//!
//! One generic pipeline serves every backend; the adapter is the only
//! per-backend piece. A job owns its upload for its whole duration and shares
//! nothing with other jobs except the output directory.
//!
//! ## Staging
//!
//! Each job stages into its own `staging_dir/<uuid>/` directory, so two jobs
//! with the same upload name never overwrite each other's input. The staged
//! file is held by a [`StagedFile`] guard that removes the directory when it
//! is dropped. That covers success, a failed conversion, a panic in an
//! adapter, and a cancelled job future alike.
//!
//! ## Output
//!
//! Artifacts go to `output_dir/{base}_{suffix}.md` and are written through a
//! temporary file plus rename, so a reader never sees a half-written
//! artifact and a repeated job replaces the previous one in place.

use crate::backend::{BackendAdapter, BackendKind};
use crate::config::ConversionConfig;
use crate::error::Pdf2MdError;
use crate::progress::{NoopProgress, ProgressCallback};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// How far into an upload the `%PDF-` header may appear.
const HEADER_SEARCH_WINDOW: usize = 1024;

// ── Upload ───────────────────────────────────────────────────────────────────

/// Raw bytes plus the name the user gave them.
#[derive(Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a local file as an upload named after its final path component.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, Pdf2MdError> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Pdf2MdError::InvalidUpload {
                filename: path.display().to_string(),
                reason: "path has no file name".to_string(),
            })?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| Pdf2MdError::Staging {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self { filename, bytes })
    }
}

impl std::fmt::Debug for Upload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upload")
            .field("filename", &self.filename)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

// ── Staged file guard ────────────────────────────────────────────────────────

/// A staged input. Dropping it removes the per-job staging directory.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    dir: PathBuf,
    original_filename: String,
    removed: bool,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sanitised name of the upload, used to derive the artifact name.
    pub fn original_filename(&self) -> &str {
        &self.original_filename
    }

    /// Remove the staged file and its job directory now.
    ///
    /// An already-missing directory counts as success.
    pub fn cleanup(mut self) -> Result<(), Pdf2MdError> {
        self.removed = true;
        remove_job_dir(&self.dir).map_err(|source| Pdf2MdError::Staging {
            path: self.dir.clone(),
            source,
        })
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match remove_job_dir(&self.dir) {
            Ok(()) => debug!("staging {} reclaimed on drop", self.dir.display()),
            Err(e) => warn!("could not remove staging {}: {}", self.dir.display(), e),
        }
    }
}

fn remove_job_dir(dir: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(dir) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

// ── Outcome ──────────────────────────────────────────────────────────────────

/// Result of one successful job.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub backend: BackendKind,
    pub markdown: String,
    pub output_path: PathBuf,
    pub output_filename: String,
    pub duration_ms: u64,
}

/// `{originalBaseName}_{suffix}.md`, where the base name drops the final
/// extension only (`a.b.pdf` → `a.b`).
pub fn output_filename(original: &str, kind: BackendKind) -> String {
    let base = Path::new(original)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| original.to_string());
    format!("{}_{}.md", base, kind.suffix())
}

// ── Runner ───────────────────────────────────────────────────────────────────

/// Drives conversion jobs. Holds no per-job state.
pub struct JobRunner {
    staging_dir: PathBuf,
    output_dir: PathBuf,
    progress: ProgressCallback,
}

impl JobRunner {
    pub fn new(config: &ConversionConfig) -> Self {
        Self {
            staging_dir: config.staging_dir.clone(),
            output_dir: config.output_dir.clone(),
            progress: Arc::new(NoopProgress),
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write the upload to a fresh per-job staging directory.
    pub async fn stage(&self, upload: &Upload) -> Result<StagedFile, Pdf2MdError> {
        let filename = sanitise_filename(&upload.filename)?;
        validate_pdf(&filename, &upload.bytes)?;

        let dir = self.staging_dir.join(uuid::Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| Pdf2MdError::Staging {
                path: dir.clone(),
                source,
            })?;

        // From here on the guard owns the directory, so a failed write
        // still leaves nothing behind.
        let staged = StagedFile {
            path: dir.join(&filename),
            dir,
            original_filename: filename,
            removed: false,
        };
        tokio::fs::write(&staged.path, &upload.bytes)
            .await
            .map_err(|source| Pdf2MdError::Staging {
                path: staged.path.clone(),
                source,
            })?;

        debug!("staged {} bytes at {}", upload.bytes.len(), staged.path.display());
        self.progress.on_staged(&staged.path);
        Ok(staged)
    }

    /// Hand the staged file to the adapter. Errors are returned as-is.
    pub async fn run(
        &self,
        staged: &StagedFile,
        adapter: &dyn BackendAdapter,
    ) -> Result<String, Pdf2MdError> {
        let text = adapter.convert(staged.path()).await?;
        debug!("{} produced {} bytes", adapter.kind(), text.len());
        Ok(text)
    }

    /// Write `text` to `output_dir/output_filename`, replacing any previous
    /// artifact of that name.
    pub async fn persist(&self, text: &str, output_filename: &str) -> Result<PathBuf, Pdf2MdError> {
        let path = self.output_dir.join(output_filename);
        let persist_err = |source| Pdf2MdError::Persist {
            path: path.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(persist_err)?;

        // Unique temp name so concurrent jobs writing the same artifact
        // never share a temp file.
        let tmp_path = self
            .output_dir
            .join(format!(".{}.{}.tmp", output_filename, uuid::Uuid::new_v4().simple()));
        if let Err(e) = tokio::fs::write(&tmp_path, text).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(persist_err(e));
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(persist_err(e));
        }

        Ok(path)
    }

    /// Remove a staged file now instead of waiting for the guard to drop.
    pub fn cleanup(&self, staged: StagedFile) -> Result<(), Pdf2MdError> {
        staged.cleanup()
    }

    /// Run one complete job.
    ///
    /// Staging is reclaimed on every exit path; a failed job leaves no
    /// artifact behind.
    pub async fn execute(
        &self,
        upload: &Upload,
        adapter: &dyn BackendAdapter,
    ) -> Result<JobOutcome, Pdf2MdError> {
        let backend = adapter.kind();
        self.progress.on_job_start(backend, &upload.filename);

        match self.execute_inner(upload, adapter).await {
            Ok(outcome) => {
                info!(
                    "{}: wrote {} ({} bytes, {} ms)",
                    backend,
                    outcome.output_path.display(),
                    outcome.markdown.len(),
                    outcome.duration_ms
                );
                self.progress
                    .on_job_complete(backend, &outcome.output_path, outcome.markdown.len());
                Ok(outcome)
            }
            Err(e) => {
                warn!("{}: job for '{}' failed: {}", backend, upload.filename, e);
                self.progress.on_job_error(backend, &e.to_string());
                Err(e)
            }
        }
    }

    async fn execute_inner(
        &self,
        upload: &Upload,
        adapter: &dyn BackendAdapter,
    ) -> Result<JobOutcome, Pdf2MdError> {
        let started = Instant::now();
        let backend = adapter.kind();

        let staged = self.stage(upload).await?;
        let result = async {
            let markdown = self.run(&staged, adapter).await?;
            let filename = output_filename(staged.original_filename(), backend);
            let path = self.persist(&markdown, &filename).await?;
            Ok::<_, Pdf2MdError>((markdown, filename, path))
        }
        .await;

        if let Err(e) = self.cleanup(staged) {
            warn!("{}", e);
        }

        let (markdown, output_filename, output_path) = result?;
        Ok(JobOutcome {
            backend,
            markdown,
            output_path,
            output_filename,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Reduce an upload name to its final path component.
///
/// Both separators are honoured because browsers on Windows may send the
/// full client path.
fn sanitise_filename(filename: &str) -> Result<String, Pdf2MdError> {
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if name.is_empty() || name == "." || name == ".." || name.contains('\0') {
        return Err(Pdf2MdError::InvalidUpload {
            filename: filename.to_string(),
            reason: "not a usable file name".to_string(),
        });
    }
    Ok(name.to_string())
}

fn validate_pdf(filename: &str, bytes: &[u8]) -> Result<(), Pdf2MdError> {
    if bytes.is_empty() {
        return Err(Pdf2MdError::InvalidUpload {
            filename: filename.to_string(),
            reason: "file is empty".to_string(),
        });
    }
    let head = &bytes[..bytes.len().min(HEADER_SEARCH_WINDOW)];
    if !head.windows(5).any(|w| w == b"%PDF-") {
        return Err(Pdf2MdError::InvalidUpload {
            filename: filename.to_string(),
            reason: "missing %PDF header; only PDF files are supported".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    const PDF: &[u8] = b"%PDF-1.4\n1 0 obj\n<<>>\nendobj\n%%EOF\n";

    #[derive(Debug)]
    struct Echo(BackendKind);

    #[async_trait]
    impl BackendAdapter for Echo {
        fn kind(&self) -> BackendKind {
            self.0
        }

        async fn convert(&self, input: &Path) -> Result<String, Pdf2MdError> {
            assert!(input.exists(), "adapter must see the staged file");
            Ok(format!("# {}\n", input.file_name().unwrap().to_string_lossy()))
        }
    }

    #[derive(Debug)]
    struct Failing;

    #[async_trait]
    impl BackendAdapter for Failing {
        fn kind(&self) -> BackendKind {
            BackendKind::StructureAware
        }

        async fn convert(&self, _input: &Path) -> Result<String, Pdf2MdError> {
            Err(Pdf2MdError::conversion(self.kind(), "malformed xref table"))
        }
    }

    fn runner(dir: &TempDir) -> JobRunner {
        let config = ConversionConfig::builder()
            .staging_dir(dir.path().join("temp"))
            .output_dir(dir.path().join("output"))
            .build()
            .unwrap();
        JobRunner::new(&config)
    }

    fn staging_entries(runner: &JobRunner) -> usize {
        std::fs::read_dir(runner.staging_dir())
            .map(|d| d.count())
            .unwrap_or(0)
    }

    #[test]
    fn output_name_drops_only_last_extension() {
        assert_eq!(output_filename("report.pdf", BackendKind::FastExtract), "report_pymupdf.md");
        assert_eq!(output_filename("a.b.pdf", BackendKind::ModelRendered), "a.b_marker.md");
        assert_eq!(output_filename("noext", BackendKind::RemoteGenerative), "noext_gemini.md");
    }

    #[test]
    fn filenames_are_reduced_to_last_component() {
        assert_eq!(sanitise_filename("../../etc/x.pdf").unwrap(), "x.pdf");
        assert_eq!(sanitise_filename("C:\\Users\\me\\doc.pdf").unwrap(), "doc.pdf");
        assert!(sanitise_filename("dir/").is_err());
        assert!(sanitise_filename("..").is_err());
    }

    #[test]
    fn pdf_header_is_required() {
        assert!(validate_pdf("a.pdf", PDF).is_ok());
        assert!(validate_pdf("a.pdf", b"\n\n%PDF-1.7").is_ok());
        assert!(matches!(
            validate_pdf("a.pdf", b"PK\x03\x04 zip"),
            Err(Pdf2MdError::InvalidUpload { .. })
        ));
        assert!(validate_pdf("a.pdf", b"").is_err());
    }

    #[tokio::test]
    async fn stage_writes_bytes_verbatim_in_unique_dirs() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir);
        let upload = Upload::new("doc.pdf", PDF);

        let a = runner.stage(&upload).await.unwrap();
        let b = runner.stage(&upload).await.unwrap();
        assert_ne!(a.path(), b.path());
        assert_eq!(std::fs::read(a.path()).unwrap(), PDF);
        assert_eq!(a.path().file_name().unwrap(), "doc.pdf");

        runner.cleanup(a).unwrap();
        assert_eq!(staging_entries(&runner), 1);
        drop(b);
        assert_eq!(staging_entries(&runner), 0);
    }

    #[tokio::test]
    async fn execute_persists_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir);
        let outcome = runner
            .execute(&Upload::new("paper.pdf", PDF), &Echo(BackendKind::FormatDetect))
            .await
            .unwrap();

        assert_eq!(outcome.output_filename, "paper_markitdown.md");
        assert_eq!(outcome.output_path, dir.path().join("output/paper_markitdown.md"));
        assert_eq!(std::fs::read_to_string(&outcome.output_path).unwrap(), "# paper.pdf\n");
        assert_eq!(staging_entries(&runner), 0);
    }

    #[tokio::test]
    async fn failed_job_leaves_no_artifact_or_staging() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir);

        let err = runner
            .execute(&Upload::new("bad.pdf", PDF), &Failing)
            .await
            .unwrap_err();

        assert!(matches!(err, Pdf2MdError::Conversion { .. }));
        assert!(!dir.path().join("output/bad_docling.md").exists());
        assert_eq!(staging_entries(&runner), 0);
    }

    #[tokio::test]
    async fn rejected_upload_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir);
        let err = runner
            .execute(&Upload::new("notes.txt", b"hello".to_vec()), &Echo(BackendKind::FastExtract))
            .await
            .unwrap_err();
        assert!(matches!(err, Pdf2MdError::InvalidUpload { .. }));
        assert!(!runner.staging_dir().exists());
        assert!(!runner.output_dir().exists());
    }

    #[tokio::test]
    async fn persist_overwrites_and_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir);

        let first = runner.persist("one", "x_pymupdf.md").await.unwrap();
        let second = runner.persist("two", "x_pymupdf.md").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "two");
        assert_eq!(std::fs::read_dir(runner.output_dir()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn persist_reports_unwritable_output() {
        let dir = TempDir::new().unwrap();
        // A regular file where the output directory should be.
        let blocker = dir.path().join("output");
        std::fs::write(&blocker, "not a dir").unwrap();
        let runner = runner(&dir);

        let err = runner.persist("text", "a_gemini.md").await.unwrap_err();
        assert!(matches!(err, Pdf2MdError::Persist { .. }));
    }

    #[tokio::test]
    async fn upload_from_path_uses_file_name() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scan.pdf");
        std::fs::write(&path, PDF).unwrap();

        let upload = Upload::from_path(&path).await.unwrap();
        assert_eq!(upload.filename, "scan.pdf");
        assert_eq!(upload.bytes, PDF);

        let missing = Upload::from_path(dir.path().join("nope.pdf")).await;
        assert!(matches!(missing, Err(Pdf2MdError::Staging { .. })));
    }
}
