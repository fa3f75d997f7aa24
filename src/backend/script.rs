//! Python bridge: run a short engine script against one input file.
//!
//! pymupdf4llm, Docling and MarkItDown are Python libraries with no stable
//! CLI contract for "print Markdown to stdout". Each adapter therefore carries
//! a tiny inline script and runs it as `<program> -c <script> <input>`,
//! reading the Markdown from stdout.
//!
//! The child is spawned with `kill_on_drop`, so a cancelled job never leaves a
//! stray interpreter behind, and every call is bounded by the configured
//! engine timeout.

use crate::backend::BackendKind;
use crate::error::Pdf2MdError;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// An interpreter plus the inline script it should execute.
#[derive(Debug, Clone)]
pub struct ScriptCommand {
    program: String,
    script: String,
    timeout: Duration,
}

impl ScriptCommand {
    pub fn new(program: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            script: script.into(),
            timeout: Duration::from_secs(600),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run the script with `input` as its single argument and return stdout.
    ///
    /// Failures are attributed to `backend`: a missing interpreter, a
    /// non-zero exit (stderr is carried in the error), a timeout, non-UTF-8
    /// output, or an empty result.
    pub async fn run(&self, backend: BackendKind, input: &Path) -> Result<String, Pdf2MdError> {
        debug!(
            "{}: running {} -c <script> {}",
            backend,
            self.program,
            input.display()
        );

        let child = Command::new(&self.program)
            .arg("-c")
            .arg(&self.script)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Pdf2MdError::conversion(
                    backend,
                    format!("failed to start '{}': {e}. Is it installed?", self.program),
                )
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                Pdf2MdError::conversion(
                    backend,
                    format!("engine did not finish within {}s", self.timeout.as_secs()),
                )
            })?
            .map_err(|e| Pdf2MdError::conversion(backend, format!("engine I/O failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = last_meaningful_line(&stderr).unwrap_or("no diagnostic output");
            warn!("{}: engine exited with {}: {}", backend, output.status, detail);
            return Err(Pdf2MdError::conversion(
                backend,
                format!("engine exited with {}: {}", output.status, detail),
            ));
        }

        let text = String::from_utf8(output.stdout)
            .map_err(|_| Pdf2MdError::conversion(backend, "engine produced non-UTF-8 output"))?;

        if text.trim().is_empty() {
            return Err(Pdf2MdError::conversion(backend, "engine produced no text"));
        }

        debug!("{}: engine returned {} bytes", backend, text.len());
        Ok(text)
    }
}

/// Python tracebacks end with the actual exception; that's the useful line.
fn last_meaningful_line(stderr: &str) -> Option<&str> {
    stderr.lines().map(str::trim).rfind(|l| !l.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traceback_tail_is_reported() {
        let stderr = "Traceback (most recent call last):\n  File \"<string>\", line 1\nModuleNotFoundError: No module named 'docling'\n\n";
        assert_eq!(
            last_meaningful_line(stderr),
            Some("ModuleNotFoundError: No module named 'docling'")
        );
        assert_eq!(last_meaningful_line("  \n"), None);
    }

    #[tokio::test]
    async fn missing_interpreter_is_a_conversion_error() {
        let cmd = ScriptCommand::new("definitely-not-an-interpreter-7c1f", "print(1)");
        let err = cmd
            .run(BackendKind::FormatDetect, Path::new("a.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Pdf2MdError::Conversion {
                backend: BackendKind::FormatDetect,
                ..
            }
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdout_is_returned() {
        // `sh -c script arg` binds the input path to $0.
        let cmd = ScriptCommand::new("sh", "printf '# Title from %s' \"$0\"");
        let text = cmd
            .run(BackendKind::FastExtract, Path::new("doc.pdf"))
            .await
            .unwrap();
        assert_eq!(text, "# Title from doc.pdf");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let cmd = ScriptCommand::new("sh", "echo 'RuntimeError: bad xref' >&2; exit 3");
        let err = cmd
            .run(BackendKind::StructureAware, Path::new("doc.pdf"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bad xref"), "got: {err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn empty_output_is_rejected() {
        let cmd = ScriptCommand::new("sh", "printf '   \\n'");
        let err = cmd
            .run(BackendKind::FormatDetect, Path::new("doc.pdf"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no text"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_engine_times_out() {
        let cmd = ScriptCommand::new("sh", "sleep 5").with_timeout(Duration::from_millis(100));
        let err = cmd
            .run(BackendKind::FastExtract, Path::new("doc.pdf"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not finish"));
    }
}
