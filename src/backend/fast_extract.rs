//! Fast structural extraction via pymupdf4llm.
//!
//! One call, text returned directly; no post-processing.

use crate::backend::{BackendAdapter, BackendKind, ScriptCommand};
use crate::error::Pdf2MdError;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

const SCRIPT: &str = r#"import sys
import pymupdf4llm
sys.stdout.reconfigure(encoding="utf-8")
sys.stdout.write(pymupdf4llm.to_markdown(sys.argv[1]))
"#;

#[derive(Debug, Clone)]
pub struct FastExtractBackend {
    command: ScriptCommand,
}

impl FastExtractBackend {
    pub fn new(python: impl Into<String>, timeout: Duration) -> Self {
        Self::with_command(ScriptCommand::new(python, SCRIPT).with_timeout(timeout))
    }

    /// Use a custom command, e.g. a different interpreter or a stand-in engine.
    pub fn with_command(command: ScriptCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl BackendAdapter for FastExtractBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::FastExtract
    }

    async fn convert(&self, input: &Path) -> Result<String, Pdf2MdError> {
        self.command.run(self.kind(), input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_reads_first_argument() {
        assert!(SCRIPT.contains("to_markdown(sys.argv[1])"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn returns_engine_text_verbatim() {
        let backend =
            FastExtractBackend::with_command(ScriptCommand::new("sh", "printf 'A &amp; B'"));
        let text = backend.convert(Path::new("x.pdf")).await.unwrap();
        assert_eq!(text, "A &amp; B");
    }
}
