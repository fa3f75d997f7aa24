//! Generic multi-format conversion via MarkItDown.
//!
//! MarkItDown sniffs the input format itself; PDF gets no special tuning.
//! The adapter returns the result's `text_content` field.

use crate::backend::{BackendAdapter, BackendKind, ScriptCommand};
use crate::error::Pdf2MdError;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

const SCRIPT: &str = r#"import sys
from markitdown import MarkItDown
sys.stdout.reconfigure(encoding="utf-8")
sys.stdout.write(MarkItDown().convert(sys.argv[1]).text_content)
"#;

#[derive(Debug, Clone)]
pub struct FormatDetectBackend {
    command: ScriptCommand,
}

impl FormatDetectBackend {
    pub fn new(python: impl Into<String>, timeout: Duration) -> Self {
        Self::with_command(ScriptCommand::new(python, SCRIPT).with_timeout(timeout))
    }

    pub fn with_command(command: ScriptCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl BackendAdapter for FormatDetectBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::FormatDetect
    }

    async fn convert(&self, input: &Path) -> Result<String, Pdf2MdError> {
        self.command.run(self.kind(), input).await
    }
}
