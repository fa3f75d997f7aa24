//! Conversion backends behind one uniform contract.
//!
//! Every engine, local or remote, is wrapped as a [`BackendAdapter`]:
//! `convert(path) -> markdown`. The job pipeline only ever sees
//! `Arc<dyn BackendAdapter>`, so staging, persistence and cleanup are written
//! once instead of once per engine.
//!
//! | Kind | Engine | Artifact suffix |
//! |------|--------|-----------------|
//! | [`BackendKind::FastExtract`] | pymupdf4llm | `pymupdf` |
//! | [`BackendKind::StructureAware`] | Docling | `docling` |
//! | [`BackendKind::ModelRendered`] | Marker (long-lived worker) | `marker` |
//! | [`BackendKind::FormatDetect`] | MarkItDown | `markitdown` |
//! | [`BackendKind::RemoteGenerative`] | Gemini Files API | `gemini` |
//!
//! Adapters never write output files. A conversion either returns the full
//! text or an error; the Job Runner decides what gets persisted.

pub mod fast_extract;
pub mod format_detect;
pub mod model_rendered;
pub mod registry;
pub mod remote;
pub mod script;
pub mod structure_aware;
pub mod worker;

pub use fast_extract::FastExtractBackend;
pub use format_detect::FormatDetectBackend;
pub use model_rendered::ModelRenderedBackend;
pub use registry::BackendRegistry;
pub use remote::{GeminiClient, GenerativeService, RemoteGenerativeBackend};
pub use script::ScriptCommand;
pub use structure_aware::StructureAwareBackend;
pub use worker::ModelWorker;

use crate::error::Pdf2MdError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Identifies one of the five conversion engines.
///
/// Fixed at job creation; determines both the adapter and the artifact name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Fast structural extraction, one call, text returned directly.
    FastExtract,
    /// Layout-aware parsing with markdown export (entity-decoded).
    StructureAware,
    /// Model-based rendering backed by an expensive, reusable model bundle.
    ModelRendered,
    /// Generic multi-format converter that auto-detects PDF.
    FormatDetect,
    /// Remote generative-AI pipeline (upload, poll, generate).
    RemoteGenerative,
}

impl BackendKind {
    /// Every backend, in presentation order.
    pub const ALL: [BackendKind; 5] = [
        BackendKind::FastExtract,
        BackendKind::StructureAware,
        BackendKind::ModelRendered,
        BackendKind::FormatDetect,
        BackendKind::RemoteGenerative,
    ];

    /// Suffix used in the persisted artifact name `{base}_{suffix}.md`.
    pub fn suffix(self) -> &'static str {
        match self {
            BackendKind::FastExtract => "pymupdf",
            BackendKind::StructureAware => "docling",
            BackendKind::ModelRendered => "marker",
            BackendKind::FormatDetect => "markitdown",
            BackendKind::RemoteGenerative => "gemini",
        }
    }

    /// Kebab-case kind name, as accepted by `--backend`.
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::FastExtract => "fast-extract",
            BackendKind::StructureAware => "structure-aware",
            BackendKind::ModelRendered => "model-rendered",
            BackendKind::FormatDetect => "format-detect",
            BackendKind::RemoteGenerative => "remote-generative",
        }
    }

    /// Human-readable engine name.
    pub fn label(self) -> &'static str {
        match self {
            BackendKind::FastExtract => "PyMuPDF",
            BackendKind::StructureAware => "Docling",
            BackendKind::ModelRendered => "Marker",
            BackendKind::FormatDetect => "MarkItDown",
            BackendKind::RemoteGenerative => "Gemini",
        }
    }

    /// What the engine is good at, shown by `pdf2md backends`.
    pub fn summary(self) -> &'static str {
        match self {
            BackendKind::FastExtract => "fast, text-heavy documents with simple formatting",
            BackendKind::StructureAware => "complex structure: tables, lists, academic papers",
            BackendKind::ModelRendered => "special formatting and styled documents",
            BackendKind::FormatDetect => "quick conversion of simple documents",
            BackendKind::RemoteGenerative => "AI-powered conversion of complex layouts (API key)",
        }
    }

    /// `true` for the backend that talks to an external service.
    pub fn is_remote(self) -> bool {
        matches!(self, BackendKind::RemoteGenerative)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for BackendKind {
    type Err = Pdf2MdError;

    /// Accepts the kind name (`fast-extract`) or the engine suffix (`pymupdf`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase().replace('_', "-");
        let kind = match s.as_str() {
            "fast-extract" | "fast" | "pymupdf" => BackendKind::FastExtract,
            "structure-aware" | "structure" | "docling" => BackendKind::StructureAware,
            "model-rendered" | "model" | "marker" => BackendKind::ModelRendered,
            "format-detect" | "format" | "markitdown" => BackendKind::FormatDetect,
            "remote-generative" | "remote" | "gemini" => BackendKind::RemoteGenerative,
            other => {
                return Err(Pdf2MdError::InvalidConfig(format!(
                    "unknown backend '{other}' (expected one of: pymupdf, docling, marker, markitdown, gemini)"
                )))
            }
        };
        Ok(kind)
    }
}

/// A conversion engine wrapped behind the uniform `convert(path) -> text` contract.
///
/// Implementations must be all-or-nothing: on failure they return
/// [`Pdf2MdError`] and leave nothing behind on disk.
#[async_trait]
pub trait BackendAdapter: Send + Sync + fmt::Debug {
    /// Which backend this adapter implements.
    fn kind(&self) -> BackendKind;

    /// Convert the PDF at `input` into Markdown text.
    async fn convert(&self, input: &Path) -> Result<String, Pdf2MdError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffixes_match_artifact_layout() {
        let suffixes: Vec<&str> = BackendKind::ALL.iter().map(|k| k.suffix()).collect();
        assert_eq!(
            suffixes,
            vec!["pymupdf", "docling", "marker", "markitdown", "gemini"]
        );
    }

    #[test]
    fn parse_accepts_kind_and_suffix() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.suffix().parse::<BackendKind>().unwrap(), kind);
        }
        assert_eq!(
            "Structure_Aware".parse::<BackendKind>().unwrap(),
            BackendKind::StructureAware
        );
        assert_eq!(
            "remote-generative".parse::<BackendKind>().unwrap(),
            BackendKind::RemoteGenerative
        );
    }

    #[test]
    fn parse_rejects_unknown() {
        let err = "tesseract".parse::<BackendKind>().unwrap_err();
        assert!(err.to_string().contains("tesseract"));
    }

    #[test]
    fn only_gemini_is_remote() {
        let remote: Vec<_> = BackendKind::ALL.into_iter().filter(|k| k.is_remote()).collect();
        assert_eq!(remote, vec![BackendKind::RemoteGenerative]);
    }

    #[test]
    fn serde_uses_kebab_case() {
        let json = serde_json::to_string(&BackendKind::ModelRendered).unwrap();
        assert_eq!(json, "\"model-rendered\"");
        for kind in BackendKind::ALL {
            assert_eq!(serde_json::to_value(kind).unwrap(), kind.name());
            assert_eq!(kind.name().parse::<BackendKind>().unwrap(), kind);
        }
    }
}
