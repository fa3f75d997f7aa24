//! Error types for the pdf2md-hub library.
//!
//! Every failure a conversion job can hit is a variant of [`Pdf2MdError`].
//! The job boundary ([`crate::job::JobRunner::execute`]) returns it to the
//! caller unchanged; nothing in the library retries, and nothing panics on
//! a bad input, so one failed job never poisons the next.
//!
//! The variants follow the lifecycle of a job:
//!
//! * staging: [`Pdf2MdError::Staging`], [`Pdf2MdError::InvalidUpload`]
//! * conversion: [`Pdf2MdError::Conversion`], [`Pdf2MdError::RemoteService`],
//!   [`Pdf2MdError::RemoteTimeout`], [`Pdf2MdError::ProviderNotConfigured`]
//! * persistence: [`Pdf2MdError::Persist`]
//! * credentials and configuration: [`Pdf2MdError::Credential`],
//!   [`Pdf2MdError::InvalidConfig`]

use crate::backend::BackendKind;
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the pdf2md-hub library.
#[derive(Debug, Error)]
pub enum Pdf2MdError {
    // ── Staging errors ────────────────────────────────────────────────────
    /// The uploaded bytes could not be written to (or read from) staging.
    #[error("Failed to stage upload at '{path}': {source}\nCheck that the staging directory is writable.")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The upload was rejected before conversion started.
    #[error("Invalid upload '{filename}': {reason}")]
    InvalidUpload { filename: String, reason: String },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// The selected backend failed (malformed PDF, missing engine or model,
    /// unexpected output shape, network failure).
    #[error("{backend} conversion failed: {cause}")]
    Conversion { backend: BackendKind, cause: String },

    /// The remote service reported a file state that is neither
    /// `PROCESSING` nor `ACTIVE`.
    #[error("Remote file processing failed: {status}")]
    RemoteService { status: String },

    /// The uploaded file never became `ACTIVE` within the polling budget.
    #[error("Remote file was still processing after {waited_secs}s ({polls} status checks)\nIncrease --poll-timeout for large documents.")]
    RemoteTimeout { waited_secs: u64, polls: u32 },

    /// The backend needs a credential that is not configured.
    #[error("Backend '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Persistence errors ────────────────────────────────────────────────
    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Credential / config errors ────────────────────────────────────────
    /// The credential file could not be read or rewritten.
    #[error("Credential file '{path}' could not be accessed: {source}")]
    Credential {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Pdf2MdError {
    /// Shorthand for a [`Pdf2MdError::Conversion`] from any displayable cause.
    pub fn conversion(backend: BackendKind, cause: impl std::fmt::Display) -> Self {
        Pdf2MdError::Conversion {
            backend,
            cause: cause.to_string(),
        }
    }

    /// The backend this error is attributed to, if any.
    pub fn backend(&self) -> Option<BackendKind> {
        match self {
            Pdf2MdError::Conversion { backend, .. } => Some(*backend),
            Pdf2MdError::RemoteService { .. }
            | Pdf2MdError::RemoteTimeout { .. }
            | Pdf2MdError::ProviderNotConfigured { .. } => Some(BackendKind::RemoteGenerative),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_display_names_backend() {
        let e = Pdf2MdError::conversion(BackendKind::StructureAware, "no module named docling");
        let msg = e.to_string();
        assert!(msg.contains("Docling"), "got: {msg}");
        assert!(msg.contains("no module named docling"));
    }

    #[test]
    fn remote_service_display_embeds_status() {
        let e = Pdf2MdError::RemoteService {
            status: "FAILED_PRECONDITION".into(),
        };
        assert!(e.to_string().contains("FAILED_PRECONDITION"));
    }

    #[test]
    fn remote_timeout_display() {
        let e = Pdf2MdError::RemoteTimeout {
            waited_secs: 300,
            polls: 151,
        };
        assert!(e.to_string().contains("300s"));
        assert!(e.to_string().contains("151"));
    }

    #[test]
    fn remote_errors_attribute_to_gemini() {
        let e = Pdf2MdError::RemoteService {
            status: "FAILED".into(),
        };
        assert_eq!(e.backend(), Some(BackendKind::RemoteGenerative));
        assert_eq!(Pdf2MdError::InvalidConfig("x".into()).backend(), None);
    }

    #[test]
    fn persist_keeps_io_source() {
        use std::error::Error as _;
        let e = Pdf2MdError::Persist {
            path: PathBuf::from("output/a_docling.md"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(e.source().is_some());
        assert!(e.to_string().contains("a_docling.md"));
    }
}
