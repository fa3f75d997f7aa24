//! Remote-Generative backend: upload, wait for readiness, generate.
//!
//! ## Protocol
//!
//! ```text
//! Uploading ──upload──▶ Processing ──poll…──▶ Active ──generate──▶ Converting ──▶ Done
//!                            │                                        │
//!                            └── other state / timeout ──▶ Failed ◀───┘
//! ```
//!
//! The first status check runs right after the upload returns; later checks
//! are spaced by [`PollPolicy::interval`](crate::config::PollPolicy). The wait
//! is bounded by the policy's timeout, which surfaces as
//! [`Pdf2MdError::RemoteTimeout`] instead of blocking the job forever.
//!
//! The wire protocol sits behind [`GenerativeService`], so the state machine
//! is tested against an in-memory service and [`GeminiClient`] only has to
//! speak HTTP.

pub mod gemini;

pub use gemini::GeminiClient;

use crate::backend::{BackendAdapter, BackendKind};
use crate::config::{GenerationParams, RemoteSettings};
use crate::credentials::ApiKey;
use crate::error::Pdf2MdError;
use crate::progress::{NoopProgress, ProgressCallback};
use crate::prompts::{CONVERTER_INSTRUCTION, CONVERT_REQUEST};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const KIND: BackendKind = BackendKind::RemoteGenerative;

// ── Service-side types ───────────────────────────────────────────────────────

/// Processing state the service reports for an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteFileState {
    Processing,
    Active,
    /// Any other state, kept verbatim for the error message.
    Other(String),
}

impl RemoteFileState {
    pub fn parse(state: &str) -> Self {
        match state {
            "PROCESSING" => RemoteFileState::Processing,
            "ACTIVE" => RemoteFileState::Active,
            other => RemoteFileState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RemoteFileState::Processing => "PROCESSING",
            RemoteFileState::Active => "ACTIVE",
            RemoteFileState::Other(s) => s,
        }
    }
}

/// Handle to a file held by the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Service resource name, e.g. `files/abc123`.
    pub name: String,
    /// URI referenced from generation requests.
    pub uri: String,
    pub mime_type: String,
    pub state: RemoteFileState,
}

/// Everything the generation call needs besides the file itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionRequest {
    pub model: String,
    /// Seed text that accompanies the file in the first user turn.
    pub instruction: String,
    /// Follow-up user turn that asks for the output.
    pub prompt: String,
    pub generation: GenerationParams,
}

/// Progress of one remote job, reported through
/// [`JobProgressCallback::on_remote_state`](crate::JobProgressCallback::on_remote_state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Uploading,
    Processing,
    Active,
    Converting,
    Done,
    Failed,
}

/// The three calls the protocol needs from an external generative service.
#[async_trait]
pub trait GenerativeService: Send + Sync + fmt::Debug {
    /// Upload `path` and return the service's handle for it.
    async fn upload(
        &self,
        key: &ApiKey,
        path: &Path,
        display_name: &str,
    ) -> Result<RemoteFile, Pdf2MdError>;

    /// Fetch the current state of an uploaded file.
    async fn file_state(&self, key: &ApiKey, name: &str) -> Result<RemoteFile, Pdf2MdError>;

    /// Run the conversion request against an `Active` file and return its text.
    async fn generate(
        &self,
        key: &ApiKey,
        file: &RemoteFile,
        request: &ConversionRequest,
    ) -> Result<String, Pdf2MdError>;
}

// ── Backend ──────────────────────────────────────────────────────────────────

/// The Remote-Generative adapter.
///
/// The credential is fixed at construction. Without one, every conversion
/// fails with [`Pdf2MdError::ProviderNotConfigured`] before any network call.
pub struct RemoteGenerativeBackend {
    credential: Option<ApiKey>,
    service: Arc<dyn GenerativeService>,
    settings: RemoteSettings,
    progress: ProgressCallback,
}

impl RemoteGenerativeBackend {
    /// Build the adapter over the Gemini REST API.
    pub fn new(credential: Option<ApiKey>, settings: RemoteSettings) -> Result<Self, Pdf2MdError> {
        let client = GeminiClient::new(&settings)?;
        Ok(Self::with_service(credential, Arc::new(client), settings))
    }

    /// Build the adapter over any [`GenerativeService`].
    pub fn with_service(
        credential: Option<ApiKey>,
        service: Arc<dyn GenerativeService>,
        settings: RemoteSettings,
    ) -> Self {
        Self {
            credential,
            service,
            settings,
            progress: Arc::new(NoopProgress),
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.credential.is_some()
    }

    fn request(&self) -> ConversionRequest {
        ConversionRequest {
            model: self.settings.model.clone(),
            instruction: CONVERTER_INSTRUCTION.to_string(),
            prompt: CONVERT_REQUEST.to_string(),
            generation: self.settings.generation.clone(),
        }
    }

    /// Poll until the file is `Active`. Returns the active handle and the
    /// number of status checks made.
    async fn await_active(
        &self,
        key: &ApiKey,
        uploaded: &RemoteFile,
    ) -> Result<(RemoteFile, u32), Pdf2MdError> {
        let interval = self.settings.poll.interval();
        let timeout = self.settings.poll.timeout();
        let started = Instant::now();
        let mut polls = 0u32;

        loop {
            let current = self.service.file_state(key, &uploaded.name).await?;
            polls += 1;

            match &current.state {
                RemoteFileState::Active => {
                    debug!("{} active after {} status checks", current.name, polls);
                    self.progress.on_remote_state(JobState::Active, polls);
                    return Ok((current, polls));
                }
                RemoteFileState::Processing => {
                    self.progress.on_remote_state(JobState::Processing, polls);
                }
                RemoteFileState::Other(status) => {
                    warn!("{} entered state {}", current.name, status);
                    return Err(Pdf2MdError::RemoteService {
                        status: status.clone(),
                    });
                }
            }

            let waited = started.elapsed();
            if waited + interval > timeout {
                return Err(Pdf2MdError::RemoteTimeout {
                    waited_secs: waited.as_secs(),
                    polls,
                });
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn convert_with(&self, key: &ApiKey, input: &Path) -> Result<String, Pdf2MdError> {
        let display_name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());

        self.progress.on_remote_state(JobState::Uploading, 0);
        let uploaded = self.service.upload(key, input, &display_name).await?;
        info!("uploaded {} as {}", display_name, uploaded.name);

        let (active, polls) = self.await_active(key, &uploaded).await?;

        self.progress.on_remote_state(JobState::Converting, polls);
        let raw = self.service.generate(key, &active, &self.request()).await?;
        if is_blank(&raw) {
            return Err(Pdf2MdError::conversion(
                KIND,
                "the model returned an empty response",
            ));
        }

        self.progress.on_remote_state(JobState::Done, polls);
        Ok(raw)
    }
}

/// True when a response carries nothing but whitespace and zero-width marks.
fn is_blank(text: &str) -> bool {
    text.chars()
        .all(|c| c.is_whitespace() || matches!(c, '\u{200B}' | '\u{FEFF}' | '\u{2060}'))
}

impl fmt::Debug for RemoteGenerativeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteGenerativeBackend")
            .field("credential", &self.credential)
            .field("service", &self.service)
            .field("model", &self.settings.model)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BackendAdapter for RemoteGenerativeBackend {
    fn kind(&self) -> BackendKind {
        KIND
    }

    async fn convert(&self, input: &Path) -> Result<String, Pdf2MdError> {
        let key = self
            .credential
            .as_ref()
            .ok_or_else(|| Pdf2MdError::ProviderNotConfigured {
                provider: KIND.label().to_string(),
                hint: format!(
                    "Set {} in the .env file or run `pdf2md set-key <KEY>`.",
                    crate::credentials::API_KEY_VAR
                ),
            })?;

        let result = self.convert_with(key, input).await;
        if result.is_err() {
            self.progress.on_remote_state(JobState::Failed, 0);
        }
        result
    }
}
