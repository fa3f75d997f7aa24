//! Configuration types for conversion jobs.
//!
//! All orchestration behaviour is controlled through [`ConversionConfig`],
//! built via its [`ConversionConfigBuilder`]. The config carries paths and
//! engine knobs only; the remote credential is deliberately *not* stored here
//! and is handed to the remote backend when it is built (see
//! [`crate::backend::BackendRegistry`]).

use crate::error::Pdf2MdError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default Gemini REST endpoint.
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// Default generative model.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Configuration for conversion jobs.
///
/// # Example
/// ```rust
/// use pdf2md_hub::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .output_dir("converted")
///     .poll_interval_ms(500)
///     .build()
///     .unwrap();
/// assert_eq!(config.output_dir.to_str(), Some("converted"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Root for per-job staging directories. Default: `temp`.
    pub staging_dir: PathBuf,

    /// Where artifacts are written. Created lazily, never cleaned. Default: `output`.
    pub output_dir: PathBuf,

    /// `.env`-style file holding the remote credential. Default: `.env`.
    pub env_file: PathBuf,

    /// Interpreter for the Python-hosted engines. Default: `python3`.
    pub python: String,

    /// Upper bound on one local engine call, in seconds. Default: 600.
    ///
    /// Marker and Docling load neural models on first use, so the bound is
    /// generous; it exists so a wedged interpreter cannot hold a job forever.
    pub engine_timeout_secs: u64,

    /// Remote generative backend settings.
    pub remote: RemoteSettings,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from("temp"),
            output_dir: PathBuf::from("output"),
            env_file: PathBuf::from(".env"),
            python: "python3".to_string(),
            engine_timeout_secs: 600,
            remote: RemoteSettings::default(),
        }
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }
}

/// Settings for the remote generative backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// REST base URL, without trailing slash.
    pub api_base: String,
    /// Model used for the conversion session.
    pub model: String,
    /// Fixed sampling parameters for the session.
    pub generation: GenerationParams,
    /// File-readiness polling policy.
    pub poll: PollPolicy,
    /// Timeout for each individual HTTP request, in seconds. Default: 120.
    pub request_timeout_secs: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            generation: GenerationParams::default(),
            poll: PollPolicy::default(),
            request_timeout_secs: 120,
        }
    }
}

/// Generation parameters sent with every conversion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub response_mime_type: String,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 8192,
            response_mime_type: "text/plain".to_string(),
        }
    }
}

/// How long and how often to wait for an uploaded file to become `ACTIVE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Delay between status checks, in milliseconds. Default: 2000.
    pub interval_ms: u64,
    /// Total time to wait before giving up, in milliseconds. Default: 300 000.
    pub timeout_ms: u64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            timeout_ms: 300_000,
        }
    }
}

impl PollPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.staging_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.env_file = path.into();
        self
    }

    pub fn python(mut self, interpreter: impl Into<String>) -> Self {
        self.config.python = interpreter.into();
        self
    }

    pub fn engine_timeout_secs(mut self, secs: u64) -> Self {
        self.config.engine_timeout_secs = secs.max(1);
        self
    }

    pub fn api_base(mut self, url: impl Into<String>) -> Self {
        self.config.remote.api_base = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.remote.model = model.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.remote.generation.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_output_tokens(mut self, n: u32) -> Self {
        self.config.remote.generation.max_output_tokens = n.max(1);
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.remote.poll.interval_ms = ms;
        self
    }

    pub fn poll_timeout_ms(mut self, ms: u64) -> Self {
        self.config.remote.poll.timeout_ms = ms;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.remote.request_timeout_secs = secs.max(1);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Pdf2MdError> {
        let c = &self.config;
        if c.staging_dir.as_os_str().is_empty() || c.output_dir.as_os_str().is_empty() {
            return Err(Pdf2MdError::InvalidConfig(
                "staging and output directories must not be empty".into(),
            ));
        }
        if c.staging_dir == c.output_dir {
            return Err(Pdf2MdError::InvalidConfig(format!(
                "staging and output directories must differ (both '{}')",
                c.staging_dir.display()
            )));
        }
        if c.python.trim().is_empty() {
            return Err(Pdf2MdError::InvalidConfig(
                "python interpreter must not be empty".into(),
            ));
        }
        let poll = &c.remote.poll;
        if poll.interval_ms == 0 {
            return Err(Pdf2MdError::InvalidConfig(
                "poll interval must be ≥ 1ms".into(),
            ));
        }
        if poll.timeout_ms < poll.interval_ms {
            return Err(Pdf2MdError::InvalidConfig(format!(
                "poll timeout ({}ms) must be at least the poll interval ({}ms)",
                poll.timeout_ms, poll.interval_ms
            )));
        }
        if c.remote.model.trim().is_empty() {
            return Err(Pdf2MdError::InvalidConfig("model must not be empty".into()));
        }
        Ok(self.config)
    }
}
