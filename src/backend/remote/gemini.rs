//! [`GenerativeService`] over the Gemini REST API.
//!
//! Three endpoints are used:
//!
//! * `POST /upload/v1beta/files` resumable upload (start, then
//!   `upload, finalize` against the returned session URL)
//! * `GET /v1beta/{name}` for the file's processing state
//! * `POST /v1beta/models/{model}:generateContent` for the conversion
//!
//! The API key travels in the `x-goog-api-key` header, never in the URL, so
//! it cannot leak into logged request lines.

use super::{ConversionRequest, GenerativeService, RemoteFile, RemoteFileState};
use crate::backend::BackendKind;
use crate::config::RemoteSettings;
use crate::credentials::ApiKey;
use crate::error::Pdf2MdError;
use crate::prompts::PDF_MIME;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const KIND: BackendKind = BackendKind::RemoteGenerative;
const API_KEY_HEADER: &str = "x-goog-api-key";
const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";

/// Longest slice of an error body carried into an error message.
const MAX_ERROR_BODY: usize = 400;

/// HTTP client for the Gemini Files and generateContent APIs.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    api_base: String,
}

impl GeminiClient {
    pub fn new(settings: &RemoteSettings) -> Result<Self, Pdf2MdError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| Pdf2MdError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    /// Send a request and return the successful response, or a conversion
    /// error carrying the status and (truncated) body.
    async fn send(
        &self,
        op: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, Pdf2MdError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Pdf2MdError::conversion(KIND, format!("{op} timed out"))
            } else {
                Pdf2MdError::conversion(KIND, format!("{op} request failed: {e}"))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(Pdf2MdError::conversion(
            KIND,
            format!("{op} returned {status}: {}", error_message(&body)),
        ))
    }
}

#[async_trait]
impl GenerativeService for GeminiClient {
    async fn upload(
        &self,
        key: &ApiKey,
        path: &Path,
        display_name: &str,
    ) -> Result<RemoteFile, Pdf2MdError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            Pdf2MdError::conversion(KIND, format!("cannot read '{}': {e}", path.display()))
        })?;
        debug!("uploading {} ({} bytes)", display_name, bytes.len());

        let start = self
            .client
            .post(self.url("upload/v1beta/files"))
            .header(API_KEY_HEADER, key.expose())
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", PDF_MIME)
            .json(&json!({ "file": { "display_name": display_name } }));
        let response = self.send("upload start", start).await?;

        let session_url = response
            .headers()
            .get(UPLOAD_URL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                Pdf2MdError::conversion(KIND, "upload start returned no session URL")
            })?;

        let finish = self
            .client
            .post(session_url)
            .header(API_KEY_HEADER, key.expose())
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes);
        let uploaded: UploadResponse = self
            .send("upload", finish)
            .await?
            .json()
            .await
            .map_err(|e| Pdf2MdError::conversion(KIND, format!("bad upload response: {e}")))?;

        Ok(uploaded.file.into_remote())
    }

    async fn file_state(&self, key: &ApiKey, name: &str) -> Result<RemoteFile, Pdf2MdError> {
        let request = self
            .client
            .get(self.url(&format!("v1beta/{name}")))
            .header(API_KEY_HEADER, key.expose());
        let file: FileResource = self
            .send("file status", request)
            .await?
            .json()
            .await
            .map_err(|e| Pdf2MdError::conversion(KIND, format!("bad file status response: {e}")))?;
        Ok(file.into_remote())
    }

    async fn generate(
        &self,
        key: &ApiKey,
        file: &RemoteFile,
        request: &ConversionRequest,
    ) -> Result<String, Pdf2MdError> {
        let url = self.url(&format!("v1beta/models/{}:generateContent", request.model));
        let call = self
            .client
            .post(url)
            .header(API_KEY_HEADER, key.expose())
            .json(&generate_body(file, request));
        let response: GenerateResponse = self
            .send("generateContent", call)
            .await?
            .json()
            .await
            .map_err(|e| Pdf2MdError::conversion(KIND, format!("bad generateContent response: {e}")))?;
        response_text(response)
    }
}

// ── Wire format ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: FileResource,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResource {
    name: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    state: Option<String>,
}

impl FileResource {
    fn into_remote(self) -> RemoteFile {
        RemoteFile {
            name: self.name,
            uri: self.uri,
            mime_type: if self.mime_type.is_empty() {
                PDF_MIME.to_string()
            } else {
                self.mime_type
            },
            state: RemoteFileState::parse(self.state.as_deref().unwrap_or("STATE_UNSPECIFIED")),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

/// Two user turns: the file with the converter instruction, then the request.
fn generate_body(file: &RemoteFile, request: &ConversionRequest) -> Value {
    json!({
        "contents": [
            {
                "role": "user",
                "parts": [
                    { "fileData": { "mimeType": file.mime_type, "fileUri": file.uri } },
                    { "text": request.instruction }
                ]
            },
            {
                "role": "user",
                "parts": [ { "text": request.prompt } ]
            }
        ],
        "generationConfig": request.generation,
    })
}

/// Concatenate the text parts of the first candidate.
fn response_text(response: GenerateResponse) -> Result<String, Pdf2MdError> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        let reason = response
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .unwrap_or_else(|| "no candidates returned".to_string());
        return Err(Pdf2MdError::conversion(
            KIND,
            format!("the model produced no output ({reason})"),
        ));
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".to_string());
        return Err(Pdf2MdError::conversion(
            KIND,
            format!("the model produced no text (finish reason: {reason})"),
        ));
    }
    Ok(text)
}

/// Prefer the service's `error.message`; fall back to the raw body.
fn error_message(body: &str) -> String {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    if message.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY)
            .rev()
            .find(|&i| message.is_char_boundary(i))
            .unwrap_or(0);
        format!("{}…", &message[..cut])
    } else {
        message
    }
}
