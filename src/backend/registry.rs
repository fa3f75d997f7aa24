//! Builds adapters from configuration and owns the shared Marker worker.

use crate::backend::{
    BackendAdapter, BackendKind, FastExtractBackend, FormatDetectBackend, ModelRenderedBackend,
    ModelWorker, RemoteGenerativeBackend, ScriptCommand, StructureAwareBackend,
};
use crate::config::ConversionConfig;
use crate::credentials::ApiKey;
use crate::error::Pdf2MdError;
use crate::progress::{NoopProgress, ProgressCallback};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Whether a backend can currently be selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendStatus {
    pub kind: BackendKind,
    pub suffix: &'static str,
    pub enabled: bool,
    /// Why the backend is disabled, when it is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Adapter factory.
///
/// Local adapters are cheap to build; the Model-Rendered worker is created
/// once here and shared by every adapter the registry hands out. The worker
/// process itself starts on the first Marker job and stops on
/// [`BackendRegistry::shutdown`].
pub struct BackendRegistry {
    config: ConversionConfig,
    worker: Arc<ModelWorker>,
    progress: ProgressCallback,
}

impl BackendRegistry {
    pub fn new(config: ConversionConfig) -> Self {
        let worker = Arc::new(ModelWorker::new(
            config.python.clone(),
            config.engine_timeout(),
        ));
        Self::with_worker(config, worker)
    }

    /// Use an externally built worker (tests, or a non-default worker script).
    pub fn with_worker(config: ConversionConfig, worker: Arc<ModelWorker>) -> Self {
        Self {
            config,
            worker,
            progress: Arc::new(NoopProgress),
        }
    }

    /// Progress sink handed to the remote backend.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Build the adapter for `kind`.
    ///
    /// `credential` is only read for [`BackendKind::RemoteGenerative`]; a
    /// `None` there yields an adapter that fails every call with
    /// [`Pdf2MdError::ProviderNotConfigured`].
    pub fn adapter(
        &self,
        kind: BackendKind,
        credential: Option<ApiKey>,
    ) -> Result<Arc<dyn BackendAdapter>, Pdf2MdError> {
        let python = self.config.python.as_str();
        let timeout = self.config.engine_timeout();
        debug!("building {} adapter", kind);

        let adapter: Arc<dyn BackendAdapter> = match kind {
            BackendKind::FastExtract => Arc::new(FastExtractBackend::new(python, timeout)),
            BackendKind::StructureAware => Arc::new(StructureAwareBackend::new(python, timeout)),
            BackendKind::ModelRendered => {
                Arc::new(ModelRenderedBackend::new(Arc::clone(&self.worker)))
            }
            BackendKind::FormatDetect => Arc::new(FormatDetectBackend::new(python, timeout)),
            BackendKind::RemoteGenerative => Arc::new(
                RemoteGenerativeBackend::new(credential, self.config.remote.clone())?
                    .with_progress(Arc::clone(&self.progress)),
            ),
        };
        Ok(adapter)
    }

    /// Selection state of every backend, in presentation order.
    pub fn available(&self, credential: Option<&ApiKey>) -> Vec<BackendStatus> {
        BackendKind::ALL
            .iter()
            .map(|&kind| {
                let reason = (kind.is_remote() && credential.is_none()).then(|| {
                    format!("{} is not set", crate::credentials::API_KEY_VAR)
                });
                BackendStatus {
                    kind,
                    suffix: kind.suffix(),
                    enabled: reason.is_none(),
                    reason,
                }
            })
            .collect()
    }

    /// Check that the Python package behind a local backend can be imported.
    ///
    /// The remote backend has nothing to probe locally and always passes.
    pub async fn probe(&self, kind: BackendKind) -> Result<(), Pdf2MdError> {
        let Some(module) = python_module(kind) else {
            return Ok(());
        };
        ScriptCommand::new(
            self.config.python.clone(),
            format!("import {module}; print('ok')"),
        )
        .with_timeout(Duration::from_secs(60))
        .run(kind, Path::new("probe"))
        .await
        .map(|_| ())
    }

    /// Stop the Marker worker if it was started.
    pub async fn shutdown(&self) {
        self.worker.shutdown().await;
    }
}

fn python_module(kind: BackendKind) -> Option<&'static str> {
    match kind {
        BackendKind::FastExtract => Some("pymupdf4llm"),
        BackendKind::StructureAware => Some("docling"),
        BackendKind::ModelRendered => Some("marker"),
        BackendKind::FormatDetect => Some("markitdown"),
        BackendKind::RemoteGenerative => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapters_report_their_kind() {
        let registry = BackendRegistry::new(ConversionConfig::default());
        for kind in BackendKind::ALL {
            let adapter = registry.adapter(kind, None).unwrap();
            assert_eq!(adapter.kind(), kind);
        }
    }

    #[test]
    fn remote_is_disabled_without_credential() {
        let registry = BackendRegistry::new(ConversionConfig::default());

        let without = registry.available(None);
        assert_eq!(without.len(), 5);
        let remote = without.iter().find(|s| s.kind.is_remote()).unwrap();
        assert!(!remote.enabled);
        assert!(remote.reason.as_deref().unwrap().contains("GEMINI_API_KEY"));
        assert!(without.iter().filter(|s| !s.kind.is_remote()).all(|s| s.enabled));

        let key = ApiKey::new("k").unwrap();
        assert!(registry.available(Some(&key)).iter().all(|s| s.enabled));
    }

    #[test]
    fn status_serialises_without_empty_reason() {
        let registry = BackendRegistry::new(ConversionConfig::default());
        let json = serde_json::to_value(registry.available(None)).unwrap();
        assert_eq!(json[0]["kind"], "fast-extract");
        assert_eq!(json[0]["suffix"], "pymupdf");
        assert!(json[0].get("reason").is_none());
        assert!(json[4]["reason"].is_string());
    }

    #[tokio::test]
    async fn marker_adapters_share_the_registry_worker() {
        let registry = BackendRegistry::new(ConversionConfig::default());
        let a = registry.adapter(BackendKind::ModelRendered, None).unwrap();
        let b = registry.adapter(BackendKind::ModelRendered, None).unwrap();
        assert_eq!(a.kind(), b.kind());
        // Building adapters must not start the worker.
        assert!(!registry.worker.is_running().await);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn probe_reports_missing_interpreter() {
        let config = ConversionConfig::builder()
            .python("definitely-not-python-3b9e")
            .build()
            .unwrap();
        let registry = BackendRegistry::new(config);
        assert!(registry.probe(BackendKind::StructureAware).await.is_err());
        assert!(registry.probe(BackendKind::RemoteGenerative).await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn probe_passes_when_interpreter_succeeds() {
        // `echo` accepts any arguments and prints them.
        let config = ConversionConfig::builder().python("echo").build().unwrap();
        let registry = BackendRegistry::new(config);
        assert!(registry.probe(BackendKind::FastExtract).await.is_ok());
    }
}
