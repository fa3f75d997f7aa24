//! Model-based rendering via Marker.
//!
//! The adapter is a thin front for a shared [`ModelWorker`]; the registry owns
//! the worker so the model bundle outlives individual jobs.

use crate::backend::{BackendAdapter, BackendKind, ModelWorker};
use crate::error::Pdf2MdError;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ModelRenderedBackend {
    worker: Arc<ModelWorker>,
}

impl ModelRenderedBackend {
    pub fn new(worker: Arc<ModelWorker>) -> Self {
        Self { worker }
    }

    pub fn worker(&self) -> &Arc<ModelWorker> {
        &self.worker
    }
}

#[async_trait]
impl BackendAdapter for ModelRenderedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ModelRendered
    }

    async fn convert(&self, input: &Path) -> Result<String, Pdf2MdError> {
        self.worker.render(input).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn adapters_share_one_worker() {
        let worker = Arc::new(ModelWorker::with_script(
            "sh",
            r##"echo '{"ready": true}'; while read -r l; do echo '{"markdown": "# M"}'; done"##,
            Duration::from_secs(10),
        ));
        let a = ModelRenderedBackend::new(Arc::clone(&worker));
        let b = ModelRenderedBackend::new(Arc::clone(&worker));

        assert_eq!(a.convert(Path::new("1.pdf")).await.unwrap(), "# M");
        assert!(worker.is_running().await);
        assert_eq!(b.convert(Path::new("2.pdf")).await.unwrap(), "# M");
        assert!(Arc::ptr_eq(a.worker(), b.worker()));
        worker.shutdown().await;
    }
}
