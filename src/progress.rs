//! Progress-callback trait for job lifecycle events.
//!
//! Inject an [`Arc<dyn JobProgressCallback>`] into
//! [`crate::job::JobRunner::with_progress`] (and the remote backend via
//! [`crate::backend::RemoteGenerativeBackend::with_progress`]) to receive
//! events as a job moves from staging to a persisted artifact.
//!
//! # Example
//!
//! ```rust
//! use pdf2md_hub::{BackendKind, JobProgressCallback};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     finished: AtomicUsize,
//! }
//!
//! impl JobProgressCallback for CountingCallback {
//!     fn on_job_complete(&self, backend: BackendKind, _path: &std::path::Path, len: usize) {
//!         self.finished.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{backend}: {len} bytes");
//!     }
//! }
//! ```

use crate::backend::remote::JobState;
use crate::backend::BackendKind;
use std::path::Path;
use std::sync::Arc;

/// Called by the Job Runner and the remote backend as a job progresses.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait JobProgressCallback: Send + Sync {
    /// A job was accepted for `backend`.
    fn on_job_start(&self, backend: BackendKind, filename: &str) {
        let _ = (backend, filename);
    }

    /// The upload was written to its staging path.
    fn on_staged(&self, path: &Path) {
        let _ = path;
    }

    /// The remote protocol entered `state`; `polls` counts status checks so far.
    fn on_remote_state(&self, state: JobState, polls: u32) {
        let _ = (state, polls);
    }

    /// The artifact was written.
    fn on_job_complete(&self, backend: BackendKind, output_path: &Path, markdown_len: usize) {
        let _ = (backend, output_path, markdown_len);
    }

    /// The job failed; staging has been (or is being) reclaimed.
    fn on_job_error(&self, backend: BackendKind, error: &str) {
        let _ = (backend, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgress;

impl JobProgressCallback for NoopProgress {}

/// Convenience alias for a shared callback.
pub type ProgressCallback = Arc<dyn JobProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        states: Mutex<Vec<(JobState, u32)>>,
        errors: Mutex<Vec<String>>,
    }

    impl JobProgressCallback for Recorder {
        fn on_remote_state(&self, state: JobState, polls: u32) {
            self.states.lock().unwrap().push((state, polls));
        }

        fn on_job_error(&self, _backend: BackendKind, error: &str) {
            self.errors.lock().unwrap().push(error.to_string());
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgress;
        cb.on_job_start(BackendKind::FastExtract, "a.pdf");
        cb.on_staged(Path::new("temp/x/a.pdf"));
        cb.on_remote_state(JobState::Processing, 1);
        cb.on_job_complete(BackendKind::FastExtract, Path::new("output/a_pymupdf.md"), 10);
        cb.on_job_error(BackendKind::RemoteGenerative, "boom");
    }

    #[test]
    fn overridden_methods_receive_events() {
        let rec = Recorder::default();
        rec.on_remote_state(JobState::Uploading, 0);
        rec.on_remote_state(JobState::Active, 3);
        rec.on_job_error(BackendKind::ModelRendered, "worker died");
        rec.on_staged(Path::new("ignored"));

        assert_eq!(
            *rec.states.lock().unwrap(),
            vec![(JobState::Uploading, 0), (JobState::Active, 3)]
        );
        assert_eq!(rec.errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgress);
        cb.on_job_start(BackendKind::RemoteGenerative, "b.pdf");
    }
}
