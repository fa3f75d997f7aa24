//! Long-lived Marker worker process.
//!
//! Marker's model bundle (`create_model_dict()`) takes tens of seconds and
//! several GB to build. Rebuilding it per job makes every conversion pay that
//! cost, so the bundle lives in one Python process that is started lazily on
//! the first Model-Rendered job and then reused until [`ModelWorker::shutdown`].
//!
//! ## Protocol
//!
//! Newline-delimited JSON over the child's stdin/stdout:
//!
//! ```text
//! worker → {"ready": true}                       (once, after models load)
//! host   → {"id": 1, "path": "temp/…/a.pdf"}
//! worker → {"id": 1, "markdown": "# …"}           or {"id": 1, "error": "…"}
//! ```
//!
//! The worker redirects Python's `sys.stdout` to stderr before importing
//! Marker so library chatter cannot corrupt the protocol channel. Stderr is
//! drained into `tracing` at debug level; its last line is kept for error
//! messages when the worker dies.
//!
//! Requests are serialised through a mutex: one render at a time.

use crate::backend::BackendKind;
use crate::error::Pdf2MdError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const WORKER_SCRIPT: &str = r#"import json, sys
out = sys.stdout
sys.stdout = sys.stderr
from marker.converters.pdf import PdfConverter
from marker.models import create_model_dict
models = create_model_dict()
out.write(json.dumps({"ready": True}) + "\n"); out.flush()
for line in sys.stdin:
    line = line.strip()
    if not line:
        continue
    req = {}
    try:
        req = json.loads(line)
        rendered = PdfConverter(artifact_dict=models)(req["path"])
        reply = {"id": req.get("id"), "markdown": rendered.markdown}
    except Exception as e:
        reply = {"id": req.get("id"), "error": f"{type(e).__name__}: {e}"}
    out.write(json.dumps(reply) + "\n"); out.flush()
"#;

const KIND: BackendKind = BackendKind::ModelRendered;

#[derive(Debug, Serialize)]
struct WorkerRequest<'a> {
    id: u64,
    path: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct WorkerReply {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// A running worker child and its protocol pipes.
#[derive(Debug)]
struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    last_stderr: Arc<StdMutex<Option<String>>>,
}

impl WorkerProcess {
    fn exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    fn last_stderr(&self) -> Option<String> {
        self.last_stderr.lock().ok().and_then(|g| g.clone())
    }

    /// Read replies until one parses; unparseable lines are logged and skipped.
    async fn read_reply(&mut self) -> Result<WorkerReply, String> {
        loop {
            match self.stdout.next_line().await {
                Ok(Some(line)) => match serde_json::from_str::<WorkerReply>(&line) {
                    Ok(reply) => return Ok(reply),
                    Err(_) => debug!("marker worker: ignoring non-protocol line: {line}"),
                },
                Ok(None) => {
                    let tail = self.last_stderr().unwrap_or_else(|| "no diagnostic output".into());
                    return Err(format!("worker exited unexpectedly: {tail}"));
                }
                Err(e) => return Err(format!("failed to read from worker: {e}")),
            }
        }
    }
}

/// Handle to the shared Marker worker. Cheap to share behind `Arc`.
#[derive(Debug)]
pub struct ModelWorker {
    program: String,
    script: String,
    timeout: Duration,
    process: Mutex<Option<WorkerProcess>>,
    next_id: AtomicU64,
}

impl ModelWorker {
    /// Worker running Marker under `python`. Nothing is spawned until first use.
    pub fn new(python: impl Into<String>, timeout: Duration) -> Self {
        Self::with_script(python, WORKER_SCRIPT, timeout)
    }

    /// Worker running a custom script that speaks the same protocol.
    pub fn with_script(program: impl Into<String>, script: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            script: script.into(),
            timeout,
            process: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// `true` while a worker process is alive and holding the model bundle.
    pub async fn is_running(&self) -> bool {
        let mut guard = self.process.lock().await;
        match guard.as_mut() {
            Some(p) => !p.exited(),
            None => false,
        }
    }

    /// Render `input` to Markdown, starting the worker if necessary.
    ///
    /// An engine-side error (bad PDF) leaves the worker running. A broken
    /// worker (crash, EOF, timeout) is discarded so the next job starts a
    /// fresh one.
    pub async fn render(&self, input: &Path) -> Result<String, Pdf2MdError> {
        let mut guard = self.process.lock().await;

        if guard.as_mut().is_some_and(|p| p.exited()) {
            warn!("marker worker has exited; starting a new one");
            *guard = None;
        }
        if guard.is_none() {
            *guard = Some(self.spawn().await?);
        }
        let Some(process) = guard.as_mut() else {
            return Err(Pdf2MdError::Internal("marker worker missing after spawn".into()));
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let path = input.to_string_lossy();
        let mut line = serde_json::to_string(&WorkerRequest { id, path: &path })
            .map_err(|e| Pdf2MdError::Internal(format!("worker request encoding: {e}")))?;
        line.push('\n');

        let exchange = async {
            process
                .stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| format!("failed to send request to worker: {e}"))?;
            process
                .stdin
                .flush()
                .await
                .map_err(|e| format!("failed to send request to worker: {e}"))?;
            loop {
                let reply = process.read_reply().await?;
                match reply.id {
                    Some(got) if got != id => {
                        debug!("marker worker: skipping stale reply {got} (want {id})")
                    }
                    _ => return Ok::<WorkerReply, String>(reply),
                }
            }
        };

        let reply = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(broken)) => {
                *guard = None;
                return Err(Pdf2MdError::conversion(KIND, broken));
            }
            Err(_) => {
                *guard = None;
                return Err(Pdf2MdError::conversion(
                    KIND,
                    format!("worker did not answer within {}s", self.timeout.as_secs()),
                ));
            }
        };

        match (reply.markdown, reply.error) {
            (_, Some(err)) => Err(Pdf2MdError::conversion(KIND, err)),
            (Some(markdown), None) if !markdown.trim().is_empty() => Ok(markdown),
            (Some(_), None) => Err(Pdf2MdError::conversion(KIND, "engine produced no text")),
            (None, None) => Err(Pdf2MdError::conversion(
                KIND,
                "worker reply carried neither markdown nor error",
            )),
        }
    }

    /// Stop the worker and release the model bundle.
    ///
    /// Closing stdin ends the worker's request loop; if it does not exit
    /// within five seconds it is killed.
    pub async fn shutdown(&self) {
        let Some(mut process) = self.process.lock().await.take() else {
            return;
        };
        let _ = process.stdin.shutdown().await;
        let WorkerProcess { mut child, stdin, .. } = process;
        drop(stdin);
        match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
            Ok(Ok(status)) => info!("marker worker stopped ({status})"),
            _ => {
                warn!("marker worker did not stop in time; killing it");
                let _ = child.kill().await;
            }
        }
    }

    async fn spawn(&self) -> Result<WorkerProcess, Pdf2MdError> {
        info!("starting marker worker ({})", self.program);

        let mut child = Command::new(&self.program)
            .arg("-c")
            .arg(&self.script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Pdf2MdError::conversion(
                    KIND,
                    format!("failed to start '{}': {e}. Is it installed?", self.program),
                )
            })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(Pdf2MdError::Internal("worker pipes were not captured".into()));
        };

        let last_stderr = Arc::new(StdMutex::new(None));
        let sink = Arc::clone(&last_stderr);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                debug!(target: "pdf2md_hub::marker", "{line}");
                if let Ok(mut last) = sink.lock() {
                    *last = Some(line);
                }
            }
        });

        let mut process = WorkerProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            last_stderr,
        };

        let ready = tokio::time::timeout(self.timeout, process.read_reply())
            .await
            .map_err(|_| {
                Pdf2MdError::conversion(
                    KIND,
                    format!("worker did not load models within {}s", self.timeout.as_secs()),
                )
            })?
            .map_err(|e| Pdf2MdError::conversion(KIND, e))?;

        if !ready.ready {
            let detail = ready.error.unwrap_or_else(|| "unexpected first reply".into());
            return Err(Pdf2MdError::conversion(KIND, format!("worker failed to start: {detail}")));
        }

        info!("marker worker ready");
        Ok(process)
    }
}
