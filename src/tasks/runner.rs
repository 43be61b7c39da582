//! Task runner - schedules discovery, download and convert work
//!
//! Every submission allocates a registry entry and returns its id right away.
//! The work itself runs on its own tokio task, watched by a supervisor task
//! that always writes a terminal state, even when the work panics.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use super::cancel::{CancelHandle, CancelSignal, cancel_pair};
use super::models::{TaskKind, TaskResult, TaskStatus};
use super::registry::{RegistryError, TaskRegistry};
use crate::classifier;
use crate::config::Config;
use crate::discovery::{
    AuthContext, Candidate, DiscoveryError, MediaDiscoverer, SessionStatus, StatusCallback,
};
use crate::observability::Metrics;
use crate::retrieval::{self, RetrievalError, Retriever};
use crate::transcode::{self, ConvertProfile, TranscodeError, Transcoder};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("This site uses DRM protection. Cannot extract protected content.")]
    DrmProtected(String),

    #[error("input_path must be inside the download or output directory: {0}")]
    InputOutsideRoots(PathBuf),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
}

pub type Result<T> = std::result::Result<T, RunnerError>;

/// Why a unit of work ended in `Failed`; the display text becomes the task message.
#[derive(Debug, Error)]
enum JobError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error("Input file not found: {0}")]
    InputNotFound(PathBuf),

    #[error("HLS downloads need the transcoder, which is disabled")]
    HlsWithoutTranscoder,

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Task aborted")]
    Aborted,
}

struct Finished {
    message: String,
    result: TaskResult,
}

/// Media to download, with the auth context of the session that found it
#[derive(Debug, Clone)]
pub struct MediaSource {
    pub url: String,
    pub auth: Option<Arc<AuthContext>>,
}

impl From<Candidate> for MediaSource {
    fn from(candidate: Candidate) -> Self {
        Self {
            url: candidate.url,
            auth: candidate.auth,
        }
    }
}

#[derive(Clone)]
pub struct TaskRunner {
    config: Arc<Config>,
    registry: Arc<TaskRegistry>,
    discoverer: Arc<dyn MediaDiscoverer>,
    retriever: Arc<Retriever>,
    transcoder: Arc<Transcoder>,
    metrics: Arc<Metrics>,
    cancels: Arc<Mutex<HashMap<String, CancelHandle>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Writes an intermediate checkpoint; a task that already finished keeps its state.
fn checkpoint(registry: &TaskRegistry, id: &str, status: TaskStatus, progress: u8, message: impl Into<String>) {
    if let Err(err) = registry.update(id, status, progress, message) {
        debug!(task_id = id, error = %err, "Checkpoint dropped");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl TaskRunner {
    pub fn new(config: Arc<Config>, discoverer: Arc<dyn MediaDiscoverer>, metrics: Arc<Metrics>) -> Result<Self> {
        let retriever = Retriever::new(&config.retrieval)?;
        let transcoder = Transcoder::new(&config.transcode);

        Ok(Self {
            config,
            registry: Arc::new(TaskRegistry::new()),
            discoverer,
            retriever: Arc::new(retriever),
            transcoder: Arc::new(transcoder),
            metrics,
            cancels: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn retriever(&self) -> &Arc<Retriever> {
        &self.retriever
    }

    pub fn transcoder(&self) -> &Arc<Transcoder> {
        &self.transcoder
    }

    pub fn discoverer_name(&self) -> &'static str {
        self.discoverer.name()
    }

    /// Starts discovery on `page_url`.
    ///
    /// A URL that already points at a media file completes immediately with
    /// itself as the only candidate. Pages on DRM-listed domains are refused.
    pub fn submit_discovery(&self, page_url: &str) -> Result<String> {
        validate_http_url(page_url)?;

        if classifier::is_direct_media_url(page_url) {
            return self.submit_direct(page_url);
        }

        if classifier::is_drm_protected(page_url, &self.config.discovery.drm_domains) {
            warn!(url = page_url, "Refusing DRM-protected site");
            return Err(RunnerError::DrmProtected(page_url.to_string()));
        }

        let registry = Arc::clone(&self.registry);
        let discoverer = Arc::clone(&self.discoverer);
        let metrics = Arc::clone(&self.metrics);
        let url = page_url.to_string();

        Ok(self.launch(TaskKind::Discovery, page_url, move |task_id, cancel| async move {
            run_discovery(&registry, discoverer.as_ref(), &metrics, &task_id, &url, &cancel).await
        }))
    }

    /// Records `url` as a finished discovery with itself as the only candidate.
    pub fn submit_direct(&self, url: &str) -> Result<String> {
        validate_http_url(url)?;

        let id = self.registry.create(TaskKind::Discovery, url);
        self.metrics.task_submitted();
        let extension = classifier::resolve_extension(url, "", &self.config.discovery.default_extension);
        self.registry.complete(
            &id,
            "Direct video URL provided",
            TaskResult::Discovery {
                candidates: vec![Candidate::new(url, "", extension)],
                auth: None,
            },
        )?;
        self.metrics.task_completed();
        info!(task_id = %id, url, "Direct media URL, discovery skipped");
        Ok(id)
    }

    /// Downloads candidate `index` of discovery task `task_id`.
    pub fn submit_candidate_download(&self, task_id: &str, index: usize) -> Result<String> {
        let candidate = self.registry.candidate(task_id, index)?;
        Ok(self.submit_download(candidate.into()))
    }

    /// Downloads `url` without any captured session.
    pub fn submit_url_download(&self, url: &str) -> Result<String> {
        validate_http_url(url)?;
        Ok(self.submit_download(MediaSource {
            url: url.to_string(),
            auth: None,
        }))
    }

    fn submit_download(&self, source: MediaSource) -> String {
        let runner = self.clone();
        let url = source.url.clone();

        self.launch(TaskKind::Download, url, move |task_id, cancel| async move {
            runner.run_download(&task_id, source, &cancel).await
        })
    }

    /// Converts a local file with `profile`.
    ///
    /// Only files under `server.download_dir` or `transcode.output_dir` are
    /// accepted, after resolving symlinks and `..`.
    pub async fn submit_convert(&self, input: &Path, profile: ConvertProfile) -> Result<String> {
        let roots = [
            self.config.server.download_dir.as_path(),
            self.config.transcode.output_dir.as_path(),
        ];
        let input = confine_input(input, &roots).await?;
        let runner = self.clone();
        let label = input.display().to_string();

        Ok(self.launch(TaskKind::Convert, label, move |task_id, cancel| async move {
            runner.run_convert(&task_id, &input, profile, &cancel).await
        }))
    }

    /// Requests cancellation of an active task.
    pub fn cancel(&self, id: &str) -> Result<()> {
        if self.registry.status(id)?.is_terminal() {
            return Err(RegistryError::AlreadyTerminal(id.to_string()).into());
        }
        if let Some(handle) = lock(&self.cancels).get(id) {
            info!(task_id = id, "Cancelling task");
            handle.cancel();
        }
        Ok(())
    }

    /// Periodically drops finished tasks older than the configured TTL.
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let ttl = self.config.registry.terminal_ttl();
        let period = self.config.registry.reap_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                registry.reap_terminal(ttl);
            }
        })
    }

    /// Creates the task entry, runs `work` on its own task and records its
    /// outcome. The entry and its cancel handle appear together, so a task
    /// that can be looked up can also be cancelled.
    fn launch<F, Fut>(&self, kind: TaskKind, source: impl Into<String>, work: F) -> String
    where
        F: FnOnce(String, CancelSignal) -> Fut,
        Fut: Future<Output = std::result::Result<Finished, JobError>> + Send + 'static,
    {
        let (handle, signal) = cancel_pair();
        let id = {
            let mut cancels = lock(&self.cancels);
            let id = self.registry.create(kind, source);
            cancels.insert(id.clone(), handle);
            id
        };
        self.metrics.task_submitted();

        let worker = tokio::spawn(work(id.clone(), signal));
        let runner = self.clone();
        let task_id = id.clone();

        tokio::spawn(async move {
            let outcome = match worker.await {
                Ok(outcome) => outcome,
                Err(err) if err.is_panic() => Err(JobError::Panicked(panic_message(err.into_panic()))),
                Err(_) => Err(JobError::Aborted),
            };
            runner.record(&task_id, outcome);
            lock(&runner.cancels).remove(&task_id);
        });
        id
    }

    fn record(&self, id: &str, outcome: std::result::Result<Finished, JobError>) {
        let written = match outcome {
            Ok(finished) => {
                self.metrics.task_completed();
                self.registry.complete(id, finished.message, finished.result)
            }
            Err(err) => {
                self.metrics.task_failed();
                error!(task_id = id, error = %err, "Task failed");
                self.registry.fail(id, err.to_string())
            }
        };
        if let Err(err) = written {
            warn!(task_id = id, error = %err, "Could not record task outcome");
        }
    }

    async fn run_download(
        &self,
        id: &str,
        source: MediaSource,
        cancel: &CancelSignal,
    ) -> std::result::Result<Finished, JobError> {
        checkpoint(&self.registry, id, TaskStatus::Downloading, 10, "Downloading...");

        let dir = &self.config.server.download_dir;
        // random tail of the id keeps concurrent downloads of one URL apart
        let prefix = id.rsplit('-').next().unwrap_or(id);
        let extension = classifier::resolve_extension(&source.url, "", &self.config.discovery.default_extension);
        let auth = source.auth.as_deref();

        let (path, size_bytes) = if extension == ".m3u8" {
            if !self.transcoder.is_enabled() {
                return Err(JobError::HlsWithoutTranscoder);
            }
            let name = retrieval::file_name_for(&source.url);
            let stem = name.strip_suffix(".m3u8").unwrap_or(&name);
            let path = dir.join(format!("{prefix}_{stem}.mp4"));

            checkpoint(&self.registry, id, TaskStatus::Downloading, 20, "Converting HLS stream to MP4...");
            let args = transcode::hls_args(&source.url, &hls_headers(auth), &path);
            let size = self.transcoder.run(args, &path, cancel).await?;
            (path, size)
        } else {
            let path = dir.join(format!("{prefix}_{}", retrieval::file_name_for(&source.url)));
            let registry = Arc::clone(&self.registry);
            let mut reported = 10u8;

            let size = self
                .retriever
                .download_to_file(&source.url, auth, &path, cancel, |written, total| {
                    let Some(total) = total.filter(|t| *t > 0) else { return };
                    let progress = 10 + (written.saturating_mul(80) / total).min(80) as u8;
                    if progress > reported {
                        reported = progress;
                        checkpoint(&registry, id, TaskStatus::Downloading, progress, format!("Downloading... {progress}%"));
                    }
                })
                .await?;
            (path, size)
        };

        checkpoint(&self.registry, id, TaskStatus::Downloading, 90, "Finalizing download...");
        Ok(Finished {
            message: format!("Download completed - {size_bytes} bytes"),
            result: TaskResult::File { path, size_bytes },
        })
    }

    async fn run_convert(
        &self,
        id: &str,
        input: &Path,
        profile: ConvertProfile,
        cancel: &CancelSignal,
    ) -> std::result::Result<Finished, JobError> {
        let input_size = match tokio::fs::metadata(input).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Err(JobError::InputNotFound(input.to_path_buf())),
        };

        let message = match profile {
            ConvertProfile::Audio => "Converting to MP3...".to_string(),
            ConvertProfile::Compress(q) => format!("Compressing video ({} quality)...", q.as_str()),
        };
        checkpoint(&self.registry, id, TaskStatus::Converting, 60, message);

        let output = profile.output_path(input, &self.config.transcode.output_dir);
        let size_bytes = self
            .transcoder
            .run(profile.args(input, &output), &output, cancel)
            .await?;

        let message = match profile {
            ConvertProfile::Audio => "Audio extraction completed".to_string(),
            ConvertProfile::Compress(_) => {
                let reduction = if input_size > 0 {
                    (1.0 - size_bytes as f64 / input_size as f64) * 100.0
                } else {
                    0.0
                };
                format!("Compression completed - {reduction:.1}% smaller")
            }
        };

        Ok(Finished {
            message,
            result: TaskResult::File {
                path: output,
                size_bytes,
            },
        })
    }
}

async fn run_discovery(
    registry: &Arc<TaskRegistry>,
    discoverer: &dyn MediaDiscoverer,
    metrics: &Metrics,
    id: &str,
    page_url: &str,
    cancel: &CancelSignal,
) -> std::result::Result<Finished, JobError> {
    checkpoint(registry, id, TaskStatus::Loading, 0, "Starting extraction...");

    let progress_registry = Arc::clone(registry);
    let task_id = id.to_string();
    let variant = discoverer.name();
    let on_status: StatusCallback = Arc::new(move |status: SessionStatus| {
        let (task_status, progress, message) = match status {
            SessionStatus::Loading => (TaskStatus::Loading, 10, format!("Loading page ({variant})...")),
            SessionStatus::Extracting => (TaskStatus::Extracting, 20, "Collecting media from page...".to_string()),
            // terminal states are written by the supervisor with the result
            SessionStatus::Pending | SessionStatus::Completed | SessionStatus::Failed => return,
        };
        checkpoint(&progress_registry, &task_id, task_status, progress, message);
    });

    let outcome = discoverer.discover(page_url, cancel, on_status).await?;
    let found = outcome.candidates.len();
    metrics.candidates_found(found);
    checkpoint(registry, id, TaskStatus::Extracting, 60, format!("Found {found} media file(s)"));

    Ok(Finished {
        message: format!("Extraction completed - {found} file(s) found"),
        result: TaskResult::Discovery {
            candidates: outcome.candidates,
            auth: outcome.auth,
        },
    })
}

/// Captured headers plus the cookie header, for the transcoder's own requests
fn hls_headers(auth: Option<&AuthContext>) -> BTreeMap<String, String> {
    let Some(auth) = auth else {
        return BTreeMap::new();
    };
    let mut headers = auth.headers.clone();
    if let Some(cookie) = auth.cookie_header() {
        headers.insert("Cookie".to_string(), cookie);
    }
    headers
}

/// Resolves `input` and requires it to sit under one of `roots`. A missing
/// file is resolved through its parent so the job reports it as not found.
async fn confine_input(input: &Path, roots: &[&Path]) -> Result<PathBuf> {
    let resolved = match tokio::fs::canonicalize(input).await {
        Ok(path) => Some(path),
        Err(_) => match (input.parent(), input.file_name()) {
            (Some(parent), Some(name)) => tokio::fs::canonicalize(parent).await.ok().map(|p| p.join(name)),
            _ => None,
        },
    };

    if let Some(path) = resolved {
        for root in roots {
            match tokio::fs::canonicalize(root).await {
                Ok(root) if path.starts_with(&root) => return Ok(path),
                Ok(_) => {}
                Err(err) => debug!(root = %root.display(), error = %err, "Skipping unresolvable root"),
            }
        }
    }

    warn!(path = %input.display(), "Refusing conversion outside the download directories");
    Err(RunnerError::InputOutsideRoots(input.to_path_buf()))
}

fn validate_http_url(raw: &str) -> Result<()> {
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => Ok(()),
        Ok(url) => Err(RunnerError::InvalidUrl(format!("unsupported scheme: {}", url.scheme()))),
        Err(err) => Err(RunnerError::InvalidUrl(format!("{raw}: {err}"))),
    }
}
