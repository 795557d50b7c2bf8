//! Job lifecycle: ingest, the background run, queries and shutdown.

use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use futures::FutureExt;
use tokio::fs;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use montage_media::{move_file, ArtifactStager, ScriptInvocation, ScriptRunner};
use montage_models::{
    validate_archive, validate_audio, FadeDuration, JobId, JobState, JobStatus, StatusRecord,
    SuccessStatus, WebhookPayload,
};
use montage_store::{StatusStore, StoreResult};

use crate::config::WorkerConfig;
use crate::error::{SubmitError, WorkerError, WorkerResult};
use crate::logging::{JobLogger, JobPhase};
use crate::metrics;
use crate::notify::NotificationDispatcher;
use crate::retention::{self, RetentionManager};

const INTERRUPTED: &str = "interrupted: worker restarted before the task finished";

/// Uploaded inputs for a new job.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub archive_name: String,
    pub archive: Bytes,
    pub audio_name: String,
    pub audio: Bytes,
    /// Raw form value; parsed leniently
    pub fade_duration: Option<String>,
}

/// Where a job's montage stands for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactLookup {
    Ready { path: PathBuf, size: u64 },
    NotFound,
    NotReady(JobStatus),
    /// Succeeded, but the file has been or is about to be deleted
    Expired,
}

/// Liveness probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReport {
    pub store: bool,
    pub script_exists: bool,
    pub webhook_configured: bool,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.store && self.script_exists
    }
}

/// Files owned by one job until it reaches a terminal state.
#[derive(Debug, Clone)]
struct JobPaths {
    archive: PathBuf,
    work_dir: PathBuf,
    music: PathBuf,
}

impl JobPaths {
    fn new(temp_dir: &Path, job_id: &JobId) -> Self {
        let work_dir = temp_dir.join(job_id.as_str());
        Self {
            archive: temp_dir.join(format!("{}.zip", job_id)),
            music: work_dir.join("music.mp3"),
            work_dir,
        }
    }
}

type InFlightSet = Arc<Mutex<HashSet<JobId>>>;

fn lock(set: &Mutex<HashSet<JobId>>) -> MutexGuard<'_, HashSet<JobId>> {
    set.lock().unwrap_or_else(|e| e.into_inner())
}

/// Marks a job as running for as long as it lives.
struct InFlightGuard {
    set: InFlightSet,
    job_id: JobId,
}

impl InFlightGuard {
    fn acquire(set: &InFlightSet, job_id: &JobId) -> Option<Self> {
        let mut active = lock(set);
        if !active.insert(job_id.clone()) {
            return None;
        }
        metrics::set_jobs_in_flight(active.len());
        Some(Self {
            set: Arc::clone(set),
            job_id: job_id.clone(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut active = lock(&self.set);
        active.remove(&self.job_id);
        metrics::set_jobs_in_flight(active.len());
    }
}

/// Writes one job's status records in lifecycle order.
///
/// Terminal states only go through [`StatusWriter::finish`], which consumes
/// the writer, so a job gets at most one terminal write.
struct StatusWriter {
    store: Arc<dyn StatusStore>,
    current: StatusRecord,
}

impl StatusWriter {
    fn new(store: Arc<dyn StatusStore>, current: StatusRecord) -> Self {
        Self { store, current }
    }

    fn job_id(&self) -> &JobId {
        &self.current.task_id
    }

    async fn write(&mut self, state: JobState) -> WorkerResult<()> {
        if state.status().is_terminal() {
            return Err(WorkerError::internal(format!(
                "terminal status {} written before the job finished",
                state.status()
            )));
        }
        self.apply(state).await
    }

    async fn finish(mut self, state: JobState) -> WorkerResult<()> {
        if !state.status().is_terminal() {
            return Err(WorkerError::internal(format!(
                "job finished with non-terminal status {}",
                state.status()
            )));
        }
        self.apply(state).await
    }

    async fn apply(&mut self, state: JobState) -> WorkerResult<()> {
        let from = self.current.status();
        let to = state.status();
        if !from.can_transition_to(to) {
            return Err(WorkerError::internal(format!(
                "illegal status transition {} -> {}",
                from, to
            )));
        }
        let record = self.current.next(state);
        self.store.put(&record).await?;
        self.current = record;
        Ok(())
    }
}

struct Inner {
    config: WorkerConfig,
    store: Arc<dyn StatusStore>,
    stager: ArtifactStager,
    runner: ScriptRunner,
    retention: Arc<RetentionManager>,
    notifier: NotificationDispatcher,
    permits: Arc<Semaphore>,
    in_flight: InFlightSet,
    shutdown: watch::Sender<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

/// Drives montage jobs from upload to a terminal status.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

impl JobOrchestrator {
    /// Create an orchestrator over an already connected status store.
    pub fn new(config: WorkerConfig, store: Arc<dyn StatusStore>) -> WorkerResult<Self> {
        let notifier =
            NotificationDispatcher::new(config.webhook_url.clone(), config.webhook_timeout)?;
        let stager = ArtifactStager::new(config.input_extension.clone());
        let runner = ScriptRunner::new(config.script_path.clone(), config.result_file_name.clone())
            .with_timeout(config.script_timeout);
        let retention = Arc::new(RetentionManager::new(
            config.output_dir.clone(),
            config.temp_dir.clone(),
            config.retention,
            config.orphan_age(),
        ));
        let (shutdown, _) = watch::channel(false);

        info!(
            max_concurrent_jobs = config.max_concurrent_jobs,
            script = %config.script_path.display(),
            retention_secs = config.retention.as_secs(),
            "Created job orchestrator"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                permits: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
                config,
                store,
                stager,
                runner,
                retention,
                notifier,
                in_flight: Arc::new(Mutex::new(HashSet::new())),
                shutdown,
                sweeper: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.inner.config
    }

    /// Number of jobs accepted but not yet finished.
    pub fn in_flight(&self) -> usize {
        lock(&self.inner.in_flight).len()
    }

    /// Validate and persist a new job, then start it in the background.
    ///
    /// Returns once the `pending` record is stored. Nothing is left on disk
    /// when this fails.
    pub async fn submit(&self, request: SubmitRequest) -> Result<JobId, SubmitError> {
        validate_archive(&request.archive_name, &request.archive)?;
        validate_audio(&request.audio_name, &request.audio)?;
        let fade = FadeDuration::from_form(request.fade_duration.as_deref())?;

        let job_id = JobId::new();
        let guard = InFlightGuard::acquire(&self.inner.in_flight, &job_id)
            .ok_or_else(|| std::io::Error::other("job id collision"))?;
        let paths = JobPaths::new(&self.inner.config.temp_dir, &job_id);

        if let Err(e) = save_uploads(&paths, &request).await {
            self.inner
                .retention
                .cleanup_now(&[&paths.work_dir, &paths.archive])
                .await;
            return Err(e.into());
        }

        let record = StatusRecord::new(job_id.clone(), JobState::pending("Task created"));
        if let Err(e) = self.inner.store.put(&record).await {
            warn!(job_id = %job_id, "Failed to store new job: {}", e);
            self.inner
                .retention
                .cleanup_now(&[&paths.work_dir, &paths.archive])
                .await;
            return Err(e.into());
        }

        metrics::record_job_submitted();
        info!(
            job_id = %job_id,
            archive_bytes = request.archive.len(),
            fade = fade.seconds(),
            "Accepted job"
        );

        let inner = Arc::clone(&self.inner);
        let span = JobLogger::new(&job_id, JobPhase::Montage).span();
        tokio::spawn(inner.run_job(guard, record, paths, fade).instrument(span));

        Ok(job_id)
    }

    /// Latest status record, or `None` for unknown or expired ids.
    pub async fn get_status(&self, job_id: &JobId) -> StoreResult<Option<StatusRecord>> {
        self.inner.store.get(job_id).await
    }

    /// Locate a finished montage for download.
    pub async fn get_artifact(&self, job_id: &JobId) -> StoreResult<ArtifactLookup> {
        let Some(record) = self.inner.store.get(job_id).await? else {
            return Ok(ArtifactLookup::NotFound);
        };
        let Some(success) = record.success() else {
            return Ok(ArtifactLookup::NotReady(record.status()));
        };
        if success.expires_at <= Utc::now() {
            return Ok(ArtifactLookup::Expired);
        }

        let path = self.inner.config.output_dir.join(&success.output_file);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(ArtifactLookup::Ready {
                path,
                size: meta.len(),
            }),
            _ => Ok(ArtifactLookup::Expired),
        }
    }

    pub async fn health(&self) -> HealthReport {
        HealthReport {
            store: self.inner.store.ping().await.is_ok(),
            script_exists: self.inner.runner.exists().await,
            webhook_configured: self.inner.notifier.is_configured(),
        }
    }

    /// Fail jobs interrupted by a previous shutdown and remove their files.
    ///
    /// Meant to run once at startup. Returns how many status records were
    /// moved to `failed`.
    pub async fn recover_orphans(&self) -> usize {
        let temp_dir = &self.inner.config.temp_dir;
        let mut entries = match fs::read_dir(temp_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %temp_dir.display(), "No leftovers to recover: {}", e);
                return 0;
            }
        };

        let mut leftovers: BTreeMap<JobId, Vec<PathBuf>> = BTreeMap::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let stem = name.strip_suffix(".zip").unwrap_or(&name);
            if let Some(job_id) = JobId::parse(stem) {
                leftovers.entry(job_id).or_default().push(entry.path());
            }
        }

        let mut recovered = 0;
        for (job_id, paths) in leftovers {
            if lock(&self.inner.in_flight).contains(&job_id) {
                continue;
            }
            let logger = JobLogger::new(&job_id, JobPhase::Recovery);

            match self.inner.store.get(&job_id).await {
                Ok(Some(record)) if !record.is_terminal() => {
                    let previous = record.status();
                    let failed = record.next(JobState::failed(INTERRUPTED));
                    match self.inner.store.put(&failed).await {
                        Ok(()) => {
                            recovered += 1;
                            metrics::record_job_failed("interrupted");
                            logger.interrupted(previous);
                        }
                        Err(e) => logger.store_error("marking the job failed", e),
                    }
                }
                Ok(_) => {}
                Err(e) => logger.store_error("reading the status", e),
            }

            self.inner.retention.cleanup_now(&paths[..]).await;
        }

        if recovered > 0 {
            info!(recovered, "Recovered interrupted jobs");
        }
        recovered
    }

    /// Start the periodic retention sweep. Stopped by [`JobOrchestrator::shutdown`].
    pub fn spawn_sweeper(&self) {
        let in_flight = Arc::clone(&self.inner.in_flight);
        let handle = retention::spawn_sweeper(
            Arc::clone(&self.inner.retention),
            self.inner.config.sweep_interval,
            // Names that are not job ids are never touched
            move |name| JobId::parse(name).map_or(true, |id| lock(&in_flight).contains(&id)),
            self.inner.shutdown.subscribe(),
        );

        let previous = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Stop the sweeper and wait up to `grace` for running jobs.
    ///
    /// Jobs still waiting for a permit are failed instead of started.
    /// Returns whether every job finished in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let _ = self.inner.shutdown.send(true);
        self.inner.permits.close();

        let sweeper = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.await;
        }

        info!(in_flight = self.in_flight(), "Waiting for in-flight jobs to complete...");
        let drained = tokio::time::timeout(grace, async {
            while self.in_flight() > 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await
        .is_ok();

        if drained {
            info!("Job orchestrator stopped");
        } else {
            warn!(
                in_flight = self.in_flight(),
                "Shutdown timeout reached with jobs still running"
            );
        }
        drained
    }
}

impl Inner {
    async fn run_job(
        self: Arc<Self>,
        guard: InFlightGuard,
        pending: StatusRecord,
        paths: JobPaths,
        fade: FadeDuration,
    ) {
        let job_id = pending.task_id.clone();
        let logger = JobLogger::new(&job_id, JobPhase::Montage);

        let permit = Arc::clone(&self.permits).acquire_owned().await.ok();
        logger.admitted(fade);

        let mut writer = StatusWriter::new(Arc::clone(&self.store), pending);
        let outcome = match permit {
            Some(_) => {
                AssertUnwindSafe(self.process(&mut writer, &paths, fade, &logger))
                    .catch_unwind()
                    .await
            }
            None => Ok(Err(WorkerError::ShuttingDown)),
        };

        let (terminal, success) = match outcome {
            Ok(Ok(success)) => (JobState::Success(success.clone()), Some(success)),
            Ok(Err(e)) => {
                let reason = failure_reason(&e);
                logger.failed(reason, &e);
                metrics::record_job_failed(reason);
                let state = match e.details() {
                    Some(details) => JobState::failed_with_details(e.to_string(), details),
                    None => JobState::failed(e.to_string()),
                };
                (state, None)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                logger.failed("panic", format!("panicked: {}", message));
                metrics::record_job_failed("panic");
                let details = format!(
                    "panic: {}\n\n{}",
                    message,
                    std::backtrace::Backtrace::force_capture()
                );
                (
                    JobState::failed_with_details(format!("Internal error: {}", message), details),
                    None,
                )
            }
        };

        let written = match writer.finish(terminal).await {
            Ok(()) => true,
            Err(e) => {
                logger.store_error("writing the terminal status", e);
                false
            }
        };

        let report = self
            .retention
            .cleanup_now(&[&paths.work_dir, &paths.archive])
            .await;
        debug!(
            job_id = %job_id,
            removed = report.removed,
            failed = report.failed,
            "Cleaned up working files"
        );
        drop(permit);

        if let Some(success) = success {
            let artifact = self.config.output_dir.join(&success.output_file);
            self.retention
                .schedule_deletion(artifact, self.retention.retention());

            if written {
                metrics::record_job_completed();
                self.notifier
                    .notify(&WebhookPayload::from_success(&job_id, &success))
                    .await;
                logger.finished(success.file_size);
            } else {
                metrics::record_job_failed("store");
            }
        }

        drop(guard);
    }

    async fn process(
        &self,
        writer: &mut StatusWriter,
        paths: &JobPaths,
        fade: FadeDuration,
        logger: &JobLogger,
    ) -> WorkerResult<SuccessStatus> {
        writer
            .write(JobState::processing("Unpacking archive..."))
            .await?;

        let staged = self
            .stager
            .stage(&paths.archive, &paths.music, &paths.work_dir)
            .await?;

        let message = format!("Processing {} video files...", staged.count());
        logger.status(&message);
        writer.write(JobState::processing(message)).await?;

        let output = self
            .runner
            .run(&ScriptInvocation {
                clip_count: staged.count(),
                music: &staged.music,
                fade_duration: fade.seconds(),
                work_dir: &staged.work_dir,
            })
            .await?;
        metrics::record_script_duration(output.elapsed.as_secs_f64());

        let output_file = format!("{}.mp4", writer.job_id());
        let artifact = self.config.output_dir.join(&output_file);
        move_file(&output.result_path, &artifact).await?;
        let file_size = fs::metadata(&artifact).await?.len();

        let retention = chrono::Duration::from_std(self.retention.retention())
            .map_err(|e| WorkerError::internal(format!("retention window out of range: {}", e)))?;
        let completed_at = Utc::now();

        Ok(SuccessStatus {
            message: "Processing complete".to_string(),
            output_file,
            file_size,
            expires_at: completed_at + retention,
            completed_at,
        })
    }
}

async fn save_uploads(paths: &JobPaths, request: &SubmitRequest) -> std::io::Result<()> {
    fs::create_dir_all(&paths.work_dir).await?;
    fs::write(&paths.archive, &request.archive).await?;
    fs::write(&paths.music, &request.audio).await?;
    Ok(())
}

fn failure_reason(err: &WorkerError) -> &'static str {
    match err {
        WorkerError::Media(e) if e.is_input_error() => "input",
        WorkerError::Media(montage_media::MediaError::ScriptTimeout(_)) => "timeout",
        WorkerError::Media(_) => "script",
        WorkerError::Store(_) => "store",
        WorkerError::Io(_) => "io",
        WorkerError::Internal(_) => "internal",
        WorkerError::ShuttingDown => "shutdown",
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
