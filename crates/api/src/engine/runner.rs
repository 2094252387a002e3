use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use faceswap_comfyui::api::ComfyUIApi;
use faceswap_comfyui::client::StreamConnector;
use faceswap_comfyui::fetch::{FetchError, ResultFetcher};
use faceswap_comfyui::monitor::{MonitorError, MonitoredJob, ProgressMonitor};
use faceswap_comfyui::submit::{InputFile, JobSubmitter, SubmitError, SubmittedJob};
use faceswap_core::events::JobEvent;
use faceswap_core::ledger::StatusLedger;
use faceswap_core::naming::validate_file_name;
use faceswap_core::outputs::reconcile_history;
use faceswap_core::error::CoreError;
use faceswap_core::status::{JobStatus, StatusRecord, StatusUpdate};
use faceswap_core::workflow::WorkflowTemplate;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::engine::registry::JobRegistry;
use crate::engine::stream::JobEventStream;

/// Progress step recorded when a job is accepted.
pub const QUEUED_STEP: &str = "Workflow queued, ready to start";

const COMPLETED_STEP: &str = "Face swap completed successfully";

/// Events buffered per job before the monitor waits on the consumer.
const EVENT_BUFFER: usize = 64;

/// Runs submitted jobs end to end: monitor, fetch, final status.
#[derive(Clone)]
pub struct JobEngine {
    submitter: Arc<JobSubmitter>,
    monitor: Arc<ProgressMonitor>,
    fetcher: Arc<ResultFetcher>,
    api: Arc<ComfyUIApi>,
    ledger: Arc<StatusLedger>,
    registry: Arc<JobRegistry>,
}

impl JobEngine {
    pub fn from_config(
        config: &ServerConfig,
        api: Arc<ComfyUIApi>,
        connector: Arc<dyn StreamConnector>,
        ledger: Arc<StatusLedger>,
    ) -> Self {
        let submitter = JobSubmitter::new(
            Arc::clone(&api),
            config.workflow_template_path.clone(),
            config.patch_targets(),
        );
        let monitor = ProgressMonitor::new(
            connector,
            Arc::clone(&ledger),
            config.ws_max_concurrency,
            config.monitor_config(),
        );
        let fetcher = ResultFetcher::new(
            Arc::clone(&api),
            config.download_dir.clone(),
            config.output_node_id.clone(),
        );

        Self {
            submitter: Arc::new(submitter),
            monitor: Arc::new(monitor),
            fetcher: Arc::new(fetcher),
            api,
            ledger,
            registry: Arc::new(JobRegistry::new()),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn download_dir(&self) -> &Path {
        self.fetcher.download_dir()
    }

    /// Load the workflow template the next submission will use.
    pub async fn load_template(&self) -> Result<WorkflowTemplate, CoreError> {
        self.submitter.load_template().await
    }

    /// Upload inputs and queue the workflow; the job is recorded as
    /// QUEUED but not yet monitored.
    pub async fn submit(
        &self,
        video: InputFile,
        image: InputFile,
        output_prefix: &str,
    ) -> Result<SubmittedJob, SubmitError> {
        let job = self.submitter.submit(video, image, output_prefix).await?;
        self.ledger
            .upsert(
                &job.prompt_id,
                StatusUpdate::new(JobStatus::Queued).with_progress(0.0, QUEUED_STEP),
            )
            .await;
        Ok(job)
    }

    /// Run `job` without a listener. Progress is visible through the ledger.
    pub async fn spawn_background(&self, job: SubmittedJob) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        drop(rx);
        self.launch(job, tx).await;
    }

    /// Run `job` and return its events, starting with `queued`.
    ///
    /// Dropping the returned stream cancels the job.
    pub async fn stream(&self, job: SubmittedJob) -> JobEventStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let _ = tx.send(queued_event(&job.prompt_id)).await;
        let cancel = self.launch(job, tx).await;
        JobEventStream::cancel_on_drop(rx, cancel)
    }

    /// Cancel a running job and ask ComfyUI to drop it from its queue.
    ///
    /// Returns `false` if the job is not running here.
    pub async fn cancel(&self, prompt_id: &str) -> bool {
        if !self.registry.cancel(prompt_id).await {
            return false;
        }
        if let Err(e) = self.api.cancel_execution(prompt_id).await {
            tracing::warn!(prompt_id = %prompt_id, error = %e, "Failed to remove job from ComfyUI queue");
        }
        true
    }

    /// Current status of a job.
    ///
    /// Terminal records and records of jobs running here come from the
    /// ledger. Anything else is looked up in ComfyUI history on every call:
    /// failures are stored, finished jobs have their artifact retrieved
    /// first, and in-progress jobs are returned without being stored.
    pub async fn status(&self, prompt_id: &str) -> Option<StatusRecord> {
        let known = self.ledger.get(prompt_id).await;
        if let Some(record) = &known {
            if record.status.is_terminal() || self.registry.contains(prompt_id).await {
                return known;
            }
        }

        let history = match self.api.get_history(prompt_id).await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(prompt_id = %prompt_id, error = %e, "History lookup failed");
                return known;
            }
        };
        let Some(record) = reconcile_history(&history, prompt_id) else {
            return known;
        };
        tracing::info!(prompt_id = %prompt_id, status = %record.status, "Status reconciled from history");

        let status = record.status;
        match status {
            JobStatus::Success => Some(self.retrieve_reconciled(record).await),
            JobStatus::Failed => {
                let mut update = StatusUpdate::new(JobStatus::Failed)
                    .with_progress(record.progress.percentage, record.progress.step.clone());
                if let Some(error) = record.error.clone() {
                    update = update.with_error(error);
                }
                self.ledger.upsert(prompt_id, update).await;
                Some(self.ledger.get(prompt_id).await.unwrap_or(record))
            }
            JobStatus::Queued | JobStatus::Processing => Some(record),
        }
    }

    /// Download the artifact of a job that finished outside this process.
    ///
    /// The artifact is named after the prompt id. On failure the record
    /// is returned without a result and is not stored, so the next call
    /// tries again.
    async fn retrieve_reconciled(&self, record: StatusRecord) -> StatusRecord {
        let prompt_id = record.prompt_id.clone();
        if let Err(e) = validate_file_name(&prompt_id) {
            tracing::warn!(prompt_id = %prompt_id, error = %e, "Prompt id is not usable as a file name");
            return record;
        }
        match self.fetcher.fetch(&prompt_id, &prompt_id).await {
            Ok(path) => {
                self.record_success(&prompt_id, &prompt_id, &path).await;
                self.ledger.get(&prompt_id).await.unwrap_or(record)
            }
            Err(e) => {
                tracing::warn!(prompt_id = %prompt_id, error = %e, "Failed to retrieve reconciled output");
                record
            }
        }
    }

    /// Cancel all running jobs.
    pub async fn shutdown(&self, grace: Duration) {
        self.registry.shutdown(grace).await;
    }

    async fn launch(&self, job: SubmittedJob, events: mpsc::Sender<JobEvent>) -> CancellationToken {
        let engine = self.clone();
        let prompt_id = job.prompt_id.clone();
        self.registry
            .spawn(&prompt_id, move |cancel| async move {
                engine.run(job, cancel, events).await;
            })
            .await
    }

    async fn run(&self, job: SubmittedJob, cancel: CancellationToken, events: mpsc::Sender<JobEvent>) {
        let prompt_id = job.prompt_id.clone();
        tracing::info!(prompt_id = %prompt_id, client_id = %job.client_id, "Job started");

        let monitored = MonitoredJob {
            prompt_id: job.prompt_id.clone(),
            client_id: job.client_id.clone(),
            node_titles: job.node_titles.clone(),
        };

        match self.monitor.run(&monitored, &cancel, &events).await {
            Ok(()) => {
                emit(
                    &events,
                    JobEvent::Retrieving {
                        message: "Retrieving face-swapped video...".into(),
                    },
                )
                .await;
                match self.fetch_output(&job, &cancel).await {
                    Some(Ok(path)) => self.complete(&job, &path, &events).await,
                    Some(Err(e)) => self.fail(&prompt_id, format!("Failed to retrieve output: {e}"), &events).await,
                    None => self.mark_cancelled(&prompt_id, &events).await,
                }
            }
            Err(MonitorError::ConnectExhausted { attempts, last_error }) => {
                // The job may have finished while the stream was down.
                tracing::warn!(
                    prompt_id = %prompt_id,
                    attempts,
                    error = %last_error,
                    "Event stream unavailable, checking history",
                );
                match self.fetch_output(&job, &cancel).await {
                    Some(Ok(path)) => self.complete(&job, &path, &events).await,
                    Some(Err(e)) => {
                        tracing::debug!(prompt_id = %prompt_id, error = %e, "No output in history");
                        let detail = format!(
                            "Lost connection to ComfyUI after {attempts} attempts: {last_error}"
                        );
                        self.fail(&prompt_id, detail, &events).await;
                    }
                    None => self.mark_cancelled(&prompt_id, &events).await,
                }
            }
            Err(MonitorError::TerminalFailure { status }) => {
                self.fail(&prompt_id, format!("Face swap failed with status: {status}"), &events)
                    .await;
            }
            Err(MonitorError::IdleTimeout { timeouts }) => {
                tracing::warn!(prompt_id = %prompt_id, timeouts, "Job stalled");
            }
            Err(MonitorError::Cancelled) => self.mark_cancelled(&prompt_id, &events).await,
        }

        self.registry.remove(&prompt_id).await;
        tracing::info!(prompt_id = %prompt_id, "Job finished");
    }

    /// `None` when cancelled.
    async fn fetch_output(
        &self,
        job: &SubmittedJob,
        cancel: &CancellationToken,
    ) -> Option<Result<PathBuf, FetchError>> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            fetched = self.fetcher.fetch(&job.prompt_id, &job.output_prefix) => Some(fetched),
        }
    }

    async fn complete(&self, job: &SubmittedJob, path: &Path, events: &mpsc::Sender<JobEvent>) {
        let (filename, download_url) = self
            .record_success(&job.prompt_id, &job.output_prefix, path)
            .await;

        emit(
            events,
            JobEvent::Completed {
                prompt_id: job.prompt_id.clone(),
                filename,
                download_url,
                output_prefix: job.output_prefix.clone(),
                message: COMPLETED_STEP.into(),
            },
        )
        .await;
    }

    /// Mark the job SUCCESS with the download URL of `path`.
    async fn record_success(&self, prompt_id: &str, output_prefix: &str, path: &Path) -> (String, String) {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{output_prefix}.mp4"));
        let download_url = format!("/download/{filename}");

        self.ledger
            .upsert(
                prompt_id,
                StatusUpdate::new(JobStatus::Success)
                    .with_progress(100.0, COMPLETED_STEP)
                    .with_result(download_url.clone()),
            )
            .await;
        (filename, download_url)
    }

    async fn fail(&self, prompt_id: &str, detail: String, events: &mpsc::Sender<JobEvent>) {
        tracing::error!(prompt_id = %prompt_id, error = %detail, "Job failed");
        self.ledger
            .upsert(prompt_id, StatusUpdate::new(JobStatus::Failed).with_error(detail.clone()))
            .await;
        emit(events, JobEvent::error(detail)).await;
    }

    async fn mark_cancelled(&self, prompt_id: &str, events: &mpsc::Sender<JobEvent>) {
        tracing::info!(prompt_id = %prompt_id, "Job cancelled");
        self.ledger
            .upsert(prompt_id, StatusUpdate::new(JobStatus::Failed).with_error("Cancelled"))
            .await;
        emit(events, JobEvent::error("Cancelled")).await;
    }
}

/// First event of every streamed job.
pub fn queued_event(prompt_id: &str) -> JobEvent {
    JobEvent::Queued {
        prompt_id: prompt_id.to_string(),
        status_url: format!("/status/{prompt_id}"),
        message: "Face swap workflow queued successfully!".into(),
    }
}

async fn emit(events: &mpsc::Sender<JobEvent>, event: JobEvent) {
    let _ = events.send(event).await;
}
