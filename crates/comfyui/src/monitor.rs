//! Job progress monitor.
//!
//! [`ProgressMonitor::run`] follows one submitted prompt over the ComfyUI
//! WebSocket until it reaches a final state. Raw messages are interpreted
//! by a [`ProgressTracker`] into [`JobEvent`]s, each of which is written to
//! the [`StatusLedger`] and then sent to the caller's channel.
//!
//! The sequence always ends: with `workflow_status` (completed or a
//! failure status), with an `error` event on idle timeout, or with
//! [`MonitorError::ConnectExhausted`] once the retry budget is spent.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use faceswap_core::events::{is_failure_status, JobEvent, FINAL_STATUS_COMPLETED};
use faceswap_core::ledger::StatusLedger;
use faceswap_core::status::{JobStatus, StatusUpdate};
use faceswap_core::workflow::{default_node_title, NodeTitles};

use crate::client::{MessageStream, StreamConnector};
use crate::messages::{parse_message, ComfyUIMessage, ErrorData, ExecutingData, ProgressData};
use crate::reconnect::RetryPolicy;

/// Percentage reported for a running node before any step progress.
const NODE_STARTED_PERCENTAGE: f64 = 25.0;

/// Message emitted when the engine stays silent for too long.
pub const IDLE_TIMEOUT_DETAIL: &str = "WebSocket idle timeout exceeded";

/// Timing and retry settings for the monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// How long a single receive waits before counting as idle.
    pub recv_timeout: Duration,
    /// Consecutive idle receives that end the job.
    pub idle_limit: u32,
    pub retry: RetryPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            recv_timeout: Duration::from_secs(5),
            idle_limit: 60,
            retry: RetryPolicy::default(),
        }
    }
}

/// A submitted job as seen by the monitor.
#[derive(Debug, Clone)]
pub struct MonitoredJob {
    pub prompt_id: String,
    /// Client id the WebSocket subscription is scoped to.
    pub client_id: String,
    pub node_titles: NodeTitles,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MonitorError {
    #[error("WebSocket handshake failed after {attempts} attempts: {last_error}")]
    ConnectExhausted { attempts: u32, last_error: String },

    #[error("{IDLE_TIMEOUT_DETAIL} ({timeouts} consecutive empty receives)")]
    IdleTimeout { timeouts: u32 },

    #[error("Face swap failed with status: {status}")]
    TerminalFailure { status: String },

    #[error("Monitoring cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// ProgressTracker
// ---------------------------------------------------------------------------

/// One interpreted event plus the ledger write that goes with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub event: JobEvent,
    pub update: Option<StatusUpdate>,
}

impl Step {
    fn new(event: JobEvent, update: Option<StatusUpdate>) -> Self {
        Self { event, update }
    }
}

/// Pure state machine turning raw messages into job events.
///
/// Survives reconnects: a job that started on one connection and
/// finishes on the next is still reported as completed.
#[derive(Debug)]
pub struct ProgressTracker {
    prompt_id: String,
    node_titles: NodeTitles,
    last_progress: Option<f64>,
    last_status: Option<String>,
    started: bool,
    finished: bool,
}

impl ProgressTracker {
    pub fn new(prompt_id: impl Into<String>, node_titles: NodeTitles) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            node_titles,
            last_progress: None,
            last_status: None,
            started: false,
            finished: false,
        }
    }

    /// Whether a terminal event has been produced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Interpret a raw text frame. Malformed frames produce nothing.
    pub fn handle_text(&mut self, text: &str) -> Vec<Step> {
        match parse_message(text) {
            Ok(message) => self.handle_message(&message),
            Err(e) => {
                tracing::debug!(
                    prompt_id = %self.prompt_id,
                    error = %e,
                    "Dropping malformed ComfyUI message",
                );
                Vec::new()
            }
        }
    }

    /// Interpret a parsed message.
    pub fn handle_message(&mut self, message: &ComfyUIMessage) -> Vec<Step> {
        if self.finished || !message.is_for(&self.prompt_id) {
            return Vec::new();
        }

        match message {
            ComfyUIMessage::Progress(data) => self.on_progress(data).into_iter().collect(),
            ComfyUIMessage::Executing(data) => vec![self.on_executing(data)],
            ComfyUIMessage::Status(data) => match data.status.as_deref() {
                Some(status) => self.on_status(status),
                None => Vec::new(),
            },
            ComfyUIMessage::ExecutionError(data) => vec![self.on_execution_error(data)],
            ComfyUIMessage::ExecutionStart(_) => {
                tracing::debug!(prompt_id = %self.prompt_id, "Execution started");
                Vec::new()
            }
            ComfyUIMessage::ExecutionCached(data) => {
                tracing::debug!(
                    prompt_id = %self.prompt_id,
                    cached_nodes = data.nodes.len(),
                    "Execution used cache",
                );
                Vec::new()
            }
            ComfyUIMessage::Executed(data) => {
                tracing::debug!(
                    prompt_id = %self.prompt_id,
                    node = ?data.node,
                    "Node executed with output",
                );
                Vec::new()
            }
            ComfyUIMessage::Other { kind } => {
                tracing::trace!(kind = %kind, "Ignoring ComfyUI message");
                Vec::new()
            }
        }
    }

    fn on_progress(&mut self, data: &ProgressData) -> Option<Step> {
        self.started = true;
        if data.max <= 0.0 {
            return None;
        }

        let percentage = round_percentage(data.value / data.max * 100.0);
        if self.last_progress == Some(percentage) {
            return None;
        }
        self.last_progress = Some(percentage);

        let message = format!("Face swap progress: {percentage}%");
        tracing::debug!(prompt_id = %self.prompt_id, percentage, "Generation progress");
        Some(Step::new(
            JobEvent::Progress {
                percentage,
                current: data.value as i64,
                total: data.max as i64,
                message: message.clone(),
            },
            Some(StatusUpdate::new(JobStatus::Processing).with_progress(percentage, message)),
        ))
    }

    fn on_executing(&mut self, data: &ExecutingData) -> Step {
        let Some(node) = data.node.as_deref() else {
            if self.started {
                self.finished = true;
                tracing::info!(prompt_id = %self.prompt_id, "Execution completed (all nodes done)");
                return Step::new(
                    JobEvent::Terminal {
                        final_status: FINAL_STATUS_COMPLETED.to_string(),
                        message: "Face swap completed successfully. Connection closing.".into(),
                    },
                    Some(
                        StatusUpdate::new(JobStatus::Processing)
                            .with_progress(100.0, "Workflow finished, retrieving output"),
                    ),
                );
            }
            return Step::new(
                JobEvent::Idle {
                    message: "Workflow idle (no active node)".into(),
                },
                None,
            );
        };

        self.started = true;
        let title = self
            .node_titles
            .get(node)
            .cloned()
            .unwrap_or_else(|| default_node_title(node));
        let message = format!("Executing: {title}");
        let percentage = self
            .last_progress
            .filter(|p| *p > 0.0)
            .unwrap_or(NODE_STARTED_PERCENTAGE);

        tracing::debug!(prompt_id = %self.prompt_id, node = %node, title = %title, "Executing node");
        Step::new(
            JobEvent::Executing {
                node: node.to_string(),
                title,
                message: message.clone(),
            },
            Some(StatusUpdate::new(JobStatus::Processing).with_progress(percentage, message)),
        )
    }

    fn on_status(&mut self, status: &str) -> Vec<Step> {
        let mut steps = Vec::new();
        if self.last_status.as_deref() != Some(status) {
            self.last_status = Some(status.to_string());
            steps.push(Step::new(
                JobEvent::StatusUpdate {
                    status: status.to_string(),
                },
                None,
            ));
        }

        if is_failure_status(status) {
            self.finished = true;
            tracing::warn!(prompt_id = %self.prompt_id, status = %status, "Terminal status reached");
            steps.push(Step::new(
                JobEvent::Terminal {
                    final_status: status.to_string(),
                    message: format!("Face swap {status}. Connection closing."),
                },
                Some(
                    StatusUpdate::new(JobStatus::Failed)
                        .with_progress(0.0, format!("Workflow {status}"))
                        .with_error(format!("Face swap {status}")),
                ),
            ));
        }
        steps
    }

    fn on_execution_error(&mut self, data: &ErrorData) -> Step {
        self.finished = true;
        tracing::error!(
            prompt_id = %self.prompt_id,
            node_id = ?data.node_id,
            error_type = %data.exception_type,
            error_message = %data.exception_message,
            "Execution error",
        );
        let error = if data.exception_message.is_empty() {
            "Face swap error".to_string()
        } else {
            format!("Face swap error: {}", data.exception_message.trim())
        };
        Step::new(
            JobEvent::Terminal {
                final_status: "error".into(),
                message: format!("{error}. Connection closing."),
            },
            Some(
                StatusUpdate::new(JobStatus::Failed)
                    .with_progress(0.0, "Workflow error")
                    .with_error(error),
            ),
        )
    }
}

/// Round to two decimal places.
pub fn round_percentage(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// ProgressMonitor
// ---------------------------------------------------------------------------

/// How a single connection ended.
enum Session {
    /// The job reached an end state; no reconnect.
    Finished(Result<(), MonitorError>),
    /// The connection failed or dropped; reconnect if the budget allows.
    Dropped { error: String, delivered: bool },
}

/// Drives [`ProgressTracker`] over live WebSocket connections.
///
/// Cheap to share as `Arc<ProgressMonitor>`; each [`run`](Self::run)
/// call is independent apart from the shared connection limiter.
pub struct ProgressMonitor {
    connector: Arc<dyn StreamConnector>,
    ledger: Arc<StatusLedger>,
    limiter: Arc<Semaphore>,
    config: MonitorConfig,
}

impl ProgressMonitor {
    /// `max_connections` caps simultaneously open event streams; further
    /// jobs wait for a free slot.
    pub fn new(
        connector: Arc<dyn StreamConnector>,
        ledger: Arc<StatusLedger>,
        max_connections: usize,
        config: MonitorConfig,
    ) -> Self {
        Self {
            connector,
            ledger,
            limiter: Arc::new(Semaphore::new(max_connections)),
            config,
        }
    }

    /// Follow `job` until it ends, sending each event to `events`.
    ///
    /// Returns `Ok(())` after a `completed` terminal event. A closed
    /// `events` receiver does not stop monitoring; the ledger is still
    /// kept up to date.
    pub async fn run(
        &self,
        job: &MonitoredJob,
        cancel: &CancellationToken,
        events: &mpsc::Sender<JobEvent>,
    ) -> Result<(), MonitorError> {
        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(MonitorError::Cancelled),
            permit = self.limiter.acquire() => permit.map_err(|_| MonitorError::Cancelled)?,
        };

        self.ledger
            .upsert(
                &job.prompt_id,
                StatusUpdate::new(JobStatus::Processing).with_progress(0.0, "Starting"),
            )
            .await;

        let mut tracker = ProgressTracker::new(job.prompt_id.clone(), job.node_titles.clone());
        let mut failures = 0u32;

        loop {
            let (error, delivered) = match self.run_session(job, &mut tracker, cancel, events).await {
                Session::Finished(outcome) => return outcome,
                Session::Dropped { error, delivered } => (error, delivered),
            };

            if delivered {
                failures = 0;
            }
            failures += 1;

            if !self.config.retry.allows_retry(failures) {
                tracing::error!(
                    prompt_id = %job.prompt_id,
                    attempts = failures,
                    error = %error,
                    "WebSocket retries exhausted",
                );
                return Err(MonitorError::ConnectExhausted {
                    attempts: failures,
                    last_error: error,
                });
            }

            let delay = self.config.retry.delay_for_retry(failures);
            tracing::warn!(
                prompt_id = %job.prompt_id,
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "WebSocket connection failed, retrying",
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(MonitorError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Connect once and consume messages until the job ends or the
    /// connection goes away.
    async fn run_session(
        &self,
        job: &MonitoredJob,
        tracker: &mut ProgressTracker,
        cancel: &CancellationToken,
        events: &mpsc::Sender<JobEvent>,
    ) -> Session {
        let connected = tokio::select! {
            _ = cancel.cancelled() => return Session::Finished(Err(MonitorError::Cancelled)),
            connected = self.connector.connect(&job.client_id) => connected,
        };
        let mut stream: MessageStream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                return Session::Dropped {
                    error: e.to_string(),
                    delivered: false,
                }
            }
        };

        let mut idle = 0u32;
        let mut delivered = false;

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => return Session::Finished(Err(MonitorError::Cancelled)),
                received = tokio::time::timeout(self.config.recv_timeout, stream.next()) => received,
            };

            let text = match received {
                Err(_elapsed) => {
                    idle += 1;
                    if idle >= self.config.idle_limit {
                        tracing::error!(prompt_id = %job.prompt_id, idle, "{IDLE_TIMEOUT_DETAIL}");
                        self.ledger
                            .upsert(
                                &job.prompt_id,
                                StatusUpdate::new(JobStatus::Failed).with_error(IDLE_TIMEOUT_DETAIL),
                            )
                            .await;
                        emit(events, JobEvent::error(IDLE_TIMEOUT_DETAIL)).await;
                        return Session::Finished(Err(MonitorError::IdleTimeout { timeouts: idle }));
                    }
                    continue;
                }
                Ok(None) => {
                    return Session::Dropped {
                        error: "Connection closed by server".into(),
                        delivered,
                    }
                }
                Ok(Some(Err(e))) => {
                    return Session::Dropped {
                        error: e.to_string(),
                        delivered,
                    }
                }
                Ok(Some(Ok(text))) => text,
            };

            idle = 0;
            delivered = true;

            for step in tracker.handle_text(&text) {
                if let Some(update) = step.update {
                    self.ledger.upsert(&job.prompt_id, update).await;
                }
                let final_status = step.event.final_status().map(str::to_string);
                emit(events, step.event).await;

                if let Some(status) = final_status {
                    let outcome = if status == FINAL_STATUS_COMPLETED {
                        Ok(())
                    } else {
                        Err(MonitorError::TerminalFailure { status })
                    };
                    return Session::Finished(outcome);
                }
            }
        }
    }
}

/// Send an event, ignoring a receiver that has gone away.
async fn emit(events: &mpsc::Sender<JobEvent>, event: JobEvent) {
    if events.send(event).await.is_err() {
        tracing::trace!("Event receiver dropped");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;
    use crate::client::ComfyUIClientError;

    // ---- helpers ----

    fn titles() -> NodeTitles {
        [("8".to_string(), "Load Video".to_string())]
            .into_iter()
            .collect()
    }

    fn tracker() -> ProgressTracker {
        ProgressTracker::new("p1", titles())
    }

    fn events_of(steps: Vec<Step>) -> Vec<JobEvent> {
        steps.into_iter().map(|s| s.event).collect()
    }

    fn progress(value: u32, max: u32) -> String {
        format!(r#"{{"type":"progress","data":{{"value":{value},"max":{max},"prompt_id":"p1"}}}}"#)
    }

    fn executing(node: &str) -> String {
        format!(r#"{{"type":"executing","data":{{"node":"{node}","prompt_id":"p1"}}}}"#)
    }

    fn executing_done() -> String {
        r#"{"type":"executing","data":{"node":null,"prompt_id":"p1"}}"#.to_string()
    }

    fn status(value: &str) -> String {
        format!(r#"{{"type":"status","data":{{"status":"{value}"}}}}"#)
    }

    enum Script {
        Fail,
        /// Deliver frames, then close the connection.
        Close(Vec<String>),
        /// Deliver frames, then stay silent.
        Hang(Vec<String>),
    }

    /// Connector that replays one script entry per connection attempt.
    struct ScriptedConnector {
        scripts: Mutex<VecDeque<Script>>,
        attempts: Mutex<Vec<Instant>>,
    }

    impl ScriptedConnector {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                attempts: Mutex::new(Vec::new()),
            })
        }

        fn attempt_times(&self) -> Vec<Instant> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StreamConnector for ScriptedConnector {
        async fn connect(&self, _client_id: &str) -> Result<MessageStream, ComfyUIClientError> {
            self.attempts.lock().unwrap().push(Instant::now());
            let script = self.scripts.lock().unwrap().pop_front();
            match script {
                None | Some(Script::Fail) => {
                    Err(ComfyUIClientError::Connection("handshake rejected".into()))
                }
                Some(Script::Close(frames)) => {
                    Ok(futures::stream::iter(frames.into_iter().map(Ok)).boxed())
                }
                Some(Script::Hang(frames)) => Ok(futures::stream::iter(frames.into_iter().map(Ok))
                    .chain(futures::stream::pending())
                    .boxed()),
            }
        }
    }

    fn job() -> MonitoredJob {
        MonitoredJob {
            prompt_id: "p1".into(),
            client_id: "c1".into(),
            node_titles: titles(),
        }
    }

    fn monitor(connector: Arc<ScriptedConnector>, ledger: Arc<StatusLedger>, config: MonitorConfig) -> ProgressMonitor {
        ProgressMonitor::new(connector, ledger, 10, config)
    }

    async fn run_to_end(
        monitor: &ProgressMonitor,
    ) -> (Result<(), MonitorError>, Vec<JobEvent>) {
        let (tx, mut rx) = mpsc::channel(64);
        let outcome = monitor.run(&job(), &CancellationToken::new(), &tx).await;
        drop(tx);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (outcome, events)
    }

    // ---- tracker ----

    #[test]
    fn progress_is_rounded_to_two_decimals() {
        let mut tracker = tracker();
        let events = events_of(tracker.handle_text(&progress(1, 3)));
        assert_matches!(
            events.as_slice(),
            [JobEvent::Progress { percentage, current: 1, total: 3, .. }] if *percentage == 33.33
        );

        let events = events_of(tracker.handle_text(&progress(2, 3)));
        assert_matches!(
            events.as_slice(),
            [JobEvent::Progress { percentage, .. }] if *percentage == 66.67
        );
    }

    #[test]
    fn unchanged_progress_is_not_repeated() {
        let mut tracker = tracker();
        assert_eq!(tracker.handle_text(&progress(5, 10)).len(), 1);
        assert!(tracker.handle_text(&progress(5, 10)).is_empty());
        assert!(tracker.handle_text(&progress(10, 20)).is_empty());
        assert_eq!(tracker.handle_text(&progress(6, 10)).len(), 1);
    }

    #[test]
    fn zero_max_progress_is_ignored() {
        let mut tracker = tracker();
        assert!(tracker.handle_text(&progress(3, 0)).is_empty());
    }

    #[test]
    fn progress_updates_ledger_as_processing() {
        let mut tracker = tracker();
        let steps = tracker.handle_text(&progress(1, 4));
        let update = steps[0].update.clone().unwrap();
        assert_eq!(update.status, JobStatus::Processing);
        assert_eq!(update.progress.unwrap().percentage, 25.0);
    }

    #[test]
    fn idle_before_start_is_not_terminal() {
        let mut tracker = tracker();
        let events = events_of(tracker.handle_text(&executing_done()));
        assert_matches!(events.as_slice(), [JobEvent::Idle { .. }]);
        assert!(!tracker.is_finished());

        let events = events_of(tracker.handle_text(&executing_done()));
        assert_matches!(events.as_slice(), [JobEvent::Idle { .. }]);
    }

    #[test]
    fn idle_after_start_completes_exactly_once() {
        let mut tracker = tracker();
        tracker.handle_text(&executing("8"));

        let events = events_of(tracker.handle_text(&executing_done()));
        assert_matches!(
            events.as_slice(),
            [JobEvent::Terminal { final_status, .. }] if final_status == "completed"
        );
        assert!(tracker.is_finished());

        assert!(tracker.handle_text(&executing_done()).is_empty());
        assert!(tracker.handle_text(&progress(1, 2)).is_empty());
    }

    #[test]
    fn progress_alone_marks_job_started() {
        let mut tracker = tracker();
        tracker.handle_text(&progress(1, 2));
        let events = events_of(tracker.handle_text(&executing_done()));
        assert_eq!(events[0].final_status(), Some("completed"));
    }

    #[test]
    fn executing_uses_node_title() {
        let mut tracker = tracker();
        let events = events_of(tracker.handle_text(&executing("8")));
        assert_eq!(
            events,
            vec![JobEvent::Executing {
                node: "8".into(),
                title: "Load Video".into(),
                message: "Executing: Load Video".into(),
            }]
        );

        let events = events_of(tracker.handle_text(&executing("42")));
        assert_matches!(
            events.as_slice(),
            [JobEvent::Executing { title, .. }] if title == "Node 42"
        );
    }

    #[test]
    fn executing_reports_last_progress_or_default() {
        let mut tracker = tracker();
        let steps = tracker.handle_text(&executing("8"));
        let progress_value = steps[0].update.clone().unwrap().progress.unwrap();
        assert_eq!(progress_value.percentage, 25.0);

        tracker.handle_text(&progress(3, 4));
        let steps = tracker.handle_text(&executing("9"));
        let progress_value = steps[0].update.clone().unwrap().progress.unwrap();
        assert_eq!(progress_value.percentage, 75.0);
        assert_eq!(progress_value.step, "Executing: Node 9");
    }

    #[test]
    fn status_changes_are_deduplicated() {
        let mut tracker = tracker();
        assert_eq!(tracker.handle_text(&status("running")).len(), 1);
        assert!(tracker.handle_text(&status("running")).is_empty());
        assert_eq!(tracker.handle_text(&status("queued")).len(), 1);
    }

    #[test]
    fn failure_status_ends_with_single_terminal() {
        let mut tracker = tracker();
        tracker.handle_text(&status("running"));
        tracker.handle_text(&status("running"));

        let steps = tracker.handle_text(&status("cancelled"));
        let events: Vec<_> = steps.iter().map(|s| s.event.clone()).collect();
        assert_eq!(
            events,
            vec![
                JobEvent::StatusUpdate {
                    status: "cancelled".into()
                },
                JobEvent::Terminal {
                    final_status: "cancelled".into(),
                    message: "Face swap cancelled. Connection closing.".into(),
                },
            ]
        );
        let update = steps[1].update.clone().unwrap();
        assert_eq!(update.status, JobStatus::Failed);
        assert_eq!(update.error.as_deref(), Some("Face swap cancelled"));

        assert!(tracker.handle_text(&status("failed")).is_empty());
    }

    #[test]
    fn repeated_failure_status_still_terminates() {
        let mut tracker = tracker();
        tracker.handle_text(&status("error"));
        assert!(tracker.is_finished());
    }

    #[test]
    fn queue_broadcast_status_is_ignored() {
        let mut tracker = tracker();
        let frame = r#"{"type":"status","data":{"status":{"exec_info":{"queue_remaining":1}}}}"#;
        assert!(tracker.handle_text(frame).is_empty());
    }

    #[test]
    fn execution_error_is_terminal() {
        let mut tracker = tracker();
        let frame = r#"{"type":"execution_error","data":{"prompt_id":"p1","node_id":"10","exception_message":"No face found\n","exception_type":"ValueError"}}"#;
        let steps = tracker.handle_text(frame);
        assert_eq!(steps[0].event.final_status(), Some("error"));
        assert_eq!(
            steps[0].update.clone().unwrap().error.as_deref(),
            Some("Face swap error: No face found")
        );
        assert!(tracker.is_finished());
    }

    #[test]
    fn messages_for_other_prompts_are_dropped() {
        let mut tracker = tracker();
        let frame = r#"{"type":"executing","data":{"node":"8","prompt_id":"other"}}"#;
        assert!(tracker.handle_text(frame).is_empty());

        let frame = r#"{"type":"progress","data":{"value":1,"max":2}}"#;
        assert_eq!(tracker.handle_text(frame).len(), 1);
    }

    #[test]
    fn malformed_and_unknown_frames_are_dropped() {
        let mut tracker = tracker();
        assert!(tracker.handle_text("{not json").is_empty());
        assert!(tracker
            .handle_text(r#"{"type":"crystools.monitor","data":{}}"#)
            .is_empty());
    }

    // ---- monitor ----

    #[tokio::test(start_paused = true)]
    async fn run_completes_and_updates_ledger() {
        let connector = ScriptedConnector::new(vec![Script::Hang(vec![
            executing_done(),
            executing("8"),
            progress(5, 10),
            executing_done(),
        ])]);
        let ledger = Arc::new(StatusLedger::new());
        let monitor = monitor(connector, Arc::clone(&ledger), MonitorConfig::default());

        let (outcome, events) = run_to_end(&monitor).await;

        assert_eq!(outcome, Ok(()));
        let names: Vec<_> = events.iter().map(JobEvent::name).collect();
        assert_eq!(
            names,
            vec!["executing", "executing", "progress", "workflow_status"]
        );
        let record = ledger.get("p1").await.unwrap();
        assert_eq!(record.status, JobStatus::Processing);
        assert_eq!(record.progress.percentage, 100.0);
        assert_eq!(monitor.limiter.available_permits(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_limit_ends_with_error_after_exact_timeouts() {
        let connector = ScriptedConnector::new(vec![Script::Hang(vec![])]);
        let ledger = Arc::new(StatusLedger::new());
        let config = MonitorConfig {
            idle_limit: 3,
            ..Default::default()
        };
        let monitor = monitor(connector, Arc::clone(&ledger), config);

        let started = Instant::now();
        let (outcome, events) = run_to_end(&monitor).await;

        assert_eq!(outcome, Err(MonitorError::IdleTimeout { timeouts: 3 }));
        assert_eq!(started.elapsed(), Duration::from_secs(15));
        assert_eq!(events, vec![JobEvent::error(IDLE_TIMEOUT_DETAIL)]);
        let record = ledger.get("p1").await.unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.as_deref(), Some(IDLE_TIMEOUT_DETAIL));
    }

    #[tokio::test(start_paused = true)]
    async fn messages_reset_the_idle_counter() {
        let connector = ScriptedConnector::new(vec![Script::Hang(vec![executing("8")])]);
        let config = MonitorConfig {
            idle_limit: 2,
            ..Default::default()
        };
        let monitor = monitor(connector, Arc::new(StatusLedger::new()), config);

        let (outcome, events) = run_to_end(&monitor).await;

        assert_eq!(outcome, Err(MonitorError::IdleTimeout { timeouts: 2 }));
        assert_eq!(events.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_retries_back_off_exponentially() {
        let connector = ScriptedConnector::new(vec![Script::Fail, Script::Fail, Script::Fail]);
        let monitor = monitor(
            Arc::clone(&connector),
            Arc::new(StatusLedger::new()),
            MonitorConfig::default(),
        );

        let (outcome, events) = run_to_end(&monitor).await;

        assert_matches!(outcome, Err(MonitorError::ConnectExhausted { attempts: 3, .. }));
        assert!(events.is_empty());

        let times = connector.attempt_times();
        assert_eq!(times.len(), 3);
        assert_eq!(times[1] - times[0], Duration::from_secs(2));
        assert_eq!(times[2] - times[1], Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_failed_handshake() {
        let connector = ScriptedConnector::new(vec![
            Script::Fail,
            Script::Hang(vec![executing("8"), executing_done()]),
        ]);
        let monitor = monitor(
            Arc::clone(&connector),
            Arc::new(StatusLedger::new()),
            MonitorConfig::default(),
        );

        let (outcome, _) = run_to_end(&monitor).await;

        assert_eq!(outcome, Ok(()));
        assert_eq!(connector.attempt_times().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_stream_reconnects_and_keeps_progress_state() {
        let connector = ScriptedConnector::new(vec![
            Script::Close(vec![executing("8")]),
            Script::Hang(vec![executing_done()]),
        ]);
        let monitor = monitor(
            Arc::clone(&connector),
            Arc::new(StatusLedger::new()),
            MonitorConfig::default(),
        );

        let (outcome, events) = run_to_end(&monitor).await;

        assert_eq!(outcome, Ok(()));
        assert_eq!(events.last().and_then(JobEvent::final_status), Some("completed"));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_status_returns_terminal_failure() {
        let connector = ScriptedConnector::new(vec![Script::Hang(vec![
            executing("8"),
            status("failed"),
            executing_done(),
        ])]);
        let ledger = Arc::new(StatusLedger::new());
        let monitor = monitor(connector, Arc::clone(&ledger), MonitorConfig::default());

        let (outcome, events) = run_to_end(&monitor).await;

        assert_eq!(
            outcome,
            Err(MonitorError::TerminalFailure {
                status: "failed".into()
            })
        );
        let terminals = events.iter().filter(|e| e.is_terminal()).count();
        assert_eq!(terminals, 1);
        assert_eq!(ledger.get("p1").await.unwrap().status, JobStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_waiting() {
        let connector = ScriptedConnector::new(vec![Script::Hang(vec![])]);
        let monitor = monitor(connector, Arc::new(StatusLedger::new()), MonitorConfig::default());
        let cancel = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(8);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            trigger.cancel();
        });

        let outcome = monitor.run(&job(), &cancel, &tx).await;
        assert_eq!(outcome, Err(MonitorError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_a_free_connection_slot() {
        let connector = ScriptedConnector::new(vec![Script::Hang(vec![])]);
        let monitor = ProgressMonitor::new(
            connector.clone(),
            Arc::new(StatusLedger::new()),
            0,
            MonitorConfig::default(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, _rx) = mpsc::channel(8);

        let outcome = monitor.run(&job(), &cancel, &tx).await;
        assert_eq!(outcome, Err(MonitorError::Cancelled));
        assert!(connector.attempt_times().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_receiver_does_not_stop_monitoring() {
        let connector = ScriptedConnector::new(vec![Script::Hang(vec![
            executing("8"),
            executing_done(),
        ])]);
        let ledger = Arc::new(StatusLedger::new());
        let monitor = monitor(connector, Arc::clone(&ledger), MonitorConfig::default());
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let outcome = monitor.run(&job(), &CancellationToken::new(), &tx).await;
        assert_eq!(outcome, Ok(()));
        assert_eq!(ledger.get("p1").await.unwrap().progress.percentage, 100.0);
    }

    #[test]
    fn round_percentage_two_decimals() {
        assert_eq!(round_percentage(33.333333), 33.33);
        assert_eq!(round_percentage(66.666666), 66.67);
        assert_eq!(round_percentage(100.0), 100.0);
    }
}
