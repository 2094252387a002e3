//! Caller-visible job status model.
//!
//! A [`StatusRecord`] moves through `QUEUED -> PROCESSING -> SUCCESS|FAILED`.
//! Records are created and mutated through the
//! [`StatusLedger`](crate::ledger::StatusLedger) using [`StatusUpdate`]
//! values, which carry only the fields a writer wants to change.

use serde::{Deserialize, Serialize};

use crate::types::{JobId, Timestamp};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Processing,
    Success,
    Failed,
}

impl JobStatus {
    /// `SUCCESS` and `FAILED` are terminal: no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress snapshot shown to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Completion percentage, 0-100.
    pub percentage: f64,
    /// Human-readable description of the current step.
    pub step: String,
}

impl Progress {
    pub fn new(percentage: f64, step: impl Into<String>) -> Self {
        Self {
            percentage,
            step: step.into(),
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new(0.0, "Initializing")
    }
}

/// The caller-visible state of a job, as returned by `GET /status/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub prompt_id: JobId,
    pub status: JobStatus,
    pub progress: Progress,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Download URL of the produced artifact, once retrieved.
    pub result: Option<String>,
    pub error: Option<String>,
}

impl StatusRecord {
    /// Build a fresh record with both timestamps set to now.
    pub fn new(prompt_id: impl Into<JobId>, status: JobStatus) -> Self {
        let now = chrono::Utc::now();
        Self {
            prompt_id: prompt_id.into(),
            status,
            progress: Progress::default(),
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
        }
    }
}

/// A partial update to a [`StatusRecord`].
///
/// `status` is always written; the optional fields are written only when
/// set, so omitted fields keep their prior value.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: JobStatus,
    pub progress: Option<Progress>,
    pub error: Option<String>,
    pub result: Option<String>,
}

impl StatusUpdate {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            progress: None,
            error: None,
            result: None,
        }
    }

    pub fn with_progress(mut self, percentage: f64, step: impl Into<String>) -> Self {
        self.progress = Some(Progress::new(percentage, step));
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }
}
