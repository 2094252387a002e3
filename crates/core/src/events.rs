//! Normalized job events.
//!
//! The progress monitor translates raw ComfyUI WebSocket messages into
//! [`JobEvent`]s; the transport adapters (SSE, raw WebSocket) forward them
//! to callers. The job engine adds a few transport-level variants
//! (`Queued`, `Retrieving`, `Completed`) around the monitor's sequence.
//!
//! On the wire every event is a `(name, data)` pair: SSE uses the name as
//! the `event:` field and the JSON data as the payload, the raw socket
//! sends `{"event": name, "data": {...}}` frames.

use serde_json::{json, Value};

/// Final status reported when the workflow finished all its nodes.
pub const FINAL_STATUS_COMPLETED: &str = "completed";

/// Engine status values that end a job as failed.
pub const FAILURE_STATUSES: [&str; 3] = ["error", "failed", "cancelled"];

#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// The job was accepted by the engine.
    Queued {
        prompt_id: String,
        status_url: String,
        message: String,
    },

    /// Step-level progress inside a node.
    Progress {
        percentage: f64,
        current: i64,
        total: i64,
        message: String,
    },

    /// A workflow node started executing.
    Executing {
        node: String,
        title: String,
        message: String,
    },

    /// The engine reported no active node before the job started.
    Idle { message: String },

    /// A raw engine status value changed.
    StatusUpdate { status: String },

    /// The job reached a final state; nothing else comes from the monitor.
    Terminal {
        final_status: String,
        message: String,
    },

    /// The produced artifact is being retrieved.
    Retrieving { message: String },

    /// The artifact is available for download.
    Completed {
        prompt_id: String,
        filename: String,
        download_url: String,
        output_prefix: String,
        message: String,
    },

    /// A fatal failure; the sequence ends.
    Error { detail: String },
}

impl JobEvent {
    pub fn error(detail: impl Into<String>) -> Self {
        JobEvent::Error {
            detail: detail.into(),
        }
    }

    /// Event name used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Queued { .. } => "queued",
            JobEvent::Progress { .. } => "progress",
            JobEvent::Executing { .. } | JobEvent::Idle { .. } => "executing",
            JobEvent::StatusUpdate { .. } => "status_update",
            JobEvent::Terminal { .. } => "workflow_status",
            JobEvent::Retrieving { .. } => "status",
            JobEvent::Completed { .. } => "completed",
            JobEvent::Error { .. } => "error",
        }
    }

    /// JSON payload used on the wire.
    pub fn data(&self) -> Value {
        match self {
            JobEvent::Queued {
                prompt_id,
                status_url,
                message,
            } => json!({
                "prompt_id": prompt_id,
                "message": message,
                "status_url": status_url,
            }),
            JobEvent::Progress {
                percentage,
                current,
                total,
                message,
            } => json!({
                "percentage": percentage,
                "current": current,
                "total": total,
                "message": message,
            }),
            JobEvent::Executing {
                node,
                title,
                message,
            } => json!({ "node": node, "title": title, "message": message }),
            JobEvent::Idle { message } => json!({ "node": "idle", "message": message }),
            JobEvent::StatusUpdate { status } => json!({ "status": status }),
            JobEvent::Terminal {
                final_status,
                message,
            } => json!({ "final_status": final_status, "message": message }),
            JobEvent::Retrieving { message } => json!({ "message": message }),
            JobEvent::Completed {
                prompt_id,
                filename,
                download_url,
                output_prefix,
                message,
            } => json!({
                "message": message,
                "filename": filename,
                "download_url": download_url,
                "prompt_id": prompt_id,
                "output_prefix": output_prefix,
            }),
            JobEvent::Error { detail } => json!({ "detail": detail }),
        }
    }

    /// `{"event": name, "data": {...}}` as sent over a raw socket.
    pub fn to_frame(&self) -> Value {
        json!({ "event": self.name(), "data": self.data() })
    }

    /// Whether this event ends the monitor's sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Terminal { .. } | JobEvent::Error { .. })
    }

    /// The final status carried by a [`JobEvent::Terminal`].
    pub fn final_status(&self) -> Option<&str> {
        match self {
            JobEvent::Terminal { final_status, .. } => Some(final_status),
            _ => None,
        }
    }
}

/// Whether an engine status value ends the job as failed.
pub fn is_failure_status(status: &str) -> bool {
    FAILURE_STATUSES.contains(&status)
}
