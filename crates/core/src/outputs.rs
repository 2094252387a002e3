//! Artifact lookup in ComfyUI history documents.
//!
//! `GET /history/{prompt_id}` returns
//! `{prompt_id: {"outputs": {node_id: {kind: [file, ...]}}, "status": {...}}}`
//! where each file is `{"filename", "subfolder", "type", "format"?}`.
//! This module locates the produced video in that document and derives a
//! [`StatusRecord`] from it when no live status is available.

use serde::Deserialize;
use serde_json::Value;

use crate::status::{JobStatus, Progress, StatusRecord};

/// Output kinds checked, in order, on the designated output node.
const PREFERRED_KINDS: [&str; 3] = ["gifs", "videos", "images"];

/// File extensions recognised as video when scanning all outputs.
const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "avi", "mov", "mkv", "webm"];

/// A file produced by a workflow node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputFile {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_output_type")]
    pub kind: String,
    #[serde(default)]
    pub format: Option<String>,
}

fn default_output_type() -> String {
    "output".to_string()
}

impl OutputFile {
    /// Lower-cased extension of the filename, if any.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
    }

    pub fn looks_like_video(&self) -> bool {
        let by_extension = self
            .extension()
            .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()));
        let by_format = self
            .format
            .as_deref()
            .is_some_and(|format| format.starts_with("video/"));
        by_extension || by_format
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OutputLookupError {
    #[error("Empty history response")]
    EmptyHistory,

    #[error("Job {0} not found in history")]
    JobNotFound(String),

    #[error("No outputs present in history for job {0}")]
    NoOutputs(String),

    #[error("No video output found in history for job {0}")]
    NoVideoOutput(String),

    #[error("Filename missing in video output")]
    MissingFilename,
}

/// Find the produced video for `prompt_id` in a history document.
///
/// The designated `output_node` is checked first (first entry of its
/// `gifs`, `videos` or `images` list); otherwise every recorded output is
/// scanned for a video by extension or declared media type.
pub fn locate_video_output(
    history: &Value,
    prompt_id: &str,
    output_node: &str,
) -> Result<OutputFile, OutputLookupError> {
    let entries = history
        .as_object()
        .filter(|map| !map.is_empty())
        .ok_or(OutputLookupError::EmptyHistory)?;

    let entry = entries
        .get(prompt_id)
        .ok_or_else(|| OutputLookupError::JobNotFound(prompt_id.to_string()))?;

    let outputs = entry
        .get("outputs")
        .and_then(Value::as_object)
        .filter(|outputs| !outputs.is_empty())
        .ok_or_else(|| OutputLookupError::NoOutputs(prompt_id.to_string()))?;

    let file = outputs
        .get(output_node)
        .and_then(preferred_output)
        .or_else(|| outputs.values().find_map(scan_for_video))
        .ok_or_else(|| OutputLookupError::NoVideoOutput(prompt_id.to_string()))?;

    if file.filename.is_empty() {
        return Err(OutputLookupError::MissingFilename);
    }
    Ok(file)
}

fn preferred_output(node_outputs: &Value) -> Option<OutputFile> {
    PREFERRED_KINDS.iter().find_map(|kind| {
        node_outputs
            .get(*kind)
            .and_then(Value::as_array)
            .and_then(|files| files.first())
            .and_then(|file| serde_json::from_value(file.clone()).ok())
    })
}

fn scan_for_video(node_outputs: &Value) -> Option<OutputFile> {
    node_outputs
        .as_object()?
        .values()
        .filter_map(Value::as_array)
        .flatten()
        .filter(|item| item.is_object())
        .filter_map(|item| serde_json::from_value::<OutputFile>(item.clone()).ok())
        .find(OutputFile::looks_like_video)
}

/// Derive a status record for `prompt_id` from its history entry.
///
/// Returns `None` when the history does not mention the job. `result` is
/// never set: a download URL exists only once the artifact has been
/// retrieved into the download directory.
pub fn reconcile_history(history: &Value, prompt_id: &str) -> Option<StatusRecord> {
    let entry = history.get(prompt_id)?;
    let status = entry.get("status").cloned().unwrap_or(Value::Null);

    let completed = status
        .get("completed")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let status_str = status.get("status_str").and_then(Value::as_str);

    let mut record = StatusRecord::new(prompt_id, JobStatus::Processing);
    if completed {
        record.status = JobStatus::Success;
        record.progress = Progress::new(100.0, "Completed");
    } else if status_str == Some("error") {
        record.status = JobStatus::Failed;
        record.progress = Progress::new(0.0, "Failed");
        record.error =
            Some(execution_error_message(&status).unwrap_or_else(|| "Workflow failed".to_string()));
    } else {
        record.progress = Progress::new(50.0, "Processing");
    }
    Some(record)
}

/// First `execution_error` message in a history status block.
///
/// `status.messages` is a list of `[event_name, payload]` pairs.
fn execution_error_message(status: &Value) -> Option<String> {
    status
        .get("messages")?
        .as_array()?
        .iter()
        .filter_map(Value::as_array)
        .find(|pair| pair.first().and_then(Value::as_str) == Some("execution_error"))
        .and_then(|pair| pair.get(1))
        .and_then(|payload| payload.get("exception_message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
