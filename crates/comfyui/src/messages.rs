//! ComfyUI WebSocket message types and parser.
//!
//! ComfyUI sends JSON messages over WebSocket with the shape
//! `{"type": "<kind>", "data": {...}}`. This module deserializes them
//! into a typed [`ComfyUIMessage`] enum.
//!
//! Parsing is lenient: unknown kinds become [`ComfyUIMessage::Other`],
//! node ids may arrive as strings or numbers, and the `status` payload may
//! carry its value directly or nested under another `status` key. Only
//! malformed JSON (or a known kind with an unusable payload) is an error.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// All ComfyUI WebSocket message kinds the monitor cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum ComfyUIMessage {
    /// Server or job status broadcast.
    Status(StatusData),

    /// A prompt has started executing.
    ExecutionStart(PromptData),

    /// Some nodes were skipped because their outputs are cached.
    ExecutionCached(ExecutionCachedData),

    /// A specific node is currently executing (or execution finished when `node` is `None`).
    Executing(ExecutingData),

    /// Progress update from a long-running node (e.g. KSampler).
    Progress(ProgressData),

    /// A node has finished and produced output.
    Executed(ExecutedData),

    /// Execution failed with an error.
    ExecutionError(ErrorData),

    /// Any other message kind (`crystools.monitor`, previews, ...).
    Other { kind: String },
}

impl ComfyUIMessage {
    /// The prompt this message is addressed to, if it names one.
    ///
    /// `None` means the message is global (not scoped to a prompt).
    pub fn prompt_id(&self) -> Option<&str> {
        match self {
            ComfyUIMessage::Status(data) => data.prompt_id.as_deref(),
            ComfyUIMessage::ExecutionStart(data) => data.prompt_id.as_deref(),
            ComfyUIMessage::ExecutionCached(data) => data.prompt_id.as_deref(),
            ComfyUIMessage::Executing(data) => data.prompt_id.as_deref(),
            ComfyUIMessage::Progress(data) => data.prompt_id.as_deref(),
            ComfyUIMessage::Executed(data) => data.prompt_id.as_deref(),
            ComfyUIMessage::ExecutionError(data) => data.prompt_id.as_deref(),
            ComfyUIMessage::Other { .. } => None,
        }
    }

    /// Whether this message concerns `prompt_id` (or is global).
    pub fn is_for(&self, prompt_id: &str) -> bool {
        self.prompt_id().map_or(true, |id| id == prompt_id)
    }
}

/// Payload for `status` messages.
///
/// Queue broadcasts carry `{"status": {"exec_info": ...}}`, in which case
/// `status` is `None`; job-level broadcasts carry a plain string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusData {
    #[serde(default, deserialize_with = "status_value")]
    pub status: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for messages that only name a prompt.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PromptData {
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `execution_cached` messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutionCachedData {
    #[serde(default)]
    pub prompt_id: Option<String>,
    /// Node IDs whose outputs were served from cache.
    #[serde(default, deserialize_with = "node_ids")]
    pub nodes: Vec<String>,
}

/// Payload for `executing` messages.
///
/// When `node` is `None`, the engine has no active node: either nothing
/// started yet, or the prompt finished.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutingData {
    #[serde(default, deserialize_with = "node_id")]
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `progress` messages (step-level progress within a node).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgressData {
    /// Current step number.
    #[serde(default)]
    pub value: f64,
    /// Total number of steps.
    #[serde(default = "default_max")]
    pub max: f64,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default, deserialize_with = "node_id")]
    pub node: Option<String>,
}

fn default_max() -> f64 {
    1.0
}

/// Payload for `executed` messages (node output).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutedData {
    #[serde(default, deserialize_with = "node_id")]
    pub node: Option<String>,
    /// Raw output value (images, filenames, etc.).
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `execution_error` messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorData {
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default, deserialize_with = "node_id")]
    pub node_id: Option<String>,
    #[serde(default)]
    pub exception_message: String,
    #[serde(default)]
    pub exception_type: String,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// Parse a ComfyUI WebSocket text message into a typed enum.
///
/// Returns `Err` for malformed JSON or for a known kind whose payload
/// cannot be read. Callers should log and continue.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    let Envelope { kind, data } = serde_json::from_str(text)?;
    let data = if data.is_null() {
        Value::Object(Default::default())
    } else {
        data
    };

    let message = match kind.as_str() {
        "status" => ComfyUIMessage::Status(serde_json::from_value(data)?),
        "execution_start" => ComfyUIMessage::ExecutionStart(serde_json::from_value(data)?),
        "execution_cached" => ComfyUIMessage::ExecutionCached(serde_json::from_value(data)?),
        "executing" => ComfyUIMessage::Executing(serde_json::from_value(data)?),
        "progress" => ComfyUIMessage::Progress(serde_json::from_value(data)?),
        "executed" => ComfyUIMessage::Executed(serde_json::from_value(data)?),
        "execution_error" => ComfyUIMessage::ExecutionError(serde_json::from_value(data)?),
        _ => ComfyUIMessage::Other { kind },
    };
    Ok(message)
}

// ---- lenient field readers ----

/// Node ids are strings in current ComfyUI builds but numbers in some
/// custom nodes.
fn node_id_from_value(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn node_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(node_id_from_value(Value::deserialize(deserializer)?))
}

fn node_ids<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items.into_iter().filter_map(node_id_from_value).collect(),
        _ => Vec::new(),
    })
}

fn status_value<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => Some(s),
        Value::Object(mut map) => match map.remove("status") {
            Some(Value::String(s)) => Some(s),
            _ => None,
        },
        _ => None,
    })
}
