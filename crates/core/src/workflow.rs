//! Workflow template loading and patching.
//!
//! Templates are ComfyUI "API format" documents: a JSON object keyed by
//! node id, each node carrying `inputs`, `class_type` and an optional
//! `_meta.title`. Three inputs are designated per deployment (input video,
//! source face image, output filename prefix) and overwritten for each job.
//!
//! Patching is best-effort: a designated node or `inputs` object that is
//! missing from the template is skipped and recorded in the
//! [`PatchReport`], and the job runs with the template's default for that
//! field.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::CoreError;

/// Node id → human-readable title.
pub type NodeTitles = BTreeMap<String, String>;

/// The role a patched field plays in the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchRole {
    Video,
    Image,
    OutputPrefix,
}

impl PatchRole {
    pub fn as_str(self) -> &'static str {
        match self {
            PatchRole::Video => "video",
            PatchRole::Image => "image",
            PatchRole::OutputPrefix => "output_prefix",
        }
    }
}

/// A designated `inputs` field of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchTarget {
    pub node_id: String,
    pub input: String,
}

impl PatchTarget {
    pub fn new(node_id: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            input: input.into(),
        }
    }
}

/// Where each role is written in the template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchTargets {
    pub video: PatchTarget,
    pub image: PatchTarget,
    pub output_prefix: PatchTarget,
}

impl Default for PatchTargets {
    /// Node layout of the stock ReActor face-swap workflow.
    fn default() -> Self {
        Self {
            video: PatchTarget::new("8", "video"),
            image: PatchTarget::new("10", "image"),
            output_prefix: PatchTarget::new("9", "filename_prefix"),
        }
    }
}

/// Values substituted into the template for one job.
#[derive(Debug, Clone)]
pub struct PatchValues<'a> {
    pub video_filename: &'a str,
    pub image_filename: &'a str,
    pub output_prefix: &'a str,
}

/// Result of patching a single role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    Skipped { reason: String },
}

/// Per-role outcomes of one patch pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchReport {
    pub entries: Vec<(PatchRole, PatchOutcome)>,
}

impl PatchReport {
    /// Roles that could not be patched, with the reason.
    pub fn skipped(&self) -> impl Iterator<Item = (PatchRole, &str)> {
        self.entries.iter().filter_map(|(role, outcome)| match outcome {
            PatchOutcome::Skipped { reason } => Some((*role, reason.as_str())),
            PatchOutcome::Applied => None,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.skipped().next().is_none()
    }

    pub fn outcome(&self, role: PatchRole) -> Option<&PatchOutcome> {
        self.entries
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, outcome)| outcome)
    }
}

/// A loaded workflow template.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    nodes: Map<String, Value>,
}

impl WorkflowTemplate {
    pub fn from_json_str(text: &str) -> Result<Self, CoreError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| CoreError::Configuration(format!("Invalid workflow JSON: {e}")))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        match value {
            Value::Object(nodes) => Ok(Self { nodes }),
            _ => Err(CoreError::Configuration(
                "Workflow template must be a JSON object keyed by node id".into(),
            )),
        }
    }

    /// Produce a patched copy of the template. The template itself is
    /// left untouched.
    pub fn patch(&self, targets: &PatchTargets, values: &PatchValues<'_>) -> (Value, PatchReport) {
        let mut workflow = self.nodes.clone();

        let entries = vec![
            (
                PatchRole::Video,
                set_input(&mut workflow, &targets.video, values.video_filename),
            ),
            (
                PatchRole::Image,
                set_input(&mut workflow, &targets.image, values.image_filename),
            ),
            (
                PatchRole::OutputPrefix,
                set_input(&mut workflow, &targets.output_prefix, values.output_prefix),
            ),
        ];

        (Value::Object(workflow), PatchReport { entries })
    }

    /// Titles of all nodes, from `_meta.title` or `Node {id}`.
    pub fn node_titles(&self) -> NodeTitles {
        self.nodes
            .iter()
            .map(|(id, node)| {
                let title = node
                    .pointer("/_meta/title")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| default_node_title(id));
                (id.clone(), title)
            })
            .collect()
    }
}

/// Label used for nodes without a `_meta.title`.
pub fn default_node_title(node_id: &str) -> String {
    format!("Node {node_id}")
}

fn set_input(workflow: &mut Map<String, Value>, target: &PatchTarget, value: &str) -> PatchOutcome {
    let Some(node) = workflow.get_mut(&target.node_id) else {
        return PatchOutcome::Skipped {
            reason: format!("node {} missing", target.node_id),
        };
    };
    let Some(inputs) = node.get_mut("inputs").and_then(Value::as_object_mut) else {
        return PatchOutcome::Skipped {
            reason: format!("node {} has no inputs object", target.node_id),
        };
    };
    inputs.insert(target.input.clone(), Value::String(value.to_string()));
    PatchOutcome::Applied
}
