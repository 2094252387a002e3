//! Job submission: upload inputs, patch the workflow template, queue it.

use std::path::PathBuf;
use std::sync::Arc;

use faceswap_core::error::CoreError;
use faceswap_core::workflow::{
    NodeTitles, PatchReport, PatchTargets, PatchValues, WorkflowTemplate,
};

use crate::api::{ComfyUIApi, ComfyUIApiError};

/// An input file held in memory.
#[derive(Debug, Clone)]
pub struct InputFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl InputFile {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }
}

/// A job accepted by ComfyUI.
#[derive(Debug, Clone)]
pub struct SubmittedJob {
    pub prompt_id: String,
    pub client_id: String,
    pub output_prefix: String,
    pub node_titles: NodeTitles,
    pub patch_report: PatchReport,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Failed to upload {filename}: {source}")]
    Upload {
        filename: String,
        #[source]
        source: ComfyUIApiError,
    },

    #[error(transparent)]
    Configuration(#[from] CoreError),

    #[error("Workflow submission failed: {0}")]
    Submission(String),
}

/// Uploads inputs and queues the patched workflow.
#[derive(Debug, Clone)]
pub struct JobSubmitter {
    api: Arc<ComfyUIApi>,
    template_path: PathBuf,
    targets: PatchTargets,
}

impl JobSubmitter {
    pub fn new(api: Arc<ComfyUIApi>, template_path: impl Into<PathBuf>, targets: PatchTargets) -> Self {
        Self {
            api,
            template_path: template_path.into(),
            targets,
        }
    }

    /// Read the template from disk. Called on every submission so edits
    /// take effect without a restart.
    pub async fn load_template(&self) -> Result<WorkflowTemplate, CoreError> {
        let text = tokio::fs::read_to_string(&self.template_path)
            .await
            .map_err(|e| {
                CoreError::Configuration(format!(
                    "Workflow template not readable at {}: {e}",
                    self.template_path.display()
                ))
            })?;
        WorkflowTemplate::from_json_str(&text)
    }

    /// Upload both inputs, patch the template and queue it.
    ///
    /// The template is validated before anything is uploaded.
    pub async fn submit(
        &self,
        video: InputFile,
        image: InputFile,
        output_prefix: &str,
    ) -> Result<SubmittedJob, SubmitError> {
        let template = self.load_template().await?;

        let video_name = self.upload(video).await?;
        let image_name = self.upload(image).await?;

        let (workflow, patch_report) = template.patch(
            &self.targets,
            &PatchValues {
                video_filename: &video_name,
                image_filename: &image_name,
                output_prefix,
            },
        );
        for (role, reason) in patch_report.skipped() {
            tracing::warn!(role = role.as_str(), reason = %reason, "Workflow field not patched");
        }

        let client_id = uuid::Uuid::new_v4().to_string();
        let response = self
            .api
            .submit_workflow(&workflow, &client_id)
            .await
            .map_err(|e| SubmitError::Submission(e.to_string()))?;

        let prompt_id = response
            .prompt_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                SubmitError::Submission(format!(
                    "No prompt_id in response (node_errors: {})",
                    response.node_errors
                ))
            })?;

        tracing::info!(
            prompt_id = %prompt_id,
            client_id = %client_id,
            queue_number = ?response.number,
            "Workflow queued",
        );

        Ok(SubmittedJob {
            prompt_id,
            client_id,
            output_prefix: output_prefix.to_string(),
            node_titles: template.node_titles(),
            patch_report,
        })
    }

    async fn upload(&self, file: InputFile) -> Result<String, SubmitError> {
        let InputFile { filename, bytes } = file;
        let size = bytes.len();
        let uploaded = self
            .api
            .upload_file(&filename, bytes)
            .await
            .map_err(|source| SubmitError::Upload {
                filename: filename.clone(),
                source,
            })?;
        tracing::debug!(filename = %filename, stored_as = %uploaded.name, size, "Input uploaded");
        Ok(uploaded.name)
    }
}
