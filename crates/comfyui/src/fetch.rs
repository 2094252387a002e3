//! Result retrieval: locate the produced video in history and download it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use faceswap_core::outputs::{locate_video_output, OutputLookupError};

use crate::api::{ComfyUIApi, ComfyUIApiError};

/// Extension used when the artifact name has none.
const DEFAULT_EXTENSION: &str = "mp4";

/// Upper bound on a single artifact download.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Failed to read history: {0}")]
    History(#[source] ComfyUIApiError),

    #[error(transparent)]
    Lookup(#[from] OutputLookupError),

    #[error("Failed to download output: {0}")]
    Download(#[source] ComfyUIApiError),

    #[error("Failed to write output: {0}")]
    Io(#[from] std::io::Error),
}

/// Downloads finished artifacts into the download directory.
#[derive(Debug, Clone)]
pub struct ResultFetcher {
    api: Arc<ComfyUIApi>,
    download_dir: PathBuf,
    output_node: String,
}

impl ResultFetcher {
    pub fn new(api: Arc<ComfyUIApi>, download_dir: impl Into<PathBuf>, output_node: impl Into<String>) -> Self {
        Self {
            api,
            download_dir: download_dir.into(),
            output_node: output_node.into(),
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Fetch the video produced by `prompt_id` into
    /// `{download_dir}/{output_prefix}.{ext}` and return the local path.
    pub async fn fetch(&self, prompt_id: &str, output_prefix: &str) -> Result<PathBuf, FetchError> {
        let history = self
            .api
            .get_history(prompt_id)
            .await
            .map_err(FetchError::History)?;
        let output = locate_video_output(&history, prompt_id, &self.output_node)?;

        let extension = output
            .extension()
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
        let target = self.download_dir.join(format!("{output_prefix}.{extension}"));

        tracing::info!(
            prompt_id = %prompt_id,
            filename = %output.filename,
            subfolder = %output.subfolder,
            target = %target.display(),
            "Downloading output",
        );

        let response = self
            .api
            .view(&output.filename, &output.subfolder, &output.kind, DOWNLOAD_TIMEOUT)
            .await
            .map_err(FetchError::Download)?;

        // Only a complete transfer is renamed to the target name.
        tokio::fs::create_dir_all(&self.download_dir).await?;
        let partial = self.download_dir.join(format!(
            ".{output_prefix}.{}.part",
            uuid::Uuid::new_v4().simple()
        ));
        let saved = match write_body(response, &partial).await {
            Ok(written) => tokio::fs::rename(&partial, &target).await.map(|()| written).map_err(FetchError::Io),
            Err(e) => Err(e),
        };
        let written = match saved {
            Ok(written) => written,
            Err(e) => {
                if let Err(remove_err) = tokio::fs::remove_file(&partial).await {
                    tracing::debug!(
                        path = %partial.display(),
                        error = %remove_err,
                        "Partial download not removed",
                    );
                }
                return Err(e);
            }
        };

        tracing::info!(prompt_id = %prompt_id, bytes = written, "Output saved");
        Ok(target)
    }
}

/// Stream `response` into a new file at `path`; returns the bytes written.
async fn write_body(response: reqwest::Response, path: &Path) -> Result<usize, FetchError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut body = response.bytes_stream();
    let mut written = 0usize;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| FetchError::Download(ComfyUIApiError::Request(e)))?;
        written += chunk.len();
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(written)
}
