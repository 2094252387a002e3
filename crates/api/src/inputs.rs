//! Job inputs supplied by URL.

use std::time::Duration;

use faceswap_comfyui::submit::InputFile;
use faceswap_core::naming::{staged_input_name, InputKind};

use crate::error::{AppError, AppResult};

/// Downloads `video_url` / `image_url` inputs.
#[derive(Debug, Clone)]
pub struct RemoteInputs {
    client: reqwest::Client,
    timeout: Duration,
}

impl RemoteInputs {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    /// Fetch `url` into memory under a staged input name.
    ///
    /// Only `http` and `https` URLs are accepted; local paths are not.
    pub async fn fetch(&self, kind: InputKind, url: &str) -> AppResult<InputFile> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| AppError::BadRequest(format!("Invalid {} URL '{url}': {e}", kind.as_str())))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::BadRequest(format!(
                "Unsupported {} URL scheme '{}'",
                kind.as_str(),
                parsed.scheme()
            )));
        }

        tracing::info!(kind = kind.as_str(), url = %url, "Downloading input");
        let response = self
            .client
            .get(parsed.clone())
            .timeout(self.timeout)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| AppError::BadRequest(format!("Failed to download from URL: {e}")))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to download from URL: {e}")))?;

        let unique = uuid::Uuid::new_v4().to_string();
        let filename = staged_input_name(kind, Some(parsed.path()), &unique);
        Ok(InputFile::new(filename, bytes.to_vec()))
    }
}
