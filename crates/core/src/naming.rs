//! File naming rules for inputs, outputs and downloads.

use std::path::Path;

use crate::error::CoreError;
use crate::types::Timestamp;

/// The two inputs of a face-swap job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Video,
    Image,
}

impl InputKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InputKind::Video => "video",
            InputKind::Image => "image",
        }
    }

    /// Extension used when the source name has none.
    pub fn default_extension(self) -> &'static str {
        match self {
            InputKind::Video => "mp4",
            InputKind::Image => "png",
        }
    }
}

/// Name an input is uploaded to ComfyUI under: `input_{kind}_{unique}.{ext}`,
/// keeping the extension of `source_name` when it has one.
pub fn staged_input_name(kind: InputKind, source_name: Option<&str>, unique: &str) -> String {
    let extension = source_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| kind.default_extension().to_string());
    format!("input_{}_{unique}.{extension}", kind.as_str())
}

/// Output prefix used when the caller gives none.
pub fn default_output_prefix(now: Timestamp, unique: &str) -> String {
    format!("faceswap_{}_{unique}", now.format("%Y%m%d_%H%M%S"))
}

/// Check a caller-supplied output name or download filename.
///
/// Rejects empty names, path separators, `..` and control characters so
/// the name can only address a file directly inside the download
/// directory.
pub fn validate_file_name(name: &str) -> Result<&str, CoreError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CoreError::Validation("File name must not be empty".into()));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(CoreError::Validation(
            "File name must not contain path separators".into(),
        ));
    }
    if name.contains("..") {
        return Err(CoreError::Validation("File name must not contain '..'".into()));
    }
    if name.chars().any(char::is_control) {
        return Err(CoreError::Validation(
            "File name must not contain control characters".into(),
        ));
    }
    Ok(name)
}
