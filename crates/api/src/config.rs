use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use faceswap_comfyui::client::ComfyUIEndpoint;
use faceswap_comfyui::monitor::MonitorConfig;
use faceswap_comfyui::reconnect::RetryPolicy;
use faceswap_core::error::CoreError;
use faceswap_core::workflow::{PatchTarget, PatchTargets};

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development against a
/// ComfyUI instance on the same host.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `120`). Streaming
    /// responses are not bounded by it once headers are sent.
    pub request_timeout_secs: u64,

    /// ComfyUI HTTP base URL; the WebSocket URL is derived from it.
    pub comfyui_url: String,
    /// Sent verbatim as the `Cookie` header to ComfyUI.
    pub comfyui_auth_cookie: Option<String>,
    /// Sent as `Authorization: Bearer ...` to ComfyUI.
    pub comfyui_auth_token: Option<String>,

    pub workflow_template_path: PathBuf,
    pub download_dir: PathBuf,
    pub video_node_id: String,
    pub image_node_id: String,
    pub output_node_id: String,

    pub ws_open_timeout_secs: u64,
    pub ws_recv_timeout_secs: u64,
    pub ws_idle_limit: u32,
    pub ws_max_retries: u32,
    pub ws_retry_base_delay_secs: u64,
    pub ws_max_concurrency: usize,

    /// Timeout for downloading `video_url` / `image_url` inputs.
    pub remote_input_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                    |
    /// |-----------------------------|----------------------------|
    /// | `HOST`                      | `0.0.0.0`                  |
    /// | `PORT`                      | `8000`                     |
    /// | `CORS_ORIGINS`              | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`      | `120`                      |
    /// | `COMFYUI_URL`               | `http://127.0.0.1:8188`    |
    /// | `COMFYUI_AUTH_COOKIE`       | unset                      |
    /// | `COMFYUI_AUTH_TOKEN`        | unset                      |
    /// | `WORKFLOW_TEMPLATE_PATH`    | `workflows/faceswap.json`  |
    /// | `DOWNLOAD_DIR`              | `downloads`                |
    /// | `VIDEO_NODE_ID`             | `8`                        |
    /// | `IMAGE_NODE_ID`             | `10`                       |
    /// | `OUTPUT_NODE_ID`            | `9`                        |
    /// | `WS_OPEN_TIMEOUT`           | `60`                       |
    /// | `WS_RECV_TIMEOUT`           | `5`                        |
    /// | `WS_IDLE_LIMIT`             | `60`                       |
    /// | `WS_MAX_RETRIES`            | `3`                        |
    /// | `WS_RETRY_BASE_DELAY`       | `2`                        |
    /// | `WS_MAX_CONCURRENCY`        | `10`                       |
    /// | `REMOTE_INPUT_TIMEOUT_SECS` | `60`                       |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let text = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let cors_origins: Vec<String> = text("CORS_ORIGINS", "http://localhost:5173")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            host: text("HOST", "0.0.0.0"),
            port: parse_var(&lookup, "PORT", 8000)?,
            cors_origins,
            request_timeout_secs: parse_var(&lookup, "REQUEST_TIMEOUT_SECS", 120)?,
            comfyui_url: text("COMFYUI_URL", "http://127.0.0.1:8188"),
            comfyui_auth_cookie: optional("COMFYUI_AUTH_COOKIE"),
            comfyui_auth_token: optional("COMFYUI_AUTH_TOKEN"),
            workflow_template_path: text("WORKFLOW_TEMPLATE_PATH", "workflows/faceswap.json").into(),
            download_dir: text("DOWNLOAD_DIR", "downloads").into(),
            video_node_id: text("VIDEO_NODE_ID", "8"),
            image_node_id: text("IMAGE_NODE_ID", "10"),
            output_node_id: text("OUTPUT_NODE_ID", "9"),
            ws_open_timeout_secs: parse_var(&lookup, "WS_OPEN_TIMEOUT", 60)?,
            ws_recv_timeout_secs: parse_var(&lookup, "WS_RECV_TIMEOUT", 5)?,
            ws_idle_limit: parse_var(&lookup, "WS_IDLE_LIMIT", 60)?,
            ws_max_retries: parse_var(&lookup, "WS_MAX_RETRIES", 3)?,
            ws_retry_base_delay_secs: parse_var(&lookup, "WS_RETRY_BASE_DELAY", 2)?,
            ws_max_concurrency: parse_var(&lookup, "WS_MAX_CONCURRENCY", 10)?,
            remote_input_timeout_secs: parse_var(&lookup, "REMOTE_INPUT_TIMEOUT_SECS", 60)?,
        })
    }

    /// ComfyUI addresses plus the configured auth headers.
    pub fn endpoint(&self) -> ComfyUIEndpoint {
        let mut endpoint = ComfyUIEndpoint::from_base_url(&self.comfyui_url);
        if let Some(cookie) = &self.comfyui_auth_cookie {
            endpoint = endpoint.with_header("Cookie", cookie.clone());
        }
        if let Some(token) = &self.comfyui_auth_token {
            endpoint = endpoint.with_header("Authorization", format!("Bearer {token}"));
        }
        endpoint
    }

    pub fn patch_targets(&self) -> PatchTargets {
        let defaults = PatchTargets::default();
        PatchTargets {
            video: PatchTarget::new(self.video_node_id.clone(), defaults.video.input),
            image: PatchTarget::new(self.image_node_id.clone(), defaults.image.input),
            output_prefix: PatchTarget::new(
                self.output_node_id.clone(),
                defaults.output_prefix.input,
            ),
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            recv_timeout: Duration::from_secs(self.ws_recv_timeout_secs),
            idle_limit: self.ws_idle_limit,
            retry: RetryPolicy {
                max_attempts: self.ws_max_retries,
                initial_delay: Duration::from_secs(self.ws_retry_base_delay_secs),
                ..RetryPolicy::default()
            },
        }
    }

    pub fn ws_open_timeout(&self) -> Duration {
        Duration::from_secs(self.ws_open_timeout_secs)
    }

    pub fn remote_input_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_input_timeout_secs)
    }
}

fn parse_var<T>(lookup: impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, CoreError>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| CoreError::Configuration(format!("{key} has invalid value '{raw}': {e}"))),
    }
}
