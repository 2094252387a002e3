use std::time::Duration;

use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use serde_json::{json, Value};

use crate::state::AppState;

/// How long the ComfyUI probe may take.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// `healthy`, `unhealthy` (non-200 answer) or `unreachable`.
    pub comfyui_status: &'static str,
    /// `valid` when the workflow template loads.
    pub workflow_status: &'static str,
    pub server_address: String,
    pub workflow_path: String,
    pub download_dir: String,
}

/// GET /health -- returns service, ComfyUI and workflow template health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let comfyui_status = match state.api.ping(PROBE_TIMEOUT).await {
        Ok(200) => "healthy",
        Ok(_) => "unhealthy",
        Err(e) => {
            tracing::debug!(error = %e, "ComfyUI probe failed");
            "unreachable"
        }
    };

    let template_path = &state.config.workflow_template_path;
    let workflow_status = match state.engine.load_template().await {
        Ok(_) => "valid",
        Err(e) => {
            tracing::debug!(error = %e, "Workflow template check failed");
            "invalid"
        }
    };

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        comfyui_status,
        workflow_status,
        server_address: state.config.endpoint().server_address().to_string(),
        workflow_path: template_path.display().to_string(),
        download_dir: state.config.download_dir.display().to_string(),
    })
}

/// GET / -- service description and endpoint list.
async fn service_info() -> Json<Value> {
    Json(json!({
        "message": "ComfyUI Face Swap API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "face_swap_sse": "POST /face-swap (Server-Sent Events, or JSON with return_prompt_id_only=true)",
            "face_swap_ws": "WebSocket /face-swap-ws",
            "status": "GET /status/{job_id}",
            "cancel": "DELETE /jobs/{job_id}",
            "download": "GET /download/{filename}",
            "health": "GET /health",
        },
        "usage": {
            "face_swap_sse": {
                "file_upload": "Use 'video' and 'image' form fields",
                "url_input": "Use 'video_url' and 'image_url' form fields",
                "output_name": "Optional custom output filename prefix",
                "return_prompt_id_only": "Return the prompt id immediately and poll /status",
            },
            "face_swap_ws": {
                "first_frame": {
                    "video_url": "http(s) URL of the video",
                    "image_url": "http(s) URL of the face image",
                    "output_name": "Optional output filename prefix",
                },
            },
        },
    }))
}

/// Mount health and service-info routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health_check))
}
