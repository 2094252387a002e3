pub mod health;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Largest accepted `POST /face-swap` body (video plus image).
pub const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

/// Build the job route tree.
///
/// Route hierarchy:
///
/// ```text
/// /face-swap                 submit, SSE progress or prompt id (POST)
/// /face-swap-ws              submit over WebSocket
/// /status/{job_id}           job status (GET)
/// /jobs/{job_id}             cancel a running job (DELETE)
/// /download/{filename}       retrieved artifact (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/face-swap",
            post(handlers::face_swap::face_swap).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/face-swap-ws", get(ws::face_swap_ws))
        .route("/status/{job_id}", get(handlers::status::get_status))
        .route("/jobs/{job_id}", delete(handlers::jobs::cancel_job))
        .route("/download/{filename}", get(handlers::download::download_file))
}
