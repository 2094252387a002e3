use axum::extract::{Path, State};
use axum::Json;

use faceswap_core::error::CoreError;
use faceswap_core::status::StatusRecord;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// GET /status/{job_id}
///
/// Returns the job's status record. Jobs unknown to this process are
/// looked up in ComfyUI history.
pub async fn get_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<StatusRecord>> {
    state
        .engine
        .status(&job_id)
        .await
        .map(Json)
        .ok_or_else(|| {
            AppError::Core(CoreError::NotFound {
                entity: "Job",
                id: job_id,
            })
        })
}
