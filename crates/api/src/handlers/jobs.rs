use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use faceswap_core::error::CoreError;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub prompt_id: String,
    pub message: &'static str,
}

/// DELETE /jobs/{job_id}
///
/// Cancels a running job. The status record turns FAILED once the job's
/// task has stopped.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<(StatusCode, Json<CancelResponse>)> {
    if !state.engine.cancel(&job_id).await {
        return Err(AppError::Core(CoreError::NotFound {
            entity: "Running job",
            id: job_id,
        }));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            prompt_id: job_id,
            message: "Cancellation requested",
        }),
    ))
}
