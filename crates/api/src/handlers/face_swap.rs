//! `POST /face-swap`: accept a job and either stream its progress over
//! Server-Sent Events or return its prompt id for polling.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Multipart, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{stream, Stream, StreamExt};
use serde::Serialize;

use faceswap_comfyui::submit::{InputFile, SubmittedJob};
use faceswap_core::events::JobEvent;
use faceswap_core::naming::{default_output_prefix, staged_input_name, validate_file_name, InputKind};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub const MISSING_INPUTS: &str =
    "Must provide either video file or video_url, and either image file or image_url";

const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// An uploaded file part.
#[derive(Debug)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Parsed `multipart/form-data` body of a face-swap request.
#[derive(Debug, Default)]
pub struct FaceSwapForm {
    pub video: Option<Upload>,
    pub image: Option<Upload>,
    pub video_url: Option<String>,
    pub image_url: Option<String>,
    pub output_name: Option<String>,
    pub return_prompt_id_only: bool,
}

impl FaceSwapForm {
    pub async fn from_multipart(mut multipart: Multipart) -> AppResult<Self> {
        let mut form = FaceSwapForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "video" | "image" => {
                    let filename = field.file_name().unwrap_or_default().to_string();
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| AppError::BadRequest(e.to_string()))?;
                    // Browsers send an empty part for an unset file input.
                    if bytes.is_empty() {
                        continue;
                    }
                    let upload = Some(Upload {
                        filename,
                        bytes: bytes.to_vec(),
                    });
                    if name == "video" {
                        form.video = upload;
                    } else {
                        form.image = upload;
                    }
                }
                "video_url" | "image_url" | "output_name" | "return_prompt_id_only" => {
                    let value = field
                        .text()
                        .await
                        .map_err(|e| AppError::BadRequest(e.to_string()))?;
                    let value = value.trim().to_string();
                    match name.as_str() {
                        "return_prompt_id_only" => form.return_prompt_id_only = parse_flag(&value)?,
                        _ if value.is_empty() => {}
                        "video_url" => form.video_url = Some(value),
                        "image_url" => form.image_url = Some(value),
                        _ => form.output_name = Some(value),
                    }
                }
                other => {
                    tracing::debug!(field = %other, "Ignoring unknown form field");
                }
            }
        }

        Ok(form)
    }

    pub fn has_inputs(&self) -> bool {
        (self.video.is_some() || self.video_url.is_some())
            && (self.image.is_some() || self.image_url.is_some())
    }
}

fn parse_flag(value: &str) -> AppResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "" | "false" | "0" | "no" | "off" => Ok(false),
        "true" | "1" | "yes" | "on" => Ok(true),
        other => Err(AppError::BadRequest(format!(
            "return_prompt_id_only must be true or false, got '{other}'"
        ))),
    }
}

/// Response body in prompt-id mode.
#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    pub prompt_id: String,
    pub status: &'static str,
    pub message: String,
    pub status_url: String,
    pub output_prefix: String,
}

/// POST /face-swap
pub async fn face_swap(State(state): State<AppState>, multipart: Multipart) -> Response {
    let form = match FaceSwapForm::from_multipart(multipart).await {
        Ok(form) => form,
        Err(e) => return e.into_response(),
    };
    let prompt_id_only = form.return_prompt_id_only;

    if !form.has_inputs() {
        if prompt_id_only {
            return AppError::BadRequest(MISSING_INPUTS.into()).into_response();
        }
        return sse_error(MISSING_INPUTS.into());
    }

    match submit(&state, form).await {
        Ok(job) if prompt_id_only => {
            let response = QueuedResponse {
                prompt_id: job.prompt_id.clone(),
                status: "QUEUED",
                message: "Face swap workflow queued successfully. Use /status/{prompt_id} to check progress."
                    .into(),
                status_url: format!("/status/{}", job.prompt_id),
                output_prefix: job.output_prefix.clone(),
            };
            state.engine.spawn_background(job).await;
            Json(response).into_response()
        }
        Ok(job) => sse_response(state.engine.stream(job).await),
        Err(e) if prompt_id_only => e.into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Face swap request failed before queueing");
            sse_error(format!("File processing failed: {e}"))
        }
    }
}

/// Resolve inputs and queue the job.
async fn submit(state: &AppState, form: FaceSwapForm) -> AppResult<SubmittedJob> {
    let output_prefix = match form.output_name.as_deref() {
        Some(name) => validate_file_name(name)?.to_string(),
        None => default_output_prefix(chrono::Utc::now(), &short_id()),
    };

    let video = resolve_input(state, InputKind::Video, form.video, form.video_url).await?;
    let image = resolve_input(state, InputKind::Image, form.image, form.image_url).await?;

    Ok(state.engine.submit(video, image, &output_prefix).await?)
}

async fn resolve_input(
    state: &AppState,
    kind: InputKind,
    upload: Option<Upload>,
    url: Option<String>,
) -> AppResult<InputFile> {
    match (upload, url) {
        (Some(upload), _) => {
            let unique = uuid::Uuid::new_v4().to_string();
            let filename = staged_input_name(kind, Some(&upload.filename), &unique);
            Ok(InputFile::new(filename, upload.bytes))
        }
        (None, Some(url)) => state.inputs.fetch(kind, &url).await,
        (None, None) => Err(AppError::BadRequest(MISSING_INPUTS.into())),
    }
}

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Encode a job event as an SSE event.
pub fn to_sse_event(event: &JobEvent) -> Event {
    Event::default().event(event.name()).data(event.data().to_string())
}

fn sse_response<S>(events: S) -> Response
where
    S: Stream<Item = JobEvent> + Send + 'static,
{
    let stream = events.map(|event| Ok::<_, Infallible>(to_sse_event(&event)));
    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE).text("keep-alive"))
        .into_response()
}

/// A stream consisting of a single `error` event.
fn sse_error(detail: String) -> Response {
    sse_response(stream::iter([JobEvent::error(detail)]))
}
