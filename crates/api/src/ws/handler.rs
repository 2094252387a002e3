use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use faceswap_core::events::JobEvent;
use faceswap_core::naming::{default_output_prefix, validate_file_name, InputKind};

use crate::error::AppError;
use crate::state::AppState;

type Sink = SplitSink<WebSocket, Message>;
type Source = SplitStream<WebSocket>;

/// First frame sent by the caller.
#[derive(Debug, Deserialize)]
pub struct FaceSwapRequest {
    pub video_url: Option<String>,
    pub image_url: Option<String>,
    pub output_name: Option<String>,
}

/// How a session ended before the artifact could be sent.
enum SessionEnd {
    /// The caller went away; nothing more to send.
    Disconnected,
    /// Report this to the caller.
    Failed(String),
}

impl From<AppError> for SessionEnd {
    fn from(err: AppError) -> Self {
        SessionEnd::Failed(err.to_string())
    }
}

/// GET /face-swap-ws
///
/// Upgrades to a WebSocket that runs one job: the caller sends a JSON
/// request frame, receives `{"event", "data"}` frames as the job
/// progresses, then the artifact as a single binary frame.
pub async fn face_swap_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "Face swap WebSocket connected");

    let (mut sink, mut source) = socket.split();

    match run_session(&state, &mut sink, &mut source).await {
        Ok(()) => {}
        Err(SessionEnd::Disconnected) => {
            tracing::info!(conn_id = %conn_id, "Face swap WebSocket client disconnected");
            return;
        }
        Err(SessionEnd::Failed(detail)) => {
            tracing::warn!(conn_id = %conn_id, error = %detail, "Face swap WebSocket session failed");
            let _ = send_event(&mut sink, &JobEvent::error(detail)).await;
        }
    }

    let _ = sink.close().await;
    tracing::info!(conn_id = %conn_id, "Face swap WebSocket closed");
}

async fn run_session(state: &AppState, sink: &mut Sink, source: &mut Source) -> Result<(), SessionEnd> {
    let timeout = Duration::from_secs(state.config.request_timeout_secs);
    let request = tokio::time::timeout(timeout, read_request(source))
        .await
        .map_err(|_| SessionEnd::Failed("No request received".into()))??;

    let (Some(video_url), Some(image_url)) = (request.video_url, request.image_url) else {
        return Err(SessionEnd::Failed("Must provide video_url and image_url".into()));
    };
    let output_prefix = match request.output_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => validate_file_name(name).map_err(AppError::from)?.to_string(),
        _ => {
            let unique = uuid::Uuid::new_v4().simple().to_string();
            default_output_prefix(chrono::Utc::now(), &unique[..8])
        }
    };

    let video = state.inputs.fetch(InputKind::Video, &video_url).await?;
    let image = state.inputs.fetch(InputKind::Image, &image_url).await?;
    let job = state
        .engine
        .submit(video, image, &output_prefix)
        .await
        .map_err(AppError::from)?;

    // Dropping `events` on an early return cancels the job.
    let mut events = state.engine.stream(job).await;
    let mut artifact = None;

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                if let JobEvent::Completed { filename, .. } = &event {
                    artifact = Some(filename.clone());
                }
                send_event(sink, &event).await?;
            }
            incoming = source.next() => match incoming {
                None | Some(Ok(Message::Close(_))) | Some(Err(_)) => {
                    return Err(SessionEnd::Disconnected);
                }
                Some(Ok(_)) => {}
            },
        }
    }

    if let Some(filename) = artifact {
        let path = state.engine.download_dir().join(&filename);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| SessionEnd::Failed(format!("Failed to read output {filename}: {e}")))?;
        sink.send(Message::Binary(bytes.into()))
            .await
            .map_err(|_| SessionEnd::Disconnected)?;
    }

    Ok(())
}

/// Wait for the request frame, skipping control frames.
async fn read_request(source: &mut Source) -> Result<FaceSwapRequest, SessionEnd> {
    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => {
                return serde_json::from_str(text.as_str())
                    .map_err(|e| SessionEnd::Failed(format!("Invalid request: {e}")));
            }
            Ok(Message::Binary(_)) => {
                return Err(SessionEnd::Failed("Expected a JSON text frame".into()));
            }
            Ok(Message::Close(_)) | Err(_) => return Err(SessionEnd::Disconnected),
            Ok(_) => {}
        }
    }
    Err(SessionEnd::Disconnected)
}

async fn send_event(sink: &mut Sink, event: &JobEvent) -> Result<(), SessionEnd> {
    sink.send(Message::Text(event.to_frame().to_string().into()))
        .await
        .map_err(|_| SessionEnd::Disconnected)
}
