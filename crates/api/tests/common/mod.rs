#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use futures::StreamExt;
use http_body_util::BodyExt;
use serde_json::json;
use tempfile::TempDir;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use faceswap_api::config::ServerConfig;
use faceswap_api::routes;
use faceswap_api::state::AppState;
use faceswap_comfyui::client::{ComfyUIClientError, MessageStream, StreamConnector};

pub const PROMPT_ID: &str = "p-1";

pub const TEMPLATE: &str = r#"{
    "8": {"class_type": "VHS_LoadVideo", "inputs": {"video": ""}, "_meta": {"title": "Load Video"}},
    "9": {"class_type": "VHS_VideoCombine", "inputs": {"filename_prefix": ""}, "_meta": {"title": "Video Combine"}},
    "10": {"class_type": "LoadImage", "inputs": {"image": ""}},
    "11": {"class_type": "ReActorFaceSwap", "inputs": {}, "_meta": {"title": "ReActor Face Swap"}}
}"#;

// ---------------------------------------------------------------------------
// Scripted ComfyUI event stream
// ---------------------------------------------------------------------------

/// What one connection attempt produces.
pub enum Script {
    /// Handshake fails.
    Fail,
    /// Deliver frames, then stay silent.
    Hang(Vec<String>),
}

/// Stands in for the ComfyUI WebSocket, one script entry per connection.
pub struct FakeConnector {
    scripts: Mutex<VecDeque<Script>>,
    connects: AtomicUsize,
}

impl FakeConnector {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            connects: AtomicUsize::new(0),
        })
    }

    /// A connection that runs `PROMPT_ID` to completion.
    pub fn completing() -> Arc<Self> {
        Self::new(vec![Script::Hang(vec![
            executing("8"),
            progress(1, 2),
            executing("11"),
            progress(2, 2),
            executing_done(),
        ])])
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamConnector for FakeConnector {
    async fn connect(&self, _client_id: &str) -> Result<MessageStream, ComfyUIClientError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Hang(frames)) => Ok(futures::stream::iter(frames.into_iter().map(Ok))
                .chain(futures::stream::pending())
                .boxed()),
            Some(Script::Fail) | None => {
                Err(ComfyUIClientError::Connection("connection refused".into()))
            }
        }
    }
}

pub fn executing(node: &str) -> String {
    json!({"type": "executing", "data": {"node": node, "prompt_id": PROMPT_ID}}).to_string()
}

pub fn executing_done() -> String {
    json!({"type": "executing", "data": {"node": null, "prompt_id": PROMPT_ID}}).to_string()
}

pub fn progress(value: u32, max: u32) -> String {
    json!({"type": "progress", "data": {"value": value, "max": max, "prompt_id": PROMPT_ID}})
        .to_string()
}

pub fn status(value: &str) -> String {
    json!({"type": "status", "data": {"status": value}}).to_string()
}

// ---------------------------------------------------------------------------
// Test application
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    /// Mock ComfyUI HTTP server.
    pub comfyui: MockServer,
    pub dir: TempDir,
}

impl TestApp {
    pub fn download_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("downloads")
    }

    pub fn template_path(&self) -> std::path::PathBuf {
        self.dir.path().join("faceswap.json")
    }
}

/// Build a test `ServerConfig` pointing at the mock ComfyUI server and a
/// temporary template and download directory.
pub fn test_config(comfyui_url: &str, dir: &TempDir, overrides: &[(&str, &str)]) -> ServerConfig {
    let mut vars: HashMap<String, String> = [
        ("HOST", "127.0.0.1".to_string()),
        ("PORT", "0".to_string()),
        ("COMFYUI_URL", comfyui_url.to_string()),
        (
            "WORKFLOW_TEMPLATE_PATH",
            dir.path().join("faceswap.json").display().to_string(),
        ),
        ("DOWNLOAD_DIR", dir.path().join("downloads").display().to_string()),
        ("WS_RECV_TIMEOUT", "1".to_string()),
        ("WS_IDLE_LIMIT", "30".to_string()),
        ("WS_RETRY_BASE_DELAY", "0".to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    for (key, value) in overrides {
        vars.insert(key.to_string(), value.to_string());
    }
    ServerConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

/// Build the full application router with all middleware layers.
///
/// This mirrors the router construction in `main.rs` so integration tests
/// exercise the same middleware stack (CORS, request ID, timeout, tracing,
/// panic recovery) that production uses.
pub async fn build_test_app(connector: Arc<FakeConnector>) -> TestApp {
    build_test_app_with(connector, &[]).await
}

pub async fn build_test_app_with(connector: Arc<FakeConnector>, overrides: &[(&str, &str)]) -> TestApp {
    let comfyui = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("faceswap.json"), TEMPLATE).unwrap();

    let config = test_config(&comfyui.uri(), &dir, overrides);
    let state = AppState::new(config, connector).unwrap();

    let cors = CorsLayer::new()
        .allow_origin(["http://localhost:5173".parse().unwrap()])
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600));

    let request_id_header = HeaderName::from_static("x-request-id");

    let router = Router::new()
        .merge(routes::health::router())
        .merge(routes::api_routes())
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(cors)
        .with_state(state.clone());

    TestApp {
        router,
        state,
        comfyui,
        dir,
    }
}

// ---------------------------------------------------------------------------
// ComfyUI HTTP mocks
// ---------------------------------------------------------------------------

/// Accept uploads and queue `PROMPT_ID`.
pub async fn mock_submission(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/upload/image"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"name": "uploaded.bin", "subfolder": "", "type": "input"})),
        )
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"prompt_id": PROMPT_ID, "number": 1, "node_errors": {}})),
        )
        .mount(server)
        .await;
}

/// History for `PROMPT_ID` with one finished video, served by `/view`.
pub async fn mock_finished_output(server: &MockServer, bytes: &[u8]) {
    Mock::given(method("GET"))
        .and(path(format!("/history/{PROMPT_ID}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            PROMPT_ID: {
                "outputs": {"9": {"gifs": [
                    {"filename": "result_00001.mp4", "subfolder": "", "type": "output", "format": "video/h264-mp4"}
                ]}},
                "status": {"status_str": "success", "completed": true, "messages": []}
            }
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/view"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.to_vec()))
        .mount(server)
        .await;
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn delete(app: Router, uri: &str) -> Response {
    app.oneshot(
        Request::builder()
            .method(Method::DELETE)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

/// One multipart field: `(name, Some(filename), bytes)` for files,
/// `(name, None, bytes)` for text.
pub type Field<'a> = (&'a str, Option<&'a str>, &'a [u8]);

pub async fn post_multipart(app: Router, uri: &str, fields: &[Field<'_>]) -> Response {
    const BOUNDARY: &str = "faceswap-test-boundary";
    let mut body = Vec::new();
    for (name, filename, bytes) in fields {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match filename {
            Some(filename) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
            }
            None => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
            }
        }
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// `(event, data)` pairs of a complete SSE body.
pub async fn sse_events(response: Response) -> Vec<(String, serde_json::Value)> {
    let text = String::from_utf8(body_bytes(response).await).unwrap();
    text.split("\n\n")
        .filter_map(|block| {
            let mut event = None;
            let mut data = None;
            for line in block.lines() {
                if let Some(value) = line.strip_prefix("event: ") {
                    event = Some(value.to_string());
                } else if let Some(value) = line.strip_prefix("data: ") {
                    data = serde_json::from_str(value).ok();
                }
            }
            Some((event?, data?))
        })
        .collect()
}

/// Poll the ledger until the job reaches a terminal status.
pub async fn wait_for_terminal(state: &AppState, prompt_id: &str) -> faceswap_core::status::StatusRecord {
    for _ in 0..200 {
        if let Some(record) = state.ledger.get(prompt_id).await {
            if record.status.is_terminal() {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {prompt_id} did not finish");
}
