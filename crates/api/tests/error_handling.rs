//! Tests for `AppError` → HTTP response mapping.
//!
//! These call `IntoResponse` directly on `AppError` values; no server is
//! involved.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use http_body_util::BodyExt;

use faceswap_api::error::AppError;
use faceswap_comfyui::api::ComfyUIApiError;
use faceswap_comfyui::fetch::FetchError;
use faceswap_comfyui::submit::SubmitError;
use faceswap_core::error::CoreError;

/// Helper: convert an `AppError` into its status code and parsed JSON body.
async fn error_to_response(err: AppError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

#[tokio::test]
async fn not_found_error_returns_404() {
    let err = AppError::Core(CoreError::NotFound {
        entity: "Job",
        id: "p-42".into(),
    });

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
    assert_eq!(json["error"], "Job with id p-42 not found");
}

#[tokio::test]
async fn validation_error_returns_400_with_message() {
    let err = AppError::Core(CoreError::Validation("Invalid file name: a/b".into()));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert_eq!(json["error"], "Invalid file name: a/b");
}

#[tokio::test]
async fn configuration_error_hides_details() {
    let err = AppError::Core(CoreError::Configuration(
        "Workflow template /etc/secret.json not found".into(),
    ));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "CONFIGURATION_ERROR");
    assert_eq!(json["error"], "Service is misconfigured");
}

#[tokio::test]
async fn bad_request_error_returns_400() {
    let err = AppError::BadRequest("Must provide both video and image".into());

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");
    assert_eq!(json["error"], "Must provide both video and image");
}

#[tokio::test]
async fn upstream_error_returns_502() {
    let err = AppError::Upstream("ComfyUI returned 500".into());

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["code"], "UPSTREAM_ERROR");
    assert_eq!(json["error"], "ComfyUI returned 500");
}

#[tokio::test]
async fn internal_errors_are_sanitized() {
    for err in [
        AppError::InternalError("disk full at /var/lib".into()),
        AppError::Core(CoreError::Internal("lock poisoned".into())),
    ] {
        let (status, json) = error_to_response(err).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["code"], "INTERNAL_ERROR");
        assert_eq!(json["error"], "An internal error occurred");
    }
}

#[tokio::test]
async fn submit_errors_map_by_cause() {
    let (status, _) = error_to_response(AppError::from(SubmitError::Configuration(
        CoreError::Configuration("bad template".into()),
    )))
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let (status, json) = error_to_response(AppError::from(SubmitError::Submission(
        "No prompt_id in response".into(),
    )))
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(json["error"].as_str().unwrap().contains("No prompt_id"));
}

#[tokio::test]
async fn fetch_errors_map_by_cause() {
    let (status, _) = error_to_response(AppError::from(FetchError::Download(
        ComfyUIApiError::ApiError {
            status: 404,
            body: "missing".into(),
        },
    )))
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let (status, json) = error_to_response(AppError::from(FetchError::Io(io))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "INTERNAL_ERROR");
}
