//! Integration tests against a mock generation server.
//!
//! Spins up a minimal axum app on an ephemeral port standing in for the
//! ComfyUI HTTP surface, then exercises submission, history polling,
//! artifact download, and the readiness probe against it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use axum::extract::{Path, Query};
use axum::http::{header, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use genbridge_comfyui::api::{ArtifactError, ComfyUIApi, ComfyUIApiError};
use genbridge_comfyui::poll::{wait_for_artifact, JobOutcome};
use genbridge_comfyui::probe::wait_until_ready;
use genbridge_core::outputs::{ArtifactKind, OutputDescriptor};
use tokio_util::sync::CancellationToken;

/// Bind the app to an ephemeral port and return its base URL.
async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn descriptor(filename: &str) -> OutputDescriptor {
    OutputDescriptor {
        filename: filename.to_string(),
        subfolder: String::new(),
        storage_type: "output".to_string(),
    }
}

fn preferred(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_returns_prompt_id() {
    let app = Router::new().route(
        "/prompt",
        post(|| async { Json(json!({"prompt_id": "p-42", "number": 3})) }),
    );
    let api = ComfyUIApi::new(serve(app).await);

    let workflow = json!({"3": {"class_type": "KSampler", "inputs": {}}});
    let response = api.submit_workflow(&workflow, "client-1").await.unwrap();
    assert_eq!(response.prompt_id, "p-42");
    assert_eq!(response.number, Some(3));
}

#[tokio::test]
async fn submit_rejection_is_a_hard_failure() {
    let app = Router::new().route(
        "/prompt",
        post(|| async { (StatusCode::BAD_REQUEST, "invalid prompt") }),
    );
    let api = ComfyUIApi::new(serve(app).await);

    let err = api
        .submit_workflow(&json!({"1": {}}), "client-1")
        .await
        .unwrap_err();
    assert_matches!(err, ComfyUIApiError::ApiError { status: 400, body } => {
        assert_eq!(body, "invalid prompt");
    });
}

#[tokio::test]
async fn submit_without_prompt_id_fails() {
    let app = Router::new().route("/prompt", post(|| async { Json(json!({"number": 1})) }));
    let api = ComfyUIApi::new(serve(app).await);

    let result = api.submit_workflow(&json!({"1": {}}), "client-1").await;
    assert_matches!(result, Err(ComfyUIApiError::Request(_)));
}

// ---------------------------------------------------------------------------
// Artifact download
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fetch_view_returns_bytes_and_content_type() {
    let app = Router::new().route(
        "/view",
        get(|Query(params): Query<HashMap<String, String>>| async move {
            assert_eq!(params.get("filename").unwrap(), "out.png");
            assert_eq!(params.get("type").unwrap(), "output");
            (
                [(header::CONTENT_TYPE, "image/png")],
                vec![0xABu8; 2048],
            )
        }),
    );
    let api = ComfyUIApi::new(serve(app).await);

    let (bytes, content_type) = api
        .fetch_view(&descriptor("out.png"), ArtifactKind::Image)
        .await
        .unwrap();
    assert_eq!(bytes.len(), 2048);
    assert_eq!(content_type, "image/png");
}

#[tokio::test]
async fn fetch_view_passes_subfolder_when_present() {
    let app = Router::new().route(
        "/view",
        get(|Query(params): Query<HashMap<String, String>>| async move {
            assert_eq!(params.get("subfolder").unwrap(), "batch1");
            ([(header::CONTENT_TYPE, "image/png")], vec![1u8; 2048])
        }),
    );
    let api = ComfyUIApi::new(serve(app).await);

    let mut with_subfolder = descriptor("out.png");
    with_subfolder.subfolder = "batch1".to_string();
    api.fetch_view(&with_subfolder, ArtifactKind::Image)
        .await
        .unwrap();
}

#[tokio::test]
async fn fetch_view_rejects_undersized_body() {
    let app = Router::new().route(
        "/view",
        get(|| async { ([(header::CONTENT_TYPE, "image/png")], vec![1u8; 12]) }),
    );
    let api = ComfyUIApi::new(serve(app).await);

    let err = api
        .fetch_view(&descriptor("out.png"), ArtifactKind::Image)
        .await
        .unwrap_err();
    assert_matches!(err, ArtifactError::TooSmall { bytes: 12 });
}

#[tokio::test]
async fn fetch_view_reports_http_status() {
    let app = Router::new().route("/view", get(|| async { StatusCode::NOT_FOUND }));
    let api = ComfyUIApi::new(serve(app).await);

    let err = api
        .fetch_view(&descriptor("gone.png"), ArtifactKind::Image)
        .await
        .unwrap_err();
    assert_matches!(err, ArtifactError::Http { status: 404 });
}

#[tokio::test]
async fn fetch_view_falls_back_on_foreign_content_type() {
    let app = Router::new().route(
        "/view",
        get(|| async { ([(header::CONTENT_TYPE, "text/html")], vec![1u8; 2048]) }),
    );
    let api = ComfyUIApi::new(serve(app).await);

    let (_, content_type) = api
        .fetch_view(&descriptor("out.png"), ArtifactKind::Image)
        .await
        .unwrap();
    assert_eq!(content_type, "image/png");
}

#[tokio::test]
async fn fetch_view_requires_a_filename() {
    // No server needed: the descriptor is rejected before any request.
    let api = ComfyUIApi::new("http://127.0.0.1:9".to_string());
    let err = api
        .fetch_view(&descriptor(""), ArtifactKind::Image)
        .await
        .unwrap_err();
    assert_matches!(err, ArtifactError::MissingFilename { kind: "image" });
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn poll_succeeds_once_outputs_appear() {
    let calls = Arc::new(AtomicUsize::new(0));
    let app = Router::new().route(
        "/history/{id}",
        get({
            let calls = calls.clone();
            move |Path(id): Path<String>| {
                let calls = calls.clone();
                async move {
                    // Invisible for two polls, then complete.
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        return Json(json!({}));
                    }
                    Json(json!({
                        id: {
                            "status": {"status_str": "success"},
                            "outputs": {"9": {"images": [{"filename": "out.png", "type": "output"}]}},
                        }
                    }))
                }
            }
        }),
    );
    let api = ComfyUIApi::new(serve(app).await);

    let outcome = wait_for_artifact(
        &api,
        "p-1",
        &preferred(&["9"]),
        ArtifactKind::Image,
        Duration::from_secs(5),
        Duration::from_millis(20),
    )
    .await;

    assert_matches!(outcome, JobOutcome::Succeeded { descriptor, node_id } => {
        assert_eq!(descriptor.filename, "out.png");
        assert_eq!(node_id, "9");
    });
    assert!(calls.load(Ordering::SeqCst) >= 3);
}

#[tokio::test]
async fn poll_surfaces_execution_error_verbatim() {
    let app = Router::new().route(
        "/history/{id}",
        get(|Path(id): Path<String>| async move {
            Json(json!({
                id: {
                    "status": {"status_str": "error", "messages": [["execution_error", {"node_id": "5"}]]},
                    "outputs": {},
                }
            }))
        }),
    );
    let api = ComfyUIApi::new(serve(app).await);

    let outcome = wait_for_artifact(
        &api,
        "p-1",
        &preferred(&["9"]),
        ArtifactKind::Image,
        Duration::from_secs(5),
        Duration::from_millis(20),
    )
    .await;

    assert_matches!(outcome, JobOutcome::Failed { status } => {
        assert_eq!(status["status_str"], json!("error"));
        assert_eq!(status["messages"][0][1]["node_id"], json!("5"));
    });
}

#[tokio::test]
async fn poll_times_out_when_job_never_appears() {
    let app = Router::new().route("/history/{id}", get(|| async { Json(json!({})) }));
    let api = ComfyUIApi::new(serve(app).await);

    let started = Instant::now();
    let outcome = wait_for_artifact(
        &api,
        "p-lost",
        &preferred(&["9"]),
        ArtifactKind::Image,
        Duration::from_millis(300),
        Duration::from_millis(50),
    )
    .await;
    let elapsed = started.elapsed();

    assert_matches!(outcome, JobOutcome::TimedOut { waited, available_outputs } => {
        assert!(waited >= Duration::from_millis(300));
        assert!(available_outputs.is_none());
    });
    // The deadline is enforced within one poll interval of slack.
    assert!(elapsed < Duration::from_secs(2));
}

#[tokio::test]
async fn poll_treats_server_errors_as_pending_until_timeout() {
    let app = Router::new().route(
        "/history/{id}",
        get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
    );
    let api = ComfyUIApi::new(serve(app).await);

    let outcome = wait_for_artifact(
        &api,
        "p-1",
        &preferred(&["9"]),
        ArtifactKind::Image,
        Duration::from_millis(200),
        Duration::from_millis(50),
    )
    .await;

    assert_matches!(outcome, JobOutcome::TimedOut { .. });
}

#[tokio::test]
async fn timeout_carries_last_seen_outputs() {
    // Outputs exist but never contain the requested kind, so the wait
    // expires with the snapshot attached for diagnosis.
    let app = Router::new().route(
        "/history/{id}",
        get(|Path(id): Path<String>| async move {
            Json(json!({
                id: {
                    "status": {"status_str": "success"},
                    "outputs": {"7": {"latents": [{"filename": "x.latent"}]}},
                }
            }))
        }),
    );
    let api = ComfyUIApi::new(serve(app).await);

    let outcome = wait_for_artifact(
        &api,
        "p-1",
        &preferred(&["9"]),
        ArtifactKind::Image,
        Duration::from_millis(200),
        Duration::from_millis(50),
    )
    .await;

    assert_matches!(outcome, JobOutcome::TimedOut { available_outputs: Some(outputs), .. } => {
        assert!(outputs["7"]["latents"].is_array());
    });
}

// ---------------------------------------------------------------------------
// Readiness probe
// ---------------------------------------------------------------------------

#[tokio::test]
async fn probe_succeeds_against_live_server() {
    let app = Router::new().route("/system_stats", get(|| async { Json(json!({"system": {}})) }));
    let api = ComfyUIApi::new(serve(app).await);

    let cancel = CancellationToken::new();
    assert!(wait_until_ready(&api, 5, Duration::from_millis(10), &cancel).await);
}
