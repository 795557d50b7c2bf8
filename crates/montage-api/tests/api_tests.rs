//! API integration tests against the in-memory store.
#![cfg(unix)]

use std::io::{Cursor, Write};
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use montage_api::{create_router, ApiConfig, AppState};
use montage_store::MemoryStatusStore;
use montage_worker::{JobOrchestrator, WorkerConfig};

const BOUNDARY: &str = "montage-test-boundary";

struct TestApp {
    router: Router,
    store: Arc<MemoryStatusStore>,
    _root: TempDir,
}

impl TestApp {
    fn new(api_key: Option<&str>) -> Self {
        let root = TempDir::new().unwrap();
        let script = root.path().join("process_all.sh");
        std::fs::write(&script, "#!/bin/sh\nprintf montage > result.mp4\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let worker = WorkerConfig {
            temp_dir: root.path().join("temp"),
            output_dir: root.path().join("output"),
            script_path: script,
            ..WorkerConfig::default()
        };
        let store = Arc::new(MemoryStatusStore::new(worker.record_ttl()));
        let orchestrator = JobOrchestrator::new(worker, store.clone()).unwrap();

        let config = ApiConfig {
            api_key: api_key.map(str::to_string),
            ..ApiConfig::default()
        };
        let router = create_router(AppState::new(config, orchestrator), None);

        Self {
            router,
            store,
            _root: root,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>, axum::http::HeaderMap) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec(), headers)
    }

    async fn get_json(&self, uri: &str) -> (StatusCode, Value) {
        let (status, body, _) = self.send(get(uri)).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn wait_terminal(&self, task_id: &str) -> Value {
        for _ in 0..200 {
            let (_, body) = self.get_json(&format!("/task-status/{}", task_id)).await;
            if body["status"] == "success" || body["status"] == "failed" {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("task {} never finished", task_id);
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Build a multipart upload with the given parts.
fn upload(video: Option<(&str, Vec<u8>)>, fade: Option<&str>) -> Request<Body> {
    let mut body = Vec::new();
    let mut file_part = |field: &str, name: &str, data: &[u8]| {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    };
    if let Some((name, data)) = &video {
        file_part("video", *name, data.as_slice());
    }
    file_part("audio", "music.mp3", &b"ID3fake-mp3"[..]);
    if let Some(fade) = fade {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"fade_duration\"\r\n\r\n{fade}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/process-video")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn two_clips() -> Option<(&'static str, Vec<u8>)> {
    Some((
        "clips.zip",
        zip_bytes(&[("001.mp4", b"first"), ("002.mp4", b"second")]),
    ))
}

/// Test health endpoint reports component state.
#[tokio::test]
async fn test_health_endpoint() {
    let app = TestApp::new(None);

    let (status, body) = app.get_json("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["redis"], "ok");
    assert_eq!(body["script_exists"], true);
    assert_eq!(body["api_key_required"], false);
    assert_eq!(body["webhook_configured"], false);
}

/// Health stays 200 when the store is down.
#[tokio::test]
async fn test_health_reports_store_outage() {
    let app = TestApp::new(None);
    app.store.set_offline(true);

    let (status, body) = app.get_json("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["redis"], "error");
    assert_eq!(body["status"], "degraded");
}

/// Test unknown and malformed task ids.
#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let app = TestApp::new(None);

    let (status, body) = app
        .get_json("/task-status/00000000-0000-4000-8000-000000000000")
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Task not found");

    let (status, _) = app.get_json("/task-status/not-a-task").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.get_json("/download/not-a-task").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Test API key enforcement.
#[tokio::test]
async fn test_api_key_required() {
    let app = TestApp::new(Some("s3cret"));
    let uri = "/task-status/00000000-0000-4000-8000-000000000000";

    let (status, _, _) = app.send(get(uri)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let wrong = Request::builder()
        .uri(uri)
        .header("X-API-Key", "guess")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = app.send(wrong).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let right = Request::builder()
        .uri(uri)
        .header("X-API-Key", "s3cret")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = app.send(right).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Health is never behind the key
    let (status, body) = app.get_json("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["api_key_required"], true);
}

/// Test a full submit, poll and download cycle.
#[tokio::test]
async fn test_submit_poll_download() {
    let app = TestApp::new(None);

    let (status, body, _) = app.send(upload(two_clips(), Some("3"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "pending");
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let record = app.wait_terminal(&task_id).await;
    assert_eq!(record["status"], "success", "{record}");
    assert_eq!(record["file_size"], 7);
    assert_eq!(record["task_id"], task_id.as_str());

    let (status, body, headers) = app.send(get(&format!("/download/{}", task_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"montage");
    assert_eq!(headers[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        format!("attachment; filename=\"result_{}.mp4\"", task_id).as_str()
    );
}

/// Failed jobs have nothing to download.
#[tokio::test]
async fn test_download_of_failed_task_is_bad_request() {
    let app = TestApp::new(None);

    let empty = Some(("clips.zip", zip_bytes(&[("notes.txt", b"no clips")])));
    let (status, body, _) = app.send(upload(empty, None)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let body: Value = serde_json::from_slice(&body).unwrap();
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let record = app.wait_terminal(&task_id).await;
    assert_eq!(record["status"], "failed");

    let (status, body) = app.get_json(&format!("/download/{}", task_id)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "File not available. Task status: failed");
}

/// Test synchronous validation failures.
#[tokio::test]
async fn test_submit_validation() {
    let app = TestApp::new(None);

    let (status, _, _) = app.send(upload(two_clips(), Some("15"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = app.send(upload(None, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let not_zip = Some(("clips.tar", b"plain text".to_vec()));
    let (status, _, _) = app.send(upload(not_zip, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(app.store.is_empty());
}

/// Store outage at ingest is a server error and creates nothing.
#[tokio::test]
async fn test_submit_with_store_offline() {
    let app = TestApp::new(None);
    app.store.set_offline(true);

    let (status, _, _) = app.send(upload(two_clips(), None)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(app.store.is_empty());
}

/// Test metrics endpoint is absent unless enabled.
#[tokio::test]
async fn test_metrics_endpoint_disabled() {
    let app = TestApp::new(None);

    let (status, _, _) = app.send(get("/metrics")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Request ids are echoed back.
#[tokio::test]
async fn test_request_id_header() {
    let app = TestApp::new(None);
    let request = Request::builder()
        .uri("/health")
        .header("X-Request-ID", "req-42")
        .body(Body::empty())
        .unwrap();

    let (_, _, headers) = app.send(request).await;

    assert_eq!(headers["X-Request-ID"], "req-42");
}
