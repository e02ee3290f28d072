//! Test Helper Utilities
//!
//! Shared fixtures for karaoke-server integration tests: an app wired to a
//! temporary root folder, request builders and scripted backends.

#![allow(dead_code)]

pub mod audio_generator;

pub use audio_generator::{generate_wav_bytes, short_song, AudioConfig};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use karaoke_server::models::JobState;
use karaoke_server::services::backend::{
    InProcessBackend, SeparationBackend, SeparationError, SeparationRequest, StemPaths,
    VocalBandModel,
};
use karaoke_server::{build_router, AppState, ServiceOptions};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

pub const BOUNDARY: &str = "karaoke-test-boundary";

/// Router plus the state and scratch directory behind it
pub struct TestApp {
    pub dir: TempDir,
    pub state: AppState,
    pub router: Router,
}

impl TestApp {
    pub fn upload_root(&self) -> PathBuf {
        self.dir.path().join("uploads")
    }

    pub fn output_root(&self) -> PathBuf {
        self.dir.path().join("output")
    }

    pub async fn request(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.request(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post(&self, uri: &str) -> Response<Body> {
        self.request(
            Request::builder()
                .method("POST")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// Poll `GET /jobs/{id}` until the job reaches `state`
    pub async fn wait_for_state(&self, job_id: &str, state: JobState) -> Value {
        let uri = format!("/jobs/{}", job_id);
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let status = body_json(self.get(&uri).await).await;
                if status["state"] == state.as_str() {
                    return status;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("job {} never reached {}", job_id, state))
    }

    /// Files currently in the upload directory
    pub fn stored_uploads(&self) -> Vec<String> {
        match std::fs::read_dir(self.upload_root()) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub async fn shutdown(&self) {
        self.state.queue.shutdown().await;
    }
}

/// Default options rooted at `dir`
pub fn test_options(dir: &TempDir) -> ServiceOptions {
    ServiceOptions {
        upload_root: dir.path().join("uploads"),
        output_root: dir.path().join("output"),
        max_upload_bytes: 10 * 1024 * 1024,
        isolate_jobs: true,
        queue_capacity: 8,
        workers: 2,
        job_timeout: Duration::from_secs(30),
    }
}

/// App with the given backend; `configure` adjusts the default options
pub async fn test_app_with(
    backend: Arc<dyn SeparationBackend>,
    configure: impl FnOnce(&mut ServiceOptions),
) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut options = test_options(&dir);
    configure(&mut options);

    let db = karaoke_server::db::init_in_memory_pool().await.unwrap();
    let state = AppState::start(db, backend, options, CancellationToken::new());
    let router = build_router(state.clone());

    TestApp { dir, state, router }
}

/// App running the bundled in-process model under the name `htdemucs`
pub async fn test_app(configure: impl FnOnce(&mut ServiceOptions)) -> TestApp {
    let backend = InProcessBackend::new("htdemucs".to_string(), Arc::new(VocalBandModel::default()));
    test_app_with(Arc::new(backend), configure).await
}

/// Multipart body with a single field
pub fn multipart_body(field_name: &str, filename: Option<&str>, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    match filename {
        Some(filename) => body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                field_name, filename
            )
            .as_bytes(),
        ),
        None => body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{}\"\r\n", field_name).as_bytes(),
        ),
    }
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

/// `POST {uri}` with a multipart `file` field
pub fn upload_request(uri: &str, filename: &str, content: &[u8]) -> Request<Body> {
    multipart_request(uri, "file", Some(filename), content, None)
}

pub fn multipart_request(
    uri: &str,
    field_name: &str,
    filename: Option<&str>,
    content: &[u8],
    accept: Option<&str>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
    if let Some(accept) = accept {
        builder = builder.header(header::ACCEPT, accept);
    }
    builder
        .body(Body::from(multipart_body(field_name, filename, content)))
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

/// Assert the status and the `{"error": {"code"}}` of an error response
pub async fn assert_error(response: Response<Body>, status: StatusCode, code: &str) -> Value {
    assert_eq!(response.status(), status);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], code, "unexpected body: {}", body);
    body
}

/// Backend that blocks on a semaphore, then copies the input into both stems
pub struct GatedBackend {
    pub calls: Arc<AtomicUsize>,
    pub gate: Arc<Semaphore>,
}

impl GatedBackend {
    /// Closed gate: every call blocks until permits are added
    pub fn closed() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            gate: Arc::new(Semaphore::new(0)),
        }
    }

    pub fn handles(&self) -> (Arc<AtomicUsize>, Arc<Semaphore>) {
        (Arc::clone(&self.calls), Arc::clone(&self.gate))
    }
}

#[async_trait]
impl SeparationBackend for GatedBackend {
    fn name(&self) -> &str {
        "htdemucs"
    }

    async fn separate(&self, request: &SeparationRequest) -> Result<StemPaths, SeparationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            permit = self.gate.acquire() => permit.unwrap().forget(),
            _ = request.cancel.cancelled() => return Err(request.cancelled_error()),
        }

        let paths = StemPaths::under(&request.output_root, "htdemucs", &request.artifact_key);
        std::fs::create_dir_all(&paths.job_dir).unwrap();
        std::fs::copy(&request.input_path, &paths.vocals).unwrap();
        std::fs::copy(&request.input_path, &paths.no_vocals).unwrap();
        Ok(paths)
    }
}

/// Wait until `calls` reaches `expected`
pub async fn wait_for_calls(calls: &AtomicUsize, expected: usize) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while calls.load(Ordering::SeqCst) < expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("backend never reached {} calls", expected));
}
