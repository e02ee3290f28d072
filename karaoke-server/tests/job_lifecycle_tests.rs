//! Job Lifecycle Integration Tests
//!
//! Admission control, cancellation and timeout classification, driven through
//! the HTTP surface with a backend the test controls.

mod helpers;

use axum::http::StatusCode;
use helpers::*;
use karaoke_common::events::KaraokeEvent;
use karaoke_server::models::JobState;
use karaoke_server::services::backend::{SeparationBackend, SeparationError, SeparationRequest, StemPaths};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

async fn submit(app: &TestApp, filename: &str) -> String {
    let response = app.request(upload_request("/upload", filename, &short_song())).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    body_json(response).await["job_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn full_queue_returns_503_and_removes_upload() {
    let backend = GatedBackend::closed();
    let (calls, gate) = backend.handles();
    let app = test_app_with(Arc::new(backend), |o| {
        o.workers = 1;
        o.queue_capacity = 1;
    })
    .await;

    let running = submit(&app, "one.wav").await;
    wait_for_calls(&calls, 1).await;
    let queued = submit(&app, "two.wav").await;

    let response = app.request(upload_request("/upload", "three.wav", &short_song())).await;
    let body = assert_error(response, StatusCode::SERVICE_UNAVAILABLE, "QUEUE_FULL").await;
    assert_eq!(body["retryable"], true);

    // Only the admitted uploads remain on disk
    let mut stored = app.stored_uploads();
    stored.sort();
    let mut expected = vec![
        format!("{}.wav", running.replace('-', "")),
        format!("{}.wav", queued.replace('-', "")),
    ];
    expected.sort();
    assert_eq!(stored, expected);

    let health = body_json(app.get("/health").await).await;
    assert_eq!(health["queue_depth"], 1);

    gate.add_permits(10);
    app.wait_for_state(&queued, JobState::Succeeded).await;
    app.shutdown().await;
}

#[tokio::test]
async fn cancelled_job_never_reaches_backend() {
    let backend = GatedBackend::closed();
    let (calls, gate) = backend.handles();
    let app = test_app_with(Arc::new(backend), |o| o.workers = 1).await;

    let running = submit(&app, "one.wav").await;
    wait_for_calls(&calls, 1).await;
    let pending = submit(&app, "two.wav").await;

    let response = app.post(&format!("/jobs/{}/cancel", pending)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["state"], "cancelled");
    assert!(!app
        .upload_root()
        .join(format!("{}.wav", pending.replace('-', "")))
        .exists());

    // Neither a cancelled nor a running job can be cancelled
    let response = app.post(&format!("/jobs/{}/cancel", pending)).await;
    assert_error(response, StatusCode::CONFLICT, "CONFLICT").await;
    let response = app.post(&format!("/jobs/{}/cancel", running)).await;
    assert_error(response, StatusCode::CONFLICT, "CONFLICT").await;

    gate.add_permits(10);
    app.wait_for_state(&running, JobState::Succeeded).await;

    // The worker has moved past the cancelled job once a later job completes
    let last = submit(&app, "three.wav").await;
    app.wait_for_state(&last, JobState::Succeeded).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let status = body_json(app.get(&format!("/jobs/{}", pending)).await).await;
    assert_eq!(status["state"], "cancelled");
    assert!(status.get("locators").is_none());

    app.shutdown().await;
}

#[tokio::test]
async fn lifecycle_events_are_broadcast() {
    let app = test_app(|_| {}).await;
    let mut events = app.state.event_bus.subscribe();

    let job_id = submit(&app, "song.wav").await;
    app.wait_for_state(&job_id, JobState::Succeeded).await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.job_id().to_string() == job_id {
            seen.push(event.event_type().to_string());
        }
    }
    assert_eq!(seen, vec!["JobQueued", "JobStarted", "JobSucceeded"]);

    app.shutdown().await;
}

/// Backend that only returns once it is cancelled
struct StalledBackend;

#[async_trait::async_trait]
impl SeparationBackend for StalledBackend {
    fn name(&self) -> &str {
        "htdemucs"
    }

    async fn separate(&self, request: &SeparationRequest) -> Result<StemPaths, SeparationError> {
        request.cancel.cancelled().await;
        Err(request.cancelled_error())
    }
}

#[tokio::test]
async fn timeout_is_reported_as_retryable() {
    let app = test_app_with(Arc::new(StalledBackend), |o| {
        o.job_timeout = Duration::from_millis(100);
    })
    .await;
    let mut events = app.state.event_bus.subscribe();

    let response = app
        .request(upload_request("/upload?wait=true", "song.wav", &short_song()))
        .await;
    let body = assert_error(response, StatusCode::SERVICE_UNAVAILABLE, "SEPARATION_UNAVAILABLE").await;
    assert_eq!(body["backend_code"], "TIMEOUT");
    assert_eq!(body["retryable"], true);

    let failed = loop {
        match events.recv().await.unwrap() {
            event @ KaraokeEvent::JobFailed { .. } => break event,
            _ => continue,
        }
    };
    assert!(matches!(
        failed,
        KaraokeEvent::JobFailed { ref error_code, retryable: true, .. } if error_code == "TIMEOUT"
    ));

    app.shutdown().await;
}

#[tokio::test]
async fn rejected_same_name_upload_keeps_legacy_input() {
    let backend = GatedBackend::closed();
    let (calls, gate) = backend.handles();
    let app = test_app_with(Arc::new(backend), |o| {
        o.isolate_jobs = false;
        o.workers = 1;
        o.queue_capacity = 1;
    })
    .await;

    let original = short_song();
    let running = submit(&app, "blocker.wav").await;
    wait_for_calls(&calls, 1).await;
    let pending = submit(&app, "song.wav").await;
    let stored = app.upload_root().join("song.wav");
    assert_eq!(std::fs::read(&stored).unwrap(), original);

    // Wrong content type under the same name
    let response = app
        .request(upload_request("/upload", "song.wav", b"%PDF-1.7\nnot audio at all"))
        .await;
    assert_error(response, StatusCode::UNSUPPORTED_MEDIA_TYPE, "UNSUPPORTED_MEDIA").await;

    // Valid audio under the same name, refused by admission control
    let mut other = short_song();
    other.extend_from_slice(&[0u8; 64]);
    let response = app.request(upload_request("/upload", "song.wav", &other)).await;
    assert_error(response, StatusCode::SERVICE_UNAVAILABLE, "QUEUE_FULL").await;

    assert_eq!(std::fs::read(&stored).unwrap(), original);
    let mut uploads = app.stored_uploads();
    uploads.sort();
    assert_eq!(uploads, vec!["blocker.wav".to_string(), "song.wav".to_string()]);

    gate.add_permits(10);
    app.wait_for_state(&running, JobState::Succeeded).await;
    let status = app.wait_for_state(&pending, JobState::Succeeded).await;
    assert_eq!(status["locators"]["vocals"], "htdemucs/song/vocals.wav");
    assert_eq!(
        std::fs::read(app.output_root().join("htdemucs/song/vocals.wav")).unwrap(),
        original
    );

    app.shutdown().await;
}
