//! HTTP API Integration Tests
//!
//! Upload gateway, job status, artifact retrieval, health and UI routes,
//! exercised through the router with the bundled in-process model.

mod helpers;

use axum::http::{header, StatusCode};
use helpers::*;
use http_body_util::BodyExt;
use karaoke_server::models::JobState;

#[tokio::test]
async fn root_serves_upload_form() {
    let app = test_app(|_| {}).await;

    let response = app.get("/").await;
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.contains("text/html"));

    let page = body_text(response).await;
    assert!(page.contains(r#"action="/upload""#));
    assert!(page.contains(r#"name="file""#));
}

#[tokio::test]
async fn health_reports_queue_and_backend() {
    let app = test_app(|o| o.workers = 3).await;

    let response = app.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "karaoke-server");
    assert_eq!(body["backend"], "htdemucs");
    assert_eq!(body["workers"], 3);
    assert_eq!(body["queue_depth"], 0);
    assert_eq!(body["queue_capacity"], 8);
}

#[tokio::test]
async fn missing_file_field_is_rejected_without_writes() {
    let app = test_app(|_| {}).await;

    let request = multipart_request("/upload", "song", Some("song.wav"), &short_song(), None);
    assert_error(app.request(request).await, StatusCode::BAD_REQUEST, "MISSING_FILE").await;
    assert!(app.stored_uploads().is_empty());
}

#[tokio::test]
async fn empty_filename_is_rejected_without_writes() {
    let app = test_app(|_| {}).await;

    let response = app.request(upload_request("/upload", "", &short_song())).await;
    assert_error(response, StatusCode::BAD_REQUEST, "EMPTY_FILENAME").await;

    // Sanitizes to nothing
    let response = app.request(upload_request("/upload", "...", &short_song())).await;
    assert_error(response, StatusCode::BAD_REQUEST, "EMPTY_FILENAME").await;

    assert!(app.stored_uploads().is_empty());
}

#[tokio::test]
async fn non_audio_uploads_are_unsupported() {
    let app = test_app(|_| {}).await;

    let response = app.request(upload_request("/upload", "notes.txt", b"hello")).await;
    assert_error(response, StatusCode::UNSUPPORTED_MEDIA_TYPE, "UNSUPPORTED_MEDIA").await;

    // A PDF renamed to .mp3 is caught by its signature
    let response = app
        .request(upload_request("/upload", "song.mp3", b"%PDF-1.7\n%binary"))
        .await;
    assert_error(response, StatusCode::UNSUPPORTED_MEDIA_TYPE, "UNSUPPORTED_MEDIA").await;

    assert!(app.stored_uploads().is_empty());
}

#[tokio::test]
async fn oversized_upload_is_rejected_and_removed() {
    let app = test_app(|o| o.max_upload_bytes = 1024).await;

    let response = app.request(upload_request("/upload", "song.wav", &short_song())).await;
    assert_error(response, StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE").await;
    assert!(app.stored_uploads().is_empty());
}

#[tokio::test]
async fn async_upload_then_poll_then_download() {
    let app = test_app(|_| {}).await;

    let response = app.request(upload_request("/upload", "My Song.wav", &short_song())).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let accepted = body_json(response).await;
    assert_eq!(accepted["state"], "pending");
    let job_id = accepted["job_id"].as_str().unwrap().to_string();
    assert_eq!(accepted["status_url"], format!("/jobs/{}", job_id));

    let status = app.wait_for_state(&job_id, JobState::Succeeded).await;
    assert_eq!(status["filename"], "My_Song.wav");

    let key = job_id.replace('-', "");
    assert_eq!(
        status["locators"]["vocals"],
        format!("htdemucs/{}/vocals.wav", key)
    );
    assert_eq!(
        status["urls"]["no_vocals"],
        format!("/output/htdemucs/{}/no_vocals.wav", key)
    );
    assert!(status.get("error").is_none());

    // Stored under the artifact key so the backend's output directory matches
    assert!(app.upload_root().join(format!("{}.wav", key)).exists());

    let response = app.get(status["urls"]["vocals"].as_str().unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/wav");
    assert!(response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .starts_with("inline"));

    let bytes = body_bytes(response).await;
    let reader = hound::WavReader::new(std::io::Cursor::new(bytes)).unwrap();
    assert_eq!(reader.spec().sample_rate, 44_100);

    app.shutdown().await;
}

#[tokio::test]
async fn wait_mode_returns_locators() {
    let app = test_app(|_| {}).await;

    let response = app
        .request(upload_request("/upload?wait=true", "song.wav", &short_song()))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["state"], "succeeded");

    let vocals = app.output_root().join(body["locators"]["vocals"].as_str().unwrap());
    let no_vocals = app.output_root().join(body["locators"]["no_vocals"].as_str().unwrap());
    let vocals = hound::WavReader::open(vocals).unwrap();
    let no_vocals = hound::WavReader::open(no_vocals).unwrap();
    assert_eq!(vocals.duration(), no_vocals.duration());

    app.shutdown().await;
}

#[tokio::test]
async fn browser_form_post_gets_result_page() {
    let app = test_app(|_| {}).await;

    let request = multipart_request(
        "/upload",
        "file",
        Some("song.wav"),
        &short_song(),
        Some("text/html,application/xhtml+xml"),
    );
    let response = app.request(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .contains("text/html"));

    let page = body_text(response).await;
    assert!(page.contains("/output/htdemucs/"));
    assert!(page.contains("/vocals.wav"));
    assert!(page.contains("/no_vocals.wav"));

    app.shutdown().await;
}

#[tokio::test]
async fn same_filename_gets_distinct_locators_when_isolated() {
    let app = test_app(|_| {}).await;

    let first = body_json(
        app.request(upload_request("/upload?wait=true", "song.wav", &short_song()))
            .await,
    )
    .await;
    let second = body_json(
        app.request(upload_request("/upload?wait=true", "song.wav", &short_song()))
            .await,
    )
    .await;

    assert_ne!(first["locators"]["vocals"], second["locators"]["vocals"]);
    assert_eq!(app.get(first["urls"]["vocals"].as_str().unwrap()).await.status(), StatusCode::OK);
    assert_eq!(app.get(second["urls"]["vocals"].as_str().unwrap()).await.status(), StatusCode::OK);

    app.shutdown().await;
}

#[tokio::test]
async fn legacy_naming_reuses_filename_locators() {
    let app = test_app(|o| o.isolate_jobs = false).await;

    let quiet = generate_wav_bytes(&AudioConfig {
        duration_seconds: 0.25,
        ..AudioConfig::default()
    });

    let first = body_json(
        app.request(upload_request("/upload?wait=true", "My Song.wav", &short_song()))
            .await,
    )
    .await;
    assert_eq!(first["locators"]["vocals"], "htdemucs/My_Song/vocals.wav");
    assert_eq!(first["locators"]["no_vocals"], "htdemucs/My_Song/no_vocals.wav");
    assert!(app.upload_root().join("My_Song.wav").exists());

    // A second upload of the same name overwrites the first one's stems
    let second = body_json(
        app.request(upload_request("/upload?wait=true", "My Song.wav", &quiet))
            .await,
    )
    .await;
    assert_eq!(second["locators"], first["locators"]);

    let stems = hound::WavReader::open(app.output_root().join("htdemucs/My_Song/vocals.wav")).unwrap();
    assert_eq!(stems.duration(), 11_025);

    app.shutdown().await;
}

#[tokio::test]
async fn undecodable_upload_fails_without_locators() {
    let app = test_app(|_| {}).await;

    let response = app
        .request(upload_request("/upload?wait=true", "broken.wav", b"RIFF\x10\x00\x00\x00garbage!"))
        .await;
    let body = assert_error(response, StatusCode::UNPROCESSABLE_ENTITY, "SEPARATION_FAILED").await;
    assert_eq!(body["backend_code"], "DECODE_FAILED");
    assert_eq!(body["retryable"], false);

    // No decoder or path detail leaks to the client
    let raw = body.to_string();
    assert!(!raw.contains(app.dir.path().to_str().unwrap()));

    let job_id = body["job_id"].as_str().unwrap().to_string();
    let status = app.wait_for_state(&job_id, JobState::Failed).await;
    assert_eq!(status["error"]["code"], "DECODE_FAILED");
    assert_eq!(status["error"]["retryable"], false);
    assert!(status.get("locators").is_none());
    assert!(status.get("urls").is_none());

    let key = job_id.replace('-', "");
    assert!(!app.output_root().join("htdemucs").join(key).exists());

    app.shutdown().await;
}

#[tokio::test]
async fn unknown_jobs_are_not_found() {
    let app = test_app(|_| {}).await;

    let response = app.get("/jobs/6f1c1a52-3c55-4c0e-9b35-6f0a0c0b1d2e").await;
    assert_error(response, StatusCode::NOT_FOUND, "NOT_FOUND").await;

    let response = app.get("/jobs/not-a-uuid").await;
    assert_error(response, StatusCode::NOT_FOUND, "NOT_FOUND").await;

    let response = app.post("/jobs/6f1c1a52-3c55-4c0e-9b35-6f0a0c0b1d2e/cancel").await;
    assert_error(response, StatusCode::NOT_FOUND, "NOT_FOUND").await;
}

#[tokio::test]
async fn output_rejects_traversal_and_missing_artifacts() {
    let app = test_app(|_| {}).await;
    std::fs::create_dir_all(app.output_root().join("htdemucs")).unwrap();
    std::fs::write(app.dir.path().join("secret.txt"), b"secret").unwrap();

    for uri in [
        "/output/..%2Fsecret.txt",
        "/output/../secret.txt",
        "/output/..%2F..%2Fetc%2Fpasswd",
        "/output/htdemucs/missing/vocals.wav",
        "/output/htdemucs",
    ] {
        let response = app.get(uri).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
        let body = body_text(response).await;
        assert!(!body.contains("secret"), "{}", uri);
    }
}

#[tokio::test]
async fn event_stream_opens_with_connection_status() {
    let app = test_app(|_| {}).await;

    let response = app.get("/jobs/events").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let mut body = response.into_body();
    let frame = body.frame().await.unwrap().unwrap();
    let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
    assert!(text.contains("event: ConnectionStatus"));
    assert!(text.contains("data: connected"));
}
