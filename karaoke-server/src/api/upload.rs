//! Upload gateway
//!
//! Accepts a multipart `file` field, sanitizes its declared name, streams the
//! body to a staging file in the upload directory and submits a separation
//! job. The staging file is renamed to its final name only once a queue slot
//! is held, so a rejected upload never touches another job's input.

use axum::{
    extract::{multipart::Field, DefaultBodyLimit, Multipart, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use karaoke_common::events::KaraokeEvent;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::jobs::{status_url, JobStatusResponse};
use super::ui::render_result_page;
use crate::db::jobs;
use crate::error::{ApiError, ApiResult};
use crate::models::{FailureClass, Job, JobFailure, JobState};
use crate::services::SubmitError;
use crate::utils::filename::{artifact_key, sanitize_filename, split_extension, stored_upload_name};
use crate::utils::media::{is_allowed_extension, rejected_signature, ALLOWED_EXTENSIONS, SNIFF_LEN};
use crate::AppState;

/// Multipart field carrying the audio file
const FILE_FIELD: &str = "file";

/// Failure code recorded for jobs refused by admission control
const QUEUE_FULL_CODE: &str = "QUEUE_FULL";

/// Failure code recorded when the staged upload cannot be moved into place
const IO_FAILURE_CODE: &str = "IO_FAILURE";

/// `.{job_id}.part`, never a valid sanitized name since those cannot start with `.`
fn staging_name(job_id: Uuid) -> String {
    format!(".{}.part", job_id.simple())
}

#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    /// Block until the job finishes and return its artifacts
    #[serde(default)]
    pub wait: bool,
}

/// 202 response for asynchronous uploads
#[derive(Debug, Serialize)]
pub struct UploadAccepted {
    pub job_id: Uuid,
    pub state: JobState,
    pub status_url: String,
}

/// Browser form posts ask for HTML and get the result page
fn wants_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|accept| accept.contains("text/html"))
        .unwrap_or(false)
}

/// POST /upload
pub async fn upload(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Response> {
    let html = wants_html(&headers);
    let wait = query.wait || html;

    let field = loop {
        match multipart.next_field().await? {
            Some(field) if field.name() == Some(FILE_FIELD) => break field,
            Some(_) => continue,
            None => return Err(ApiError::MissingFile),
        }
    };

    let declared = field.file_name().unwrap_or_default().to_string();
    if declared.is_empty() {
        return Err(ApiError::EmptyFilename);
    }
    let filename = sanitize_filename(&declared);
    if filename.is_empty() {
        return Err(ApiError::EmptyFilename);
    }

    if !is_allowed_extension(split_extension(&filename).1) {
        return Err(ApiError::UnsupportedMedia(format!(
            "expected one of: {}",
            ALLOWED_EXTENSIONS.join(", ")
        )));
    }

    let job_id = Uuid::new_v4();
    let key = artifact_key(job_id, &filename, state.uploads.isolate_jobs);
    let input_path = state
        .uploads
        .upload_root
        .join(stored_upload_name(&key, &filename));

    let staging_path = state.uploads.upload_root.join(staging_name(job_id));

    let bytes = persist_field(field, &staging_path, state.uploads.max_upload_bytes).await?;
    debug!(job_id = %job_id, bytes, path = %staging_path.display(), "Upload staged");

    let mut job = Job::new(
        job_id,
        declared,
        filename.clone(),
        key,
        input_path.clone(),
        state.backend_name.clone(),
    );
    if let Err(e) = jobs::save_job(&state.db, &job).await {
        remove_upload(&staging_path).await;
        return Err(e.into());
    }

    // Subscribe before submitting so the terminal event cannot be missed
    let events = wait.then(|| state.event_bus.subscribe());

    let slot = match state.queue.try_reserve() {
        Ok(slot) => slot,
        Err(e) => {
            reject_job(&state, &mut job, QUEUE_FULL_CODE, &staging_path).await;
            return Err(match e {
                SubmitError::Full(depth) => {
                    warn!(job_id = %job_id, depth, "Job queue full, upload rejected");
                    ApiError::QueueFull
                }
                SubmitError::Closed => ApiError::Internal("job queue is closed".to_string()),
            });
        }
    };

    if let Err(e) = tokio::fs::rename(&staging_path, &input_path).await {
        drop(slot);
        reject_job(&state, &mut job, IO_FAILURE_CODE, &staging_path).await;
        return Err(e.into());
    }

    info!(
        job_id = %job_id,
        filename = %filename,
        bytes,
        path = %input_path.display(),
        "Upload stored"
    );

    // Queued goes out before a worker can announce the start
    state.event_bus.emit_lossy(KaraokeEvent::JobQueued {
        job_id,
        filename,
        timestamp: Utc::now(),
    });
    slot.submit(job_id);

    match events {
        Some(events) => {
            let job = wait_for_completion(&state, job_id, events).await?;
            finished_response(job, html)
        }
        None => Ok((
            StatusCode::ACCEPTED,
            [(header::LOCATION, status_url(job_id))],
            Json(UploadAccepted {
                job_id,
                state: JobState::Pending,
                status_url: status_url(job_id),
            }),
        )
            .into_response()),
    }
}

/// Stream a multipart field to `path`, enforcing the size limit and sniffing
/// the leading bytes. Any failure removes the partial file.
async fn persist_field(field: Field<'_>, path: &Path, max_bytes: u64) -> ApiResult<u64> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = tokio::fs::File::create(path).await?;

    match write_field(field, file, max_bytes).await {
        Ok(bytes) => Ok(bytes),
        Err(e) => {
            remove_upload(path).await;
            Err(e)
        }
    }
}

async fn write_field(mut field: Field<'_>, mut file: tokio::fs::File, max_bytes: u64) -> ApiResult<u64> {
    let mut written: u64 = 0;
    let mut head: Vec<u8> = Vec::with_capacity(SNIFF_LEN);
    let mut sniffed = false;

    while let Some(chunk) = field.chunk().await? {
        written += chunk.len() as u64;
        if written > max_bytes {
            return Err(ApiError::PayloadTooLarge(max_bytes));
        }

        if !sniffed {
            let take = (SNIFF_LEN - head.len()).min(chunk.len());
            head.extend_from_slice(&chunk[..take]);
            if head.len() >= SNIFF_LEN {
                check_signature(&head)?;
                sniffed = true;
            }
        }

        file.write_all(&chunk).await?;
    }

    if written == 0 {
        return Err(ApiError::BadRequest("uploaded file is empty".to_string()));
    }
    if !sniffed {
        check_signature(&head)?;
    }

    file.flush().await?;
    Ok(written)
}

fn check_signature(head: &[u8]) -> ApiResult<()> {
    match rejected_signature(head) {
        Some(mime) => Err(ApiError::UnsupportedMedia(format!(
            "content looks like {}",
            mime
        ))),
        None => Ok(()),
    }
}

/// Record a job refused before it reached the queue and drop its staged upload
async fn reject_job(state: &AppState, job: &mut Job, code: &str, staging_path: &Path) {
    job.mark_failed(JobFailure {
        code: code.to_string(),
        class: FailureClass::Transient,
    });
    if let Err(e) = jobs::save_job(&state.db, job).await {
        warn!(job_id = %job.job_id, "Failed to record rejected job: {}", e);
    }
    remove_upload(staging_path).await;
}

async fn remove_upload(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), "Failed to remove upload: {}", e);
        }
    }
}

/// Wait for the job's terminal event and return the stored record
///
/// Falls back to polling the database when this receiver lags behind the bus.
async fn wait_for_completion(
    state: &AppState,
    job_id: Uuid,
    mut events: broadcast::Receiver<KaraokeEvent>,
) -> ApiResult<Job> {
    loop {
        match events.recv().await {
            Ok(event) if event.job_id() == job_id && event.is_terminal() => break,
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                debug!(job_id = %job_id, skipped, "Upload waiter lagged, checking job record");
                if let Some(job) = jobs::load_job(&state.db, job_id).await? {
                    if job.is_terminal() {
                        return Ok(job);
                    }
                }
            }
            Err(RecvError::Closed) => {
                return Err(ApiError::Internal("event bus closed".to_string()));
            }
        }
    }

    jobs::load_job(&state.db, job_id)
        .await?
        .ok_or_else(|| ApiError::Internal(format!("job {} vanished", job_id)))
}

fn finished_response(job: Job, html: bool) -> ApiResult<Response> {
    match (job.state, &job.locators, &job.failure) {
        (JobState::Succeeded, Some(locators), _) => {
            if html {
                Ok(render_result_page(&job.filename, locators).into_response())
            } else {
                Ok(Json(JobStatusResponse::from(&job)).into_response())
            }
        }
        (JobState::Failed, _, Some(failure)) => Err(ApiError::Separation {
            job_id: job.job_id,
            code: failure.code.clone(),
            class: failure.class,
        }),
        (JobState::Cancelled, _, _) => Err(ApiError::Conflict(format!(
            "Job {} was cancelled",
            job.job_id
        ))),
        (state, _, _) => Err(ApiError::Internal(format!(
            "job {} finished in inconsistent state {}",
            job.job_id, state
        ))),
    }
}

/// Build upload routes
///
/// `body_limit` caps the whole request body; the per-file limit is enforced
/// while streaming.
pub fn upload_routes(body_limit: usize) -> Router<AppState> {
    Router::new().route(
        "/upload",
        post(upload).layer(DefaultBodyLimit::max(body_limit)),
    )
}
