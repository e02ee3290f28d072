//! Job status and cancellation endpoints

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use karaoke_common::events::{KaraokeEvent, StemLocators};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::jobs;
use crate::error::{ApiError, ApiResult};
use crate::models::{Job, JobState};
use crate::AppState;

/// Artifact retrieval URLs
#[derive(Debug, Clone, Serialize)]
pub struct StemUrls {
    pub vocals: String,
    pub no_vocals: String,
}

impl StemUrls {
    pub fn from_locators(locators: &StemLocators) -> Self {
        Self {
            vocals: output_url(&locators.vocals),
            no_vocals: output_url(&locators.no_vocals),
        }
    }
}

/// `/output/{locator}`
pub fn output_url(locator: &str) -> String {
    format!("/output/{}", locator)
}

/// `/jobs/{job_id}`
pub fn status_url(job_id: Uuid) -> String {
    format!("/jobs/{}", job_id)
}

/// Failure as reported to clients
#[derive(Debug, Serialize)]
pub struct JobErrorInfo {
    pub code: String,
    pub retryable: bool,
}

/// GET /jobs/{id} response
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub state: JobState,
    pub filename: String,
    pub backend: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locators: Option<StemLocators>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urls: Option<StemUrls>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobErrorInfo>,
}

impl From<&Job> for JobStatusResponse {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.job_id,
            state: job.state,
            filename: job.filename.clone(),
            backend: job.backend.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            locators: job.locators.clone(),
            urls: job.locators.as_ref().map(StemUrls::from_locators),
            error: job.failure.as_ref().map(|f| JobErrorInfo {
                code: f.code.clone(),
                retryable: f.class.is_retryable(),
            }),
        }
    }
}

/// POST /jobs/{id}/cancel response
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: Uuid,
    pub state: JobState,
}

/// Unparseable ids are reported like unknown ones
fn parse_job_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound(format!("Job {}", raw)))
}

/// GET /jobs/{id}
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job_id = parse_job_id(&job_id)?;
    let job = jobs::load_job(&state.db, job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job {}", job_id)))?;

    Ok(Json(JobStatusResponse::from(&job)))
}

/// POST /jobs/{id}/cancel
///
/// Only pending jobs can be cancelled; a worker that dequeues a cancelled job
/// skips it.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    let job_id = parse_job_id(&job_id)?;
    let job = jobs::load_job(&state.db, job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job {}", job_id)))?;

    if !jobs::cancel_pending(&state.db, job_id, Utc::now()).await? {
        // Reload: a worker may have claimed it since the first read
        let current = jobs::load_job(&state.db, job_id)
            .await?
            .map(|j| j.state)
            .unwrap_or(job.state);
        return Err(ApiError::Conflict(format!(
            "Job {} is {} and cannot be cancelled",
            job_id, current
        )));
    }

    info!(job_id = %job_id, "Job cancelled");

    // Legacy naming shares upload paths between jobs with the same filename
    if state.uploads.isolate_jobs {
        if let Err(e) = tokio::fs::remove_file(&job.input_path).await {
            warn!(job_id = %job_id, "Failed to remove cancelled upload: {}", e);
        }
    }

    state.event_bus.emit_lossy(KaraokeEvent::JobCancelled {
        job_id,
        timestamp: Utc::now(),
    });

    Ok(Json(CancelResponse {
        job_id,
        state: JobState::Cancelled,
    }))
}

/// Build job routes
pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs/events", get(super::job_event_stream))
        .route("/jobs/:job_id", get(get_job_status))
        .route("/jobs/:job_id/cancel", post(cancel_job))
}
