//! Job record persistence
//!
//! State transitions that race between the HTTP handlers and the workers
//! (claim, cancel) are conditional updates on `state = 'pending'`, so each
//! succeeds for exactly one caller.

use chrono::{DateTime, Utc};
use karaoke_common::events::StemLocators;
use karaoke_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use uuid::Uuid;

use crate::models::{FailureClass, Job, JobFailure, JobState};

fn internal(context: &str, e: impl std::fmt::Display) -> karaoke_common::Error {
    karaoke_common::Error::Internal(format!("{}: {}", context, e))
}

fn parse_time(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| internal(&format!("Failed to parse {}", column), e))
}

/// Insert or update a job record
pub async fn save_job(pool: &SqlitePool, job: &Job) -> Result<()> {
    let locators = job
        .locators
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| internal("Failed to serialize locators", e))?;
    let error_code = job.failure.as_ref().map(|f| f.code.clone());
    let failure_class = job.failure.as_ref().map(|f| f.class.as_str());

    sqlx::query(
        r#"
        INSERT INTO jobs (
            job_id, original_filename, filename, artifact_key, input_path,
            backend, state, error_code, failure_class, locators,
            created_at, started_at, finished_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(job_id) DO UPDATE SET
            state = excluded.state,
            error_code = excluded.error_code,
            failure_class = excluded.failure_class,
            locators = excluded.locators,
            started_at = excluded.started_at,
            finished_at = excluded.finished_at
        "#,
    )
    .bind(job.job_id.to_string())
    .bind(&job.original_filename)
    .bind(&job.filename)
    .bind(&job.artifact_key)
    .bind(job.input_path.to_string_lossy().into_owned())
    .bind(&job.backend)
    .bind(job.state.as_str())
    .bind(error_code)
    .bind(failure_class)
    .bind(locators)
    .bind(job.created_at.to_rfc3339())
    .bind(job.started_at.map(|dt| dt.to_rfc3339()))
    .bind(job.finished_at.map(|dt| dt.to_rfc3339()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Load a job record
pub async fn load_job(pool: &SqlitePool, job_id: Uuid) -> Result<Option<Job>> {
    let row = sqlx::query(
        r#"
        SELECT job_id, original_filename, filename, artifact_key, input_path,
               backend, state, error_code, failure_class, locators,
               created_at, started_at, finished_at
        FROM jobs
        WHERE job_id = ?
        "#,
    )
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|row| job_from_row(&row)).transpose()
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let job_id: String = row.get("job_id");
    let job_id = Uuid::parse_str(&job_id).map_err(|e| internal("Failed to parse job_id", e))?;

    let state: String = row.get("state");
    let state: JobState = state.parse()?;

    let error_code: Option<String> = row.get("error_code");
    let failure_class: Option<String> = row.get("failure_class");
    let failure = match (error_code, failure_class) {
        (Some(code), Some(class)) => Some(JobFailure {
            code,
            class: class.parse::<FailureClass>()?,
        }),
        _ => None,
    };

    let locators: Option<String> = row.get("locators");
    let locators = locators
        .map(|s| serde_json::from_str::<StemLocators>(&s))
        .transpose()
        .map_err(|e| internal("Failed to deserialize locators", e))?;

    let created_at: String = row.get("created_at");
    let started_at: Option<String> = row.get("started_at");
    let finished_at: Option<String> = row.get("finished_at");
    let input_path: String = row.get("input_path");

    Ok(Job {
        job_id,
        original_filename: row.get("original_filename"),
        filename: row.get("filename"),
        artifact_key: row.get("artifact_key"),
        input_path: PathBuf::from(input_path),
        backend: row.get("backend"),
        state,
        failure,
        locators,
        created_at: parse_time(&created_at, "created_at")?,
        started_at: started_at
            .map(|s| parse_time(&s, "started_at"))
            .transpose()?,
        finished_at: finished_at
            .map(|s| parse_time(&s, "finished_at"))
            .transpose()?,
    })
}

/// Move a pending job to running
///
/// Returns `false` when the job was cancelled (or claimed) first.
pub async fn claim_pending(pool: &SqlitePool, job_id: Uuid, started_at: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE jobs SET state = 'running', started_at = ? WHERE job_id = ? AND state = 'pending'",
    )
    .bind(started_at.to_rfc3339())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Move a pending job to cancelled
///
/// Returns `false` when the job is no longer pending.
pub async fn cancel_pending(pool: &SqlitePool, job_id: Uuid, finished_at: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE jobs SET state = 'cancelled', finished_at = ? WHERE job_id = ? AND state = 'pending'",
    )
    .bind(finished_at.to_rfc3339())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Fail jobs a previous process left pending or running
///
/// Returns the number of jobs marked failed.
pub async fn fail_interrupted(pool: &SqlitePool, code: &str) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET state = 'failed', error_code = ?, failure_class = ?, locators = NULL, finished_at = ?
        WHERE state IN ('pending', 'running')
        "#,
    )
    .bind(code)
    .bind(FailureClass::Transient.as_str())
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
