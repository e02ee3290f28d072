//! Separation job state machine
//!
//! A job moves PENDING → RUNNING → SUCCEEDED | FAILED. A PENDING job may be
//! CANCELLED before a worker claims it; RUNNING jobs cannot be cancelled.

use chrono::{DateTime, Utc};
use karaoke_common::events::StemLocators;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Upload persisted, waiting for a worker
    Pending,
    /// A worker is running the separation backend
    Running,
    /// Both stems produced
    Succeeded,
    /// Backend failed or produced no usable output
    Failed,
    /// Removed from the queue before it started
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = karaoke_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "running" => Ok(JobState::Running),
            "succeeded" => Ok(JobState::Succeeded),
            "failed" => Ok(JobState::Failed),
            "cancelled" => Ok(JobState::Cancelled),
            other => Err(karaoke_common::Error::Internal(format!(
                "Unknown job state: {}",
                other
            ))),
        }
    }
}

/// Whether retrying the same input may succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureClass {
    /// Resource exhaustion, timeouts, I/O trouble
    Transient,
    /// Bad input or misconfiguration
    Permanent,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Transient => "transient",
            FailureClass::Permanent => "permanent",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureClass::Transient)
    }
}

impl std::str::FromStr for FailureClass {
    type Err = karaoke_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient" => Ok(FailureClass::Transient),
            "permanent" => Ok(FailureClass::Permanent),
            other => Err(karaoke_common::Error::Internal(format!(
                "Unknown failure class: {}",
                other
            ))),
        }
    }
}

/// Client-visible failure record: an opaque code and its class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub code: String,
    pub class: FailureClass,
}

/// The two artifacts every successful job produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StemKind {
    Vocals,
    NoVocals,
}

impl StemKind {
    pub const ALL: [StemKind; 2] = [StemKind::Vocals, StemKind::NoVocals];

    pub fn as_str(&self) -> &'static str {
        match self {
            StemKind::Vocals => "vocals",
            StemKind::NoVocals => "no_vocals",
        }
    }

    /// File name inside the job's output directory
    pub fn file_name(&self) -> String {
        format!("{}.wav", self.as_str())
    }
}

/// One upload-to-artifacts processing unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    /// Filename as declared by the client
    pub original_filename: String,
    /// Sanitized filename
    pub filename: String,
    /// Directory component under the backend directory
    pub artifact_key: String,
    /// Persisted upload
    pub input_path: PathBuf,
    /// Backend directory name
    pub backend: String,
    pub state: JobState,
    pub failure: Option<JobFailure>,
    pub locators: Option<StemLocators>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        job_id: Uuid,
        original_filename: String,
        filename: String,
        artifact_key: String,
        input_path: PathBuf,
        backend: String,
    ) -> Self {
        Self {
            job_id,
            original_filename,
            filename,
            artifact_key,
            input_path,
            backend,
            state: JobState::Pending,
            failure: None,
            locators: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn mark_succeeded(&mut self, locators: StemLocators) {
        self.state = JobState::Succeeded;
        self.locators = Some(locators);
        self.failure = None;
        self.finished_at = Some(Utc::now());
    }

    /// Failed jobs never carry locators
    pub fn mark_failed(&mut self, failure: JobFailure) {
        self.state = JobState::Failed;
        self.locators = None;
        self.failure = Some(failure);
        self.finished_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
