//! Separation backends
//!
//! Every backend turns one input audio file into two stems written to
//! `{output_root}/{name}/{artifact_key}/vocals.wav` and `.../no_vocals.wav`.
//! The layout is a fixed contract: artifact locators are built from it
//! without asking the backend.

pub mod in_process;
pub mod model;
pub mod process;

pub use in_process::InProcessBackend;
pub use model::{SeparatedStems, SeparationModel, VocalBandModel};
pub use process::ProcessBackend;

use async_trait::async_trait;
use karaoke_common::config::{BackendConfig, BackendKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::models::{FailureClass, JobFailure, StemKind};

/// Opaque failure codes shared by backends and the job runner
pub mod codes {
    /// Input missing, empty, or not audio
    pub const INPUT_INVALID: &str = "INPUT_INVALID";
    /// Input could not be decoded
    pub const DECODE_FAILED: &str = "DECODE_FAILED";
    /// External program missing or not executable
    pub const BACKEND_UNAVAILABLE: &str = "BACKEND_UNAVAILABLE";
    /// External program exited unsuccessfully, or the model rejected the input
    pub const BACKEND_FAILED: &str = "BACKEND_FAILED";
    /// Out of memory or killed by the OS
    pub const RESOURCE_EXHAUSTED: &str = "RESOURCE_EXHAUSTED";
    /// Backend exceeded the configured job timeout
    pub const TIMEOUT: &str = "TIMEOUT";
    /// Backend reported success but a stem is missing or empty
    pub const OUTPUT_MISSING: &str = "OUTPUT_MISSING";
    /// Filesystem trouble reading or writing (disk full, permissions)
    pub const IO_FAILURE: &str = "IO_FAILURE";
    /// Blocking worker thread panicked or was cancelled
    pub const WORKER_ABORTED: &str = "WORKER_ABORTED";
}

/// Backend failure
///
/// `code` and `class` are safe to show to clients; `detail` may contain
/// paths or process output and is only logged.
#[derive(Debug, Error)]
#[error("{code} ({}): {detail}", .class.as_str())]
pub struct SeparationError {
    pub class: FailureClass,
    pub code: &'static str,
    pub detail: String,
}

impl SeparationError {
    pub fn transient(code: &'static str, detail: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Transient,
            code,
            detail: detail.into(),
        }
    }

    pub fn permanent(code: &'static str, detail: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Permanent,
            code,
            detail: detail.into(),
        }
    }

    /// Client-visible part of the error
    pub fn to_failure(&self) -> JobFailure {
        JobFailure {
            code: self.code.to_string(),
            class: self.class,
        }
    }
}

/// Fixed output locations of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StemPaths {
    pub job_dir: PathBuf,
    pub vocals: PathBuf,
    pub no_vocals: PathBuf,
}

impl StemPaths {
    /// `{output_root}/{backend}/{artifact_key}/{kind}.wav`
    pub fn under(output_root: &Path, backend: &str, artifact_key: &str) -> Self {
        let job_dir = output_root.join(backend).join(artifact_key);
        Self {
            vocals: job_dir.join(StemKind::Vocals.file_name()),
            no_vocals: job_dir.join(StemKind::NoVocals.file_name()),
            job_dir,
        }
    }

    pub fn get(&self, kind: StemKind) -> &Path {
        match kind {
            StemKind::Vocals => &self.vocals,
            StemKind::NoVocals => &self.no_vocals,
        }
    }
}

/// One backend invocation
#[derive(Debug, Clone)]
pub struct SeparationRequest {
    pub input_path: PathBuf,
    pub output_root: PathBuf,
    pub artifact_key: String,
    /// Cancelled when the job times out; the backend stops writing output
    pub cancel: CancellationToken,
}

impl SeparationRequest {
    pub fn new(input_path: impl Into<PathBuf>, output_root: impl Into<PathBuf>, artifact_key: impl Into<String>) -> Self {
        Self {
            input_path: input_path.into(),
            output_root: output_root.into(),
            artifact_key: artifact_key.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Error returned by a backend that stopped because of `cancel`
    pub fn cancelled_error(&self) -> SeparationError {
        SeparationError::transient(
            codes::WORKER_ABORTED,
            format!("separation of {} was cancelled", self.artifact_key),
        )
    }
}

/// Source separation back end
#[async_trait]
pub trait SeparationBackend: Send + Sync {
    /// Directory name under the output root
    fn name(&self) -> &str;

    /// Separate `request.input_path` into the two stems
    ///
    /// On success both files in the returned paths have been written. Once
    /// `request.cancel` fires the backend must stop, write nothing further and
    /// return; the caller discards whatever output exists after that.
    async fn separate(&self, request: &SeparationRequest) -> Result<StemPaths, SeparationError>;
}

/// Build the backend selected by configuration
///
/// The in-process backend loads its model here, once, and keeps it for the
/// lifetime of the service.
pub fn from_config(config: &BackendConfig) -> Arc<dyn SeparationBackend> {
    match config.kind {
        BackendKind::Process => Arc::new(ProcessBackend::from_config(config)),
        BackendKind::InProcess => Arc::new(InProcessBackend::new(
            config.name.clone(),
            Arc::new(VocalBandModel::default()),
        )),
    }
}
