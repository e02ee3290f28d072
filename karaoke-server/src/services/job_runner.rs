//! Separation job runner
//!
//! Runs one job through the configured backend: validates the stored input,
//! bounds the backend call by the job timeout, and confirms both stems exist
//! before reporting success. Failures carry a code and class only; details
//! go to the log.
//!
//! On timeout the backend is cancelled and awaited until it has stopped, so
//! the job's output directory is discarded only once nothing writes to it
//! any more. A worker therefore never has more than one separation running.

use karaoke_common::events::StemLocators;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::artifact_store::{ArtifactError, ArtifactStore};
use super::backend::{codes, SeparationBackend, SeparationError, SeparationRequest};

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub locators: StemLocators,
    pub elapsed: Duration,
}

/// Drives the separation backend for one job at a time
#[derive(Clone)]
pub struct JobRunner {
    backend: Arc<dyn SeparationBackend>,
    store: ArtifactStore,
    timeout: Duration,
    /// Remove the job's output directory when a run fails
    discard_on_failure: bool,
}

impl JobRunner {
    pub fn new(
        backend: Arc<dyn SeparationBackend>,
        store: ArtifactStore,
        timeout: Duration,
        discard_on_failure: bool,
    ) -> Self {
        Self {
            backend,
            store,
            timeout,
            discard_on_failure,
        }
    }

    pub fn locators(&self, artifact_key: &str) -> StemLocators {
        ArtifactStore::locators(self.backend.name(), artifact_key)
    }

    /// Separate `input_path` into stems under `artifact_key`
    pub async fn run(&self, input_path: &Path, artifact_key: &str) -> Result<RunOutcome, SeparationError> {
        let started = Instant::now();

        let result = self.run_inner(input_path, artifact_key).await;

        match result {
            Ok(()) => {
                let elapsed = started.elapsed();
                info!(
                    backend = self.backend.name(),
                    key = artifact_key,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Separation succeeded"
                );
                Ok(RunOutcome {
                    locators: self.locators(artifact_key),
                    elapsed,
                })
            }
            Err(e) => {
                error!(
                    backend = self.backend.name(),
                    key = artifact_key,
                    code = e.code,
                    class = e.class.as_str(),
                    detail = %e.detail,
                    "Separation failed"
                );
                if self.discard_on_failure {
                    if let Err(discard_err) = self.store.discard(self.backend.name(), artifact_key).await {
                        warn!(key = artifact_key, error = %discard_err, "Failed to discard partial output");
                    }
                }
                Err(e)
            }
        }
    }

    async fn run_inner(&self, input_path: &Path, artifact_key: &str) -> Result<(), SeparationError> {
        match tokio::fs::metadata(input_path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {}
            Ok(_) => {
                return Err(SeparationError::permanent(
                    codes::INPUT_INVALID,
                    format!("{} is empty or not a file", input_path.display()),
                ))
            }
            Err(e) => {
                return Err(SeparationError::permanent(
                    codes::INPUT_INVALID,
                    format!("{}: {}", input_path.display(), e),
                ))
            }
        }

        let request = SeparationRequest::new(input_path, self.store.root(), artifact_key);

        let separation = self.backend.separate(&request);
        tokio::pin!(separation);

        let paths = tokio::select! {
            result = &mut separation => result?,
            _ = tokio::time::sleep(self.timeout) => {
                request.cancel.cancel();
                if let Ok(paths) = separation.await {
                    warn!(key = artifact_key, dir = %paths.job_dir.display(), "Backend finished after the timeout fired");
                }
                return Err(SeparationError::transient(
                    codes::TIMEOUT,
                    format!("backend exceeded {}s", self.timeout.as_secs_f32()),
                ));
            }
        };

        self.store.verify_outputs(&paths).await.map_err(|e| match e {
            ArtifactError::Io(io) => SeparationError::transient(codes::IO_FAILURE, io.to_string()),
            other => SeparationError::permanent(codes::OUTPUT_MISSING, other.to_string()),
        })
    }
}
