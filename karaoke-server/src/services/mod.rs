//! Separation services: backends, artifact storage, job execution and queueing

pub mod artifact_store;
pub mod backend;
pub mod job_queue;
pub mod job_runner;

pub use artifact_store::{ArtifactError, ArtifactStore};
pub use backend::{SeparationBackend, SeparationError, SeparationRequest, StemPaths};
pub use job_queue::{JobQueue, QueueSlot, SubmitError};
pub use job_runner::{JobRunner, RunOutcome};
