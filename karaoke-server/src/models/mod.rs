//! Data models for karaoke-server

pub mod job;

pub use job::{FailureClass, Job, JobFailure, JobState, StemKind};
