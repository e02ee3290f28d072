//! karaoke-server library interface
//!
//! Exposes the router and application state for the binary and for
//! integration tests.

pub mod api;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use karaoke_common::config::{ServiceConfig, StoragePaths};
use karaoke_common::events::EventBus;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::services::{ArtifactStore, JobQueue, JobRunner, SeparationBackend};

/// Multipart framing allowance on top of the upload size limit
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Event bus buffer size
const EVENT_BUS_CAPACITY: usize = 256;

/// Runtime settings derived from configuration
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub upload_root: PathBuf,
    pub output_root: PathBuf,
    pub max_upload_bytes: u64,
    /// Name artifacts after the job id rather than the upload filename
    pub isolate_jobs: bool,
    pub queue_capacity: usize,
    pub workers: usize,
    pub job_timeout: Duration,
}

impl ServiceOptions {
    pub fn from_config(config: &ServiceConfig, paths: &StoragePaths) -> Self {
        Self {
            upload_root: paths.upload_root.clone(),
            output_root: paths.output_root.clone(),
            max_upload_bytes: config.max_upload_bytes,
            isolate_jobs: config.isolate_jobs,
            queue_capacity: config.queue_capacity,
            workers: config.workers,
            job_timeout: config.job_timeout(),
        }
    }
}

/// Upload handling settings
#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub upload_root: PathBuf,
    pub max_upload_bytes: u64,
    pub isolate_jobs: bool,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Job records
    pub db: SqlitePool,
    /// Job lifecycle events for SSE and waiting uploads
    pub event_bus: EventBus,
    pub queue: JobQueue,
    pub store: ArtifactStore,
    pub uploads: UploadSettings,
    /// Directory name of the active backend under the output root
    pub backend_name: String,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Build the state and start the worker pool
    ///
    /// Workers stop when `shutdown` is cancelled.
    pub fn start(
        db: SqlitePool,
        backend: Arc<dyn SeparationBackend>,
        options: ServiceOptions,
        shutdown: CancellationToken,
    ) -> Self {
        let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
        let store = ArtifactStore::new(&options.output_root);
        let backend_name = backend.name().to_string();

        // Shared output paths may hold another job's stems in legacy mode
        let runner = JobRunner::new(backend, store.clone(), options.job_timeout, options.isolate_jobs);

        let queue = JobQueue::start(
            options.queue_capacity,
            options.workers,
            db.clone(),
            event_bus.clone(),
            runner,
            shutdown,
        );

        Self {
            db,
            event_bus,
            queue,
            store,
            uploads: UploadSettings {
                upload_root: options.upload_root,
                max_upload_bytes: options.max_upload_bytes,
                isolate_jobs: options.isolate_jobs,
            },
            backend_name,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let body_limit: usize = state
        .uploads
        .max_upload_bytes
        .saturating_add(MULTIPART_OVERHEAD)
        .try_into()
        .unwrap_or(usize::MAX);

    Router::new()
        .merge(api::ui_routes())
        .merge(api::upload_routes(body_limit))
        .merge(api::job_routes())
        .merge(api::output_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
