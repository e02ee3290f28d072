//! Bounded job queue and worker pool
//!
//! Job ids flow through a bounded mpsc channel; a fixed number of workers
//! share the receiving end. Admission reserves a slot without waiting, so a
//! full queue is reported to the caller instead of buffering without limit. Job state lives
//! in the database: a worker only runs a job it managed to claim from
//! `pending`, which is how cancelled jobs get skipped.

use chrono::Utc;
use karaoke_common::events::{EventBus, KaraokeEvent};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job_runner::JobRunner;
use crate::db::jobs;

/// Queue admission failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    /// All queue slots are taken
    #[error("Job queue is full ({0} pending)")]
    Full(usize),

    /// Workers have shut down
    #[error("Job queue is closed")]
    Closed,
}

/// Queue slot held while an upload is moved into place
///
/// Sending through a reserved slot cannot fail; dropping it frees the slot.
pub struct QueueSlot<'a> {
    permit: mpsc::Permit<'a, Uuid>,
}

impl QueueSlot<'_> {
    pub fn submit(self, job_id: Uuid) {
        self.permit.send(job_id);
        debug!(job_id = %job_id, "Job admitted to queue");
    }
}

/// Handle for submitting jobs to the worker pool
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Uuid>,
    workers: usize,
    shutdown: CancellationToken,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

/// Everything a worker needs to run jobs
#[derive(Clone)]
struct WorkerContext {
    db: SqlitePool,
    event_bus: EventBus,
    runner: JobRunner,
    shutdown: CancellationToken,
}

impl JobQueue {
    /// Create the queue and spawn `workers` worker tasks
    pub fn start(
        capacity: usize,
        workers: usize,
        db: SqlitePool,
        event_bus: EventBus,
        runner: JobRunner,
        shutdown: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<Uuid>(capacity);
        let rx = Arc::new(Mutex::new(rx));

        let context = WorkerContext {
            db,
            event_bus,
            runner,
            shutdown: shutdown.clone(),
        };

        let handles = (0..workers)
            .map(|worker_id| {
                let rx = Arc::clone(&rx);
                let context = context.clone();
                tokio::spawn(async move { worker_loop(worker_id, rx, context).await })
            })
            .collect();

        info!(capacity, workers, "Job queue started");

        Self {
            tx,
            workers,
            shutdown,
            handles: Arc::new(Mutex::new(handles)),
        }
    }

    /// Take a queue slot without waiting for one to free up
    pub fn try_reserve(&self) -> Result<QueueSlot<'_>, SubmitError> {
        let permit = self.tx.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => SubmitError::Full(self.depth()),
            mpsc::error::TrySendError::Closed(()) => SubmitError::Closed,
        })?;
        Ok(QueueSlot { permit })
    }

    /// Jobs waiting for a worker
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Stop the workers and wait for them to exit
    ///
    /// A job interrupted here stays `running` in the database and is failed
    /// with `WORKER_ABORTED` on the next startup.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Worker task ended abnormally: {}", e);
            }
        }
        info!("Job queue stopped");
    }
}

async fn worker_loop(worker_id: usize, rx: Arc<Mutex<mpsc::Receiver<Uuid>>>, context: WorkerContext) {
    debug!(worker_id, "Worker started");

    loop {
        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = context.shutdown.cancelled() => None,
                job_id = rx.recv() => job_id,
            }
        };

        let Some(job_id) = next else {
            break;
        };

        tokio::select! {
            _ = context.shutdown.cancelled() => {
                warn!(worker_id, job_id = %job_id, "Shutdown interrupted running job");
                break;
            }
            _ = process_job(worker_id, job_id, &context) => {}
        }
    }

    debug!(worker_id, "Worker stopped");
}

async fn process_job(worker_id: usize, job_id: Uuid, context: &WorkerContext) {
    match jobs::claim_pending(&context.db, job_id, Utc::now()).await {
        Ok(true) => {}
        Ok(false) => {
            debug!(worker_id, job_id = %job_id, "Job no longer pending, skipping");
            return;
        }
        Err(e) => {
            error!(worker_id, job_id = %job_id, "Failed to claim job: {}", e);
            return;
        }
    }

    let mut job = match jobs::load_job(&context.db, job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            warn!(worker_id, job_id = %job_id, "Claimed job vanished from the database");
            return;
        }
        Err(e) => {
            error!(worker_id, job_id = %job_id, "Failed to load job: {}", e);
            return;
        }
    };

    info!(worker_id, job_id = %job_id, filename = %job.filename, "Job started");
    context.event_bus.emit_lossy(KaraokeEvent::JobStarted {
        job_id,
        worker_id,
        timestamp: Utc::now(),
    });

    let event = match context.runner.run(&job.input_path, &job.artifact_key).await {
        Ok(outcome) => {
            job.mark_succeeded(outcome.locators.clone());
            KaraokeEvent::JobSucceeded {
                job_id,
                locators: outcome.locators,
                elapsed_ms: outcome.elapsed.as_millis() as u64,
                timestamp: Utc::now(),
            }
        }
        Err(e) => {
            let failure = e.to_failure();
            let event = KaraokeEvent::JobFailed {
                job_id,
                error_code: failure.code.clone(),
                retryable: failure.class.is_retryable(),
                timestamp: Utc::now(),
            };
            job.mark_failed(failure);
            event
        }
    };

    if let Err(e) = jobs::save_job(&context.db, &job).await {
        error!(worker_id, job_id = %job_id, "Failed to persist job result: {}", e);
    }

    info!(worker_id, job_id = %job_id, state = %job.state, "Job finished");
    context.event_bus.emit_lossy(event);
}
