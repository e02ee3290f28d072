//! Event types for the karaoke event system
//!
//! Provides the job lifecycle event definitions and the EventBus that carries
//! them from the worker pool to SSE subscribers and waiting upload requests.

mod job_types;

pub use job_types::StemLocators;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Job lifecycle events
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum KaraokeEvent {
    /// Upload persisted and job admitted to the queue
    JobQueued {
        job_id: Uuid,
        /// Sanitized upload filename
        filename: String,
        timestamp: DateTime<Utc>,
    },

    /// A worker picked the job up and invoked the backend
    JobStarted {
        job_id: Uuid,
        worker_id: usize,
        timestamp: DateTime<Utc>,
    },

    /// Both stems were produced
    JobSucceeded {
        job_id: Uuid,
        locators: StemLocators,
        /// Wall-clock time spent in the backend
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Separation failed
    ///
    /// Carries only the opaque error code; diagnostics stay in the server log.
    JobFailed {
        job_id: Uuid,
        error_code: String,
        retryable: bool,
        timestamp: DateTime<Utc>,
    },

    /// Job removed from the queue before a worker started it
    JobCancelled {
        job_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

impl KaraokeEvent {
    /// SSE event name
    pub fn event_type(&self) -> &str {
        match self {
            KaraokeEvent::JobQueued { .. } => "JobQueued",
            KaraokeEvent::JobStarted { .. } => "JobStarted",
            KaraokeEvent::JobSucceeded { .. } => "JobSucceeded",
            KaraokeEvent::JobFailed { .. } => "JobFailed",
            KaraokeEvent::JobCancelled { .. } => "JobCancelled",
        }
    }

    /// Job the event belongs to
    pub fn job_id(&self) -> Uuid {
        match self {
            KaraokeEvent::JobQueued { job_id, .. }
            | KaraokeEvent::JobStarted { job_id, .. }
            | KaraokeEvent::JobSucceeded { job_id, .. }
            | KaraokeEvent::JobFailed { job_id, .. }
            | KaraokeEvent::JobCancelled { job_id, .. } => *job_id,
        }
    }

    /// Whether no further events follow for this job
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            KaraokeEvent::JobSucceeded { .. }
                | KaraokeEvent::JobFailed { .. }
                | KaraokeEvent::JobCancelled { .. }
        )
    }
}

/// Broadcast channel for job events
///
/// Cloning is cheap; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<KaraokeEvent>,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// * `capacity` - Number of events to buffer before lagging receivers drop old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<KaraokeEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: KaraokeEvent) {
        let _ = self.tx.send(event);
    }
}
