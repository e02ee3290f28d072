//! Server-Sent Events for job lifecycle updates

use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use karaoke_common::sse::create_event_sse_stream;
use serde::Deserialize;
use std::convert::Infallible;
use uuid::Uuid;

use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct EventStreamQuery {
    /// Only forward events of this job
    pub job_id: Option<Uuid>,
}

/// GET /jobs/events
///
/// Streams JobQueued, JobStarted, JobSucceeded, JobFailed and JobCancelled.
pub async fn job_event_stream(
    State(state): State<AppState>,
    Query(query): Query<EventStreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let only = query.job_id;
    create_event_sse_stream("karaoke-server", &state.event_bus, move |event| {
        only.map_or(true, |job_id| event.job_id() == job_id)
    })
}
