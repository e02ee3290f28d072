//! Artifact retrieval

use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::utils::media::content_type_for;
use crate::AppState;

/// GET /output/{*locator}
///
/// Streams the artifact. Missing files and locators that would leave the
/// output root are both 404.
pub async fn serve_artifact(
    State(state): State<AppState>,
    Path(locator): Path<String>,
) -> ApiResult<Response> {
    let path = state.store.resolve(&locator).await.map_err(|e| {
        debug!(locator = %locator, "Artifact lookup failed: {}", e);
        ApiError::NotFound(format!("Artifact {}", locator))
    })?;

    let file = tokio::fs::File::open(&path).await?;
    let length = file.metadata().await?.len();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let headers = [
        (header::CONTENT_TYPE, content_type_for(&path).to_string()),
        (header::CONTENT_LENGTH, length.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{}\"", file_name),
        ),
    ];

    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

/// Build artifact routes
pub fn output_routes() -> Router<AppState> {
    Router::new().route("/output/*locator", get(serve_artifact))
}
