//! HTTP API handlers for karaoke-server

pub mod health;
pub mod jobs;
pub mod output;
pub mod sse;
pub mod ui;
pub mod upload;

pub use health::health_routes;
pub use jobs::job_routes;
pub use output::output_routes;
pub use sse::job_event_stream;
pub use ui::ui_routes;
pub use upload::upload_routes;
