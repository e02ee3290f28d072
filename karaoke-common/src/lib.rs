//! # Karaoke Common Library
//!
//! Shared code for the karaoke stem-separation service including:
//! - Error type shared across crates
//! - Configuration loading and root folder resolution
//! - Job lifecycle event types and the EventBus
//! - Server-Sent Events helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
