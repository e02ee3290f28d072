//! Job event supporting types
//!
//! Shared between the event payloads and the job status API.

use serde::{Deserialize, Serialize};

/// Artifact locators for the two stems of a finished job
///
/// Each locator is a path relative to the output root, in the form
/// `{backend_name}/{artifact_key}/{kind}.wav`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StemLocators {
    pub vocals: String,
    pub no_vocals: String,
}

impl StemLocators {
    /// `(kind, locator)` pairs in artifact order, vocals first
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("vocals", self.vocals.as_str()),
            ("no_vocals", self.no_vocals.as_str()),
        ]
        .into_iter()
    }
}
