//! Artifact store
//!
//! Maps a job's artifact key to the stem files under the output root and
//! resolves client-supplied locators back to files. Locators are validated
//! component by component before any filesystem access, then the joined path
//! is canonicalized and must still lie inside the canonical output root, so
//! neither `..` nor symlinks can escape it.

use karaoke_common::events::StemLocators;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use super::backend::StemPaths;
use crate::models::StemKind;

/// Artifact lookup failures
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Locator is malformed or would escape the output root
    #[error("Invalid artifact locator: {0}")]
    InvalidLocator(String),

    /// Nothing (or not a regular file) at the locator
    #[error("Artifact not found: {0}")]
    NotFound(String),

    /// A stem the backend should have written is missing or empty
    #[error("Artifact incomplete: {0}")]
    Incomplete(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Directory of separation outputs
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Output root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where `backend` writes the stems of `artifact_key`
    pub fn stem_paths(&self, backend: &str, artifact_key: &str) -> StemPaths {
        StemPaths::under(&self.root, backend, artifact_key)
    }

    /// Directory holding one job's stems
    pub fn job_dir(&self, backend: &str, artifact_key: &str) -> PathBuf {
        self.root.join(backend).join(artifact_key)
    }

    pub fn stem_path(&self, backend: &str, artifact_key: &str, kind: StemKind) -> PathBuf {
        self.job_dir(backend, artifact_key).join(kind.file_name())
    }

    /// `{backend}/{artifact_key}/{kind}.wav`
    pub fn locator(backend: &str, artifact_key: &str, kind: StemKind) -> String {
        format!("{}/{}/{}", backend, artifact_key, kind.file_name())
    }

    pub fn locators(backend: &str, artifact_key: &str) -> StemLocators {
        StemLocators {
            vocals: Self::locator(backend, artifact_key, StemKind::Vocals),
            no_vocals: Self::locator(backend, artifact_key, StemKind::NoVocals),
        }
    }

    /// Check that both stems exist and are non-empty regular files
    pub async fn verify_outputs(&self, paths: &StemPaths) -> Result<(), ArtifactError> {
        for kind in StemKind::ALL {
            let path = paths.get(kind);
            match tokio::fs::metadata(path).await {
                Ok(meta) if meta.is_file() && meta.len() > 0 => {}
                Ok(_) => {
                    return Err(ArtifactError::Incomplete(format!(
                        "{} is empty or not a file",
                        path.display()
                    )))
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(ArtifactError::Incomplete(format!(
                        "{} was not written",
                        path.display()
                    )))
                }
                Err(e) => return Err(ArtifactError::Io(e)),
            }
        }
        Ok(())
    }

    /// Remove a job's output directory, if present
    pub async fn discard(&self, backend: &str, artifact_key: &str) -> Result<(), ArtifactError> {
        let dir = self.job_dir(backend, artifact_key);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(dir = %dir.display(), "Discarded partial job output");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ArtifactError::Io(e)),
        }
    }

    /// Resolve a locator to an existing file inside the output root
    pub async fn resolve(&self, locator: &str) -> Result<PathBuf, ArtifactError> {
        let relative = validate_locator(locator)?;

        let root = tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|_| ArtifactError::NotFound(locator.to_string()))?;

        let candidate = tokio::fs::canonicalize(root.join(&relative))
            .await
            .map_err(|_| ArtifactError::NotFound(locator.to_string()))?;

        if !candidate.starts_with(&root) {
            warn!(locator, "Artifact locator resolved outside the output root");
            return Err(ArtifactError::InvalidLocator(locator.to_string()));
        }

        let meta = tokio::fs::metadata(&candidate).await?;
        if !meta.is_file() {
            return Err(ArtifactError::NotFound(locator.to_string()));
        }

        Ok(candidate)
    }
}

/// Syntactic locator check: relative, only normal components, no hidden tricks
pub fn validate_locator(locator: &str) -> Result<PathBuf, ArtifactError> {
    let invalid = || ArtifactError::InvalidLocator(locator.to_string());

    if locator.is_empty() || locator.contains('\\') || locator.contains('\0') {
        return Err(invalid());
    }

    let mut relative = PathBuf::new();
    for part in locator.split('/') {
        if part.is_empty() {
            return Err(invalid());
        }
        let mut components = Path::new(part).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(normal)), None) if normal == part => relative.push(normal),
            _ => return Err(invalid()),
        }
    }

    Ok(relative)
}
