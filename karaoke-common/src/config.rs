//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`KARAOKE_ROOT_FOLDER`)
//! 3. TOML config file (`root_folder` key)
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing TOML file is not an error: the service logs a warning and
//! starts with compiled defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "KARAOKE_ROOT_FOLDER";

/// Environment variable pointing at the TOML config file
pub const CONFIG_PATH_ENV: &str = "KARAOKE_CONFIG";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "karaoke.db";

/// Which separation backend variant the service runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Spawn an external separation command per job
    #[default]
    Process,
    /// Run the bundled model inside the service process
    InProcess,
}

impl std::str::FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "process" => Ok(BackendKind::Process),
            "in_process" | "inprocess" => Ok(BackendKind::InProcess),
            other => Err(Error::Config(format!("Unknown backend kind: {}", other))),
        }
    }
}

/// `[backend]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend variant
    pub kind: BackendKind,
    /// Directory name under the output root; part of every artifact locator
    pub name: String,
    /// External separation program (process backend only)
    pub program: String,
    /// Arguments placed before the separation arguments, e.g. `["-m", "demucs"]`
    /// when `program` is a Python interpreter
    pub program_args: Vec<String>,
    /// Model name passed to the external program (`-n`)
    pub model: String,
    /// Additional arguments appended before the input path
    pub extra_args: Vec<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Process,
            name: "htdemucs".to_string(),
            program: "demucs".to_string(),
            program_args: Vec::new(),
            model: "htdemucs".to_string(),
            extra_args: Vec::new(),
        }
    }
}

/// Service configuration as read from `karaoke-server.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Root folder (database, default upload/output directories)
    pub root_folder: Option<PathBuf>,
    /// Upload directory; relative paths resolve against the root folder
    pub upload_root: Option<PathBuf>,
    /// Output directory; relative paths resolve against the root folder
    pub output_root: Option<PathBuf>,
    /// Listen address
    pub bind_address: String,
    /// Listen port
    pub port: u16,
    /// Maximum accepted upload size in bytes
    pub max_upload_bytes: u64,
    /// Name artifacts after a unique job id instead of the uploaded filename
    pub isolate_jobs: bool,
    /// Jobs that may wait for a worker before uploads are rejected
    pub queue_capacity: usize,
    /// Number of concurrent separation workers
    pub workers: usize,
    /// Upper bound on a single backend invocation
    pub job_timeout_secs: u64,
    pub backend: BackendConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            upload_root: None,
            output_root: None,
            bind_address: "127.0.0.1".to_string(),
            port: 5730,
            max_upload_bytes: 200 * 1024 * 1024,
            isolate_jobs: true,
            queue_capacity: 16,
            workers: 2,
            job_timeout_secs: 900,
            backend: BackendConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Parse a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load the config file if it exists, otherwise fall back to defaults
    ///
    /// A file that exists but does not parse is still an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => {
                let config = Self::load(path)?;
                info!("Loaded configuration from {}", path.display());
                Ok(config)
            }
            Some(path) => {
                warn!(
                    "Config file {} not found, using compiled defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            None => {
                warn!("No config file location available, using compiled defaults");
                Ok(Self::default())
            }
        }
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be at least 1".to_string()));
        }
        if self.job_timeout_secs == 0 {
            return Err(Error::Config("job_timeout_secs must be at least 1".to_string()));
        }
        if self.max_upload_bytes == 0 {
            return Err(Error::Config("max_upload_bytes must be at least 1".to_string()));
        }
        let name = &self.backend.name;
        if name.is_empty()
            || name == "."
            || name == ".."
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(Error::Config(format!(
                "backend.name must be a single path component: {:?}",
                name
            )));
        }
        if self.backend.kind == BackendKind::Process && self.backend.program.trim().is_empty() {
            return Err(Error::Config("backend.program must not be empty".to_string()));
        }
        Ok(())
    }

    /// Timeout applied around each backend invocation
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Resolve upload/output/database locations against a root folder
    pub fn storage_paths(&self, root: &Path) -> StoragePaths {
        let resolve = |configured: &Option<PathBuf>, default: &str| match configured {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => root.join(p),
            None => root.join(default),
        };

        StoragePaths {
            root: root.to_path_buf(),
            upload_root: resolve(&self.upload_root, "uploads"),
            output_root: resolve(&self.output_root, "output"),
            database: root.join(DATABASE_FILE),
        }
    }
}

/// Default TOML location: `KARAOKE_CONFIG`, else `{config_dir}/karaoke/karaoke-server.toml`
pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    dirs::config_dir().map(|d| d.join("karaoke").join("karaoke-server.toml"))
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("karaoke"))
        .unwrap_or_else(|| PathBuf::from("./karaoke_data"))
}

/// Resolves the root folder following the documented priority order
#[derive(Debug, Clone)]
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            cli_arg: None,
            toml_root: None,
        }
    }

    /// Root folder given on the command line
    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    /// Root folder from the TOML config
    pub fn with_toml_root(mut self, path: Option<PathBuf>) -> Self {
        self.toml_root = path;
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            info!(module = %self.module_name, "Root folder from command line: {}", path.display());
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                info!(module = %self.module_name, "Root folder from {}: {}", ROOT_FOLDER_ENV, path);
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_root {
            info!(module = %self.module_name, "Root folder from TOML config: {}", path.display());
            return path.clone();
        }

        let path = default_root_folder();
        info!(module = %self.module_name, "Root folder from compiled default: {}", path.display());
        path
    }
}

/// Concrete filesystem locations used by the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    pub root: PathBuf,
    pub upload_root: PathBuf,
    pub output_root: PathBuf,
    pub database: PathBuf,
}

/// Creates the root folder and the storage directories beneath it
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    paths: StoragePaths,
}

impl RootFolderInitializer {
    pub fn new(paths: StoragePaths) -> Self {
        Self { paths }
    }

    /// Create root, upload and output directories if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        for dir in [
            &self.paths.root,
            &self.paths.upload_root,
            &self.paths.output_root,
        ] {
            if !dir.exists() {
                std::fs::create_dir_all(dir)?;
                info!("Created directory: {}", dir.display());
            }
        }
        Ok(())
    }

    pub fn database_path(&self) -> &Path {
        &self.paths.database
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }
}
