//! External-process separation backend
//!
//! Runs `{program} {program_args..} --two-stems=vocals -n {model} -o {output_root} {extra_args..} {input}`.
//! Demucs writes `{output_root}/{model}/{input_stem}/{vocals,no_vocals}.wav`;
//! when the model name differs from the backend name the job directory is
//! moved under the backend name afterwards, and removed if the run fails.

use async_trait::async_trait;
use karaoke_common::config::BackendConfig;
use std::ffi::OsString;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::{codes, SeparationBackend, SeparationError, SeparationRequest, StemPaths};

/// Number of trailing output lines kept for logging
const OUTPUT_TAIL_LINES: usize = 20;

/// stderr fragments that indicate resource exhaustion rather than bad input
const RESOURCE_MARKERS: &[&str] = &[
    "out of memory",
    "memoryerror",
    "cannot allocate memory",
    "no space left on device",
    "resource temporarily unavailable",
];

/// Backend that shells out to the separation command
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    name: String,
    program: String,
    program_args: Vec<String>,
    model: String,
    extra_args: Vec<String>,
}

impl ProcessBackend {
    pub fn new(name: impl Into<String>, program: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            program_args: Vec::new(),
            model: model.into(),
            extra_args: Vec::new(),
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            name: config.name.clone(),
            program: config.program.clone(),
            program_args: config.program_args.clone(),
            model: config.model.clone(),
            extra_args: config.extra_args.clone(),
        }
    }

    /// Arguments placed before the separation arguments
    pub fn with_program_args(mut self, args: Vec<String>) -> Self {
        self.program_args = args;
        self
    }

    /// Full argument list for one request
    pub fn command_args(&self, request: &SeparationRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.program_args.iter().map(OsString::from).collect();
        args.push("--two-stems=vocals".into());
        args.push("-n".into());
        args.push(self.model.clone().into());
        args.push("-o".into());
        args.push(request.output_root.clone().into_os_string());
        args.extend(self.extra_args.iter().map(OsString::from));
        args.push(request.input_path.clone().into_os_string());
        args
    }

    /// Move `{output_root}/{model}/{key}` to `{output_root}/{name}/{key}`
    async fn relocate_output(&self, request: &SeparationRequest) -> Result<(), SeparationError> {
        if self.model == self.name {
            return Ok(());
        }

        let produced = StemPaths::under(&request.output_root, &self.model, &request.artifact_key);
        let target = StemPaths::under(&request.output_root, &self.name, &request.artifact_key);
        let io_err = |e: std::io::Error| {
            SeparationError::transient(
                codes::IO_FAILURE,
                format!(
                    "move {} -> {}: {}",
                    produced.job_dir.display(),
                    target.job_dir.display(),
                    e
                ),
            )
        };

        if !produced.job_dir.is_dir() {
            return Err(SeparationError::permanent(
                codes::OUTPUT_MISSING,
                format!("{} was not created", produced.job_dir.display()),
            ));
        }

        if target.job_dir.exists() {
            tokio::fs::remove_dir_all(&target.job_dir).await.map_err(io_err)?;
        }
        if let Some(parent) = target.job_dir.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::rename(&produced.job_dir, &target.job_dir)
            .await
            .map_err(io_err)?;

        Ok(())
    }

    /// Remove `{output_root}/{model}/{key}` after a failed run
    ///
    /// Only the model directory is handled here; the job runner discards the
    /// backend-name directory itself.
    async fn discard_model_output(&self, request: &SeparationRequest) {
        if self.model == self.name {
            return;
        }
        let produced = StemPaths::under(&request.output_root, &self.model, &request.artifact_key);
        match tokio::fs::remove_dir_all(&produced.job_dir).await {
            Ok(()) => debug!(dir = %produced.job_dir.display(), "Removed partial model output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %produced.job_dir.display(), "Failed to remove partial model output: {}", e),
        }
    }

    async fn run_process(&self, request: &SeparationRequest) -> Result<(), SeparationError> {
        let args = self.command_args(request);
        info!(
            program = %self.program,
            input = %request.input_path.display(),
            key = %request.artifact_key,
            "Spawning separation process"
        );

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    SeparationError::permanent(
                        codes::BACKEND_UNAVAILABLE,
                        format!("cannot execute {}: {}", self.program, e),
                    )
                }
                _ => SeparationError::transient(
                    codes::IO_FAILURE,
                    format!("spawn {} failed: {}", self.program, e),
                ),
            })?;

        let stdout = tokio::spawn(read_all(child.stdout.take()));
        let stderr = tokio::spawn(read_all(child.stderr.take()));

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| {
                SeparationError::transient(codes::IO_FAILURE, format!("wait for {}: {}", self.program, e))
            })?,
            _ = request.cancel.cancelled() => {
                // kill() also reaps, so nothing writes after this returns
                if let Err(e) = child.kill().await {
                    warn!(key = %request.artifact_key, "Failed to kill separation process: {}", e);
                }
                return Err(request.cancelled_error());
            }
        };

        let stdout_tail = tail(&stdout.await.unwrap_or_default(), OUTPUT_TAIL_LINES);
        let stderr_tail = tail(&stderr.await.unwrap_or_default(), OUTPUT_TAIL_LINES);
        debug!(key = %request.artifact_key, stdout = %stdout_tail, stderr = %stderr_tail, "Separation process output");

        if !status.success() {
            error!(
                key = %request.artifact_key,
                status = %status,
                stderr = %stderr_tail,
                "Separation process failed"
            );
            return Err(classify_failure(status, &stderr_tail));
        }

        self.relocate_output(request).await
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        if let Err(e) = reader.read_to_end(&mut buf).await {
            debug!("Reading separation process output failed: {}", e);
        }
    }
    buf
}

/// Last `n` lines of process output
fn tail(output: &[u8], n: usize) -> String {
    let text = String::from_utf8_lossy(output);
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

/// Classify a failed run from its exit status and stderr
fn classify_failure(status: std::process::ExitStatus, stderr: &str) -> SeparationError {
    let lowered = stderr.to_ascii_lowercase();

    // No exit code means the process died from a signal, most often the OOM killer
    if status.code().is_none() {
        return SeparationError::transient(
            codes::RESOURCE_EXHAUSTED,
            format!("separation process terminated by signal ({})\n{}", status, stderr),
        );
    }

    if RESOURCE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return SeparationError::transient(
            codes::RESOURCE_EXHAUSTED,
            format!("separation process ran out of resources ({})\n{}", status, stderr),
        );
    }

    SeparationError::permanent(
        codes::BACKEND_FAILED,
        format!("separation process failed ({})\n{}", status, stderr),
    )
}

#[async_trait]
impl SeparationBackend for ProcessBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn separate(&self, request: &SeparationRequest) -> Result<StemPaths, SeparationError> {
        if let Err(e) = self.run_process(request).await {
            self.discard_model_output(request).await;
            return Err(e);
        }
        Ok(StemPaths::under(&request.output_root, &self.name, &request.artifact_key))
    }
}
