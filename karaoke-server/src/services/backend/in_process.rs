//! In-process separation backend
//!
//! Decodes the upload, downmixes to mono, resamples to the model's native
//! rate, runs the model and writes both stems as 16-bit PCM WAV. All of it is
//! CPU-bound and runs on tokio's blocking pool.
//!
//! A blocking task cannot be aborted, so it checks the request's cancellation
//! token between stages. Stems are written under `.part` names and renamed
//! into place only if the job was not cancelled in the meantime.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{codes, SeparationBackend, SeparationError, SeparationModel, SeparationRequest, StemPaths};
use crate::utils::{decode_audio_file, resample_mono};

/// Backend running a model held in memory for the service lifetime
pub struct InProcessBackend {
    name: String,
    model: Arc<dyn SeparationModel>,
}

impl InProcessBackend {
    pub fn new(name: String, model: Arc<dyn SeparationModel>) -> Self {
        info!(
            backend = %name,
            model = model.id(),
            sample_rate = model.sample_rate(),
            "In-process separation model loaded"
        );
        Self { name, model }
    }
}

#[async_trait]
impl SeparationBackend for InProcessBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn separate(&self, request: &SeparationRequest) -> Result<StemPaths, SeparationError> {
        let model = Arc::clone(&self.model);
        let request = request.clone();
        let paths = StemPaths::under(&request.output_root, &self.name, &request.artifact_key);

        // Dropping this future (worker shutdown) also stops the blocking task
        let cancel = request.cancel.child_token();
        let _stop_on_drop = cancel.clone().drop_guard();

        tokio::task::spawn_blocking(move || {
            let result = separate_blocking(model.as_ref(), &request.input_path, paths, &cancel);
            if cancel.is_cancelled() {
                return Err(request.cancelled_error());
            }
            result
        })
        .await
        .map_err(|e| SeparationError::transient(codes::WORKER_ABORTED, e.to_string()))?
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), SeparationError> {
    if cancel.is_cancelled() {
        return Err(SeparationError::transient(codes::WORKER_ABORTED, "cancelled"));
    }
    Ok(())
}

/// `vocals.wav` -> `vocals.wav.part`
fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn separate_blocking(
    model: &dyn SeparationModel,
    input_path: &Path,
    paths: StemPaths,
    cancel: &CancellationToken,
) -> Result<StemPaths, SeparationError> {
    let started = Instant::now();
    check_cancelled(cancel)?;

    let decoded = decode_audio_file(input_path)
        .map_err(|e| SeparationError::permanent(codes::DECODE_FAILED, format!("{:#}", e)))?;

    if decoded.samples.is_empty() {
        return Err(SeparationError::permanent(
            codes::DECODE_FAILED,
            format!("{} decoded to zero samples", input_path.display()),
        ));
    }

    debug!(
        path = %input_path.display(),
        duration_seconds = decoded.duration_seconds(),
        source_rate = decoded.sample_rate,
        "Input decoded"
    );

    let target_rate = model.sample_rate();
    let mono = resample_mono(decoded.samples, decoded.sample_rate, target_rate)
        .map_err(|e| SeparationError::permanent(codes::DECODE_FAILED, format!("{:#}", e)))?;

    check_cancelled(cancel)?;
    let stems = model.separate(&mono)?;

    if stems.vocals.len() != stems.no_vocals.len() {
        return Err(SeparationError::permanent(
            codes::BACKEND_FAILED,
            format!(
                "model {} returned stems of different length ({} vs {})",
                model.id(),
                stems.vocals.len(),
                stems.no_vocals.len()
            ),
        ));
    }

    check_cancelled(cancel)?;
    std::fs::create_dir_all(&paths.job_dir).map_err(|e| {
        SeparationError::transient(
            codes::IO_FAILURE,
            format!("create {}: {}", paths.job_dir.display(), e),
        )
    })?;

    let vocals_part = part_path(&paths.vocals);
    let no_vocals_part = part_path(&paths.no_vocals);
    let written = write_wav(&vocals_part, &stems.vocals, target_rate)
        .and_then(|()| check_cancelled(cancel))
        .and_then(|()| write_wav(&no_vocals_part, &stems.no_vocals, target_rate))
        .and_then(|()| check_cancelled(cancel))
        .and_then(|()| publish(&vocals_part, &paths.vocals))
        .and_then(|()| publish(&no_vocals_part, &paths.no_vocals));

    if let Err(e) = written {
        for part in [&vocals_part, &no_vocals_part] {
            let _ = std::fs::remove_file(part);
        }
        return Err(e);
    }

    debug!(
        job_dir = %paths.job_dir.display(),
        frames = stems.vocals.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "In-process separation complete"
    );

    Ok(paths)
}

fn publish(part: &Path, path: &Path) -> Result<(), SeparationError> {
    std::fs::rename(part, path).map_err(|e| {
        SeparationError::transient(codes::IO_FAILURE, format!("rename {}: {}", part.display(), e))
    })
}

/// Write mono f32 samples as 16-bit PCM WAV, clamping to [-1.0, 1.0]
fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), SeparationError> {
    let io_err =
        |e: hound::Error| SeparationError::transient(codes::IO_FAILURE, format!("write {}: {}", path.display(), e));

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec).map_err(io_err)?;
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer.write_sample(value).map_err(io_err)?;
    }
    writer.finalize().map_err(io_err)
}
