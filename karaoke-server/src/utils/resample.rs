//! Mono resampling for the in-process backend
//!
//! High-quality sinc interpolation via rubato's SincFixedIn, processed in a
//! single pass over the whole signal.

use anyhow::{Context, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Resample mono samples from `source_rate` to `target_rate`
///
/// Returns the input unchanged when the rates match or the input is empty.
pub fn resample_mono(samples: Vec<f32>, source_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
    if samples.is_empty() || source_rate == target_rate {
        return Ok(samples);
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = target_rate as f64 / source_rate as f64;
    let num_frames = samples.len();

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, num_frames, 1)
        .context("Failed to create rubato resampler")?;

    let input = vec![samples];
    let output = resampler
        .process(&input, None)
        .context("Rubato resampling failed")?;

    let resampled = output.into_iter().next().unwrap_or_default();

    tracing::debug!(
        "Resampled {} frames ({} Hz) → {} frames ({} Hz)",
        num_frames,
        source_rate,
        resampled.len(),
        target_rate
    );

    Ok(resampled)
}
