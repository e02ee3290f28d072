//! In-process separation models
//!
//! A model receives mono PCM at its native sample rate and returns two
//! equal-length waveforms at that same rate.

use super::{codes, SeparationError};

/// Output of one model run
#[derive(Debug, Clone, PartialEq)]
pub struct SeparatedStems {
    pub vocals: Vec<f32>,
    pub no_vocals: Vec<f32>,
}

/// Pretrained (or fixed) vocal/accompaniment separator
///
/// Implementations are loaded once and shared across worker threads.
pub trait SeparationModel: Send + Sync {
    /// Model identifier for logging
    fn id(&self) -> &str;

    /// Rate the model expects its input at and writes its output at
    fn sample_rate(&self) -> u32;

    /// Separate mono samples given at `sample_rate()`
    fn separate(&self, mono: &[f32]) -> Result<SeparatedStems, SeparationError>;
}

/// Band-split separator
///
/// Vocals are approximated by the vocal formant band (a constant-skirt
/// biquad band-pass between `low_hz` and `high_hz`); the accompaniment is the
/// residual `input - vocals`. Deterministic and allocation-light, so it needs
/// no weights on disk.
#[derive(Debug, Clone)]
pub struct VocalBandModel {
    sample_rate: u32,
    low_hz: f32,
    high_hz: f32,
}

impl Default for VocalBandModel {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            low_hz: 300.0,
            high_hz: 3_400.0,
        }
    }
}

impl VocalBandModel {
    pub fn new(sample_rate: u32, low_hz: f32, high_hz: f32) -> Self {
        Self {
            sample_rate,
            low_hz,
            high_hz,
        }
    }

    /// RBJ cookbook band-pass (0 dB peak gain), normalized by a0
    fn coefficients(&self) -> ([f32; 3], [f32; 2]) {
        let fs = self.sample_rate as f32;
        let center = (self.low_hz * self.high_hz).sqrt();
        let q = center / (self.high_hz - self.low_hz);
        let w0 = 2.0 * std::f32::consts::PI * center / fs;
        let alpha = w0.sin() / (2.0 * q);
        let a0 = 1.0 + alpha;

        let b = [alpha / a0, 0.0, -alpha / a0];
        let a = [(-2.0 * w0.cos()) / a0, (1.0 - alpha) / a0];
        (b, a)
    }
}

impl SeparationModel for VocalBandModel {
    fn id(&self) -> &str {
        "vocal-band"
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn separate(&self, mono: &[f32]) -> Result<SeparatedStems, SeparationError> {
        let nyquist = self.sample_rate as f32 / 2.0;
        if !(self.low_hz > 0.0 && self.low_hz < self.high_hz && self.high_hz < nyquist) {
            return Err(SeparationError::permanent(
                codes::BACKEND_FAILED,
                format!(
                    "vocal band {}-{} Hz invalid at {} Hz",
                    self.low_hz, self.high_hz, self.sample_rate
                ),
            ));
        }

        let (b, a) = self.coefficients();
        let (mut x1, mut x2, mut y1, mut y2) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);

        let mut vocals = Vec::with_capacity(mono.len());
        let mut no_vocals = Vec::with_capacity(mono.len());

        for &x in mono {
            let y = b[0] * x + b[1] * x1 + b[2] * x2 - a[0] * y1 - a[1] * y2;
            x2 = x1;
            x1 = x;
            y2 = y1;
            y1 = y;

            vocals.push(y);
            no_vocals.push(x - y);
        }

        Ok(SeparatedStems { vocals, no_vocals })
    }
}
