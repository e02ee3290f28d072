//! Audio Test Fixture Generator
//!
//! In-memory WAV files for upload tests

use std::io::Cursor;

/// Configuration for generated audio
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub frequency_hz: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            duration_seconds: 0.5,
            sample_rate: 44100,
            channels: 2,
            frequency_hz: 440.0,
        }
    }
}

/// 16-bit PCM sine tone as WAV bytes
pub fn generate_wav_bytes(config: &AudioConfig) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: config.channels,
        sample_rate: config.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        let frames = (config.duration_seconds * config.sample_rate as f64) as usize;
        for i in 0..frames {
            let t = i as f32 / config.sample_rate as f32;
            let value = (2.0 * std::f32::consts::PI * config.frequency_hz * t).sin() * 0.3;
            let sample = (value * i16::MAX as f32) as i16;
            for _ in 0..config.channels {
                writer.write_sample(sample).unwrap();
            }
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Half a second of stereo 440 Hz
pub fn short_song() -> Vec<u8> {
    generate_wav_bytes(&AudioConfig::default())
}
