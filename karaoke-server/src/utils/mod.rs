//! Utility modules for karaoke-server

pub mod audio_decoder;
pub mod filename;
pub mod media;
pub mod resample;

pub use audio_decoder::{decode_audio_file, DecodedAudio};
pub use resample::resample_mono;
