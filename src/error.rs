//! Crate-wide error type.
//!
//! Store lookups never fail (they return `Option`); only the audio engine
//! and configuration loading produce errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no audio output device available")]
    NoOutputDevice,

    #[error("unsupported sample format: {0}")]
    UnsupportedSampleFormat(String),

    #[error("audio config: {0}")]
    DeviceConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("audio stream build: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("audio stream play: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("audio engine is not running")]
    EngineNotRunning,

    #[error("config: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
