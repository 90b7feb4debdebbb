//! TOML configuration for the scheduler and the audio engines.

use std::path::Path;

use serde::Deserialize;

use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sequence: SequenceConfig,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    /// How far ahead of the playhead voices are handed to the engine.
    /// `None` schedules the whole sequence at `play()`.
    pub schedule_ahead_secs: Option<f64>,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            schedule_ahead_secs: Some(2.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Frequency of pitch 0, in Hz.
    pub reference_frequency: f64,
    pub master_gain: f32,
    pub reverb_delay_secs: f64,
    pub reverb_feedback: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reference_frequency: 440.0,
            master_gain: 0.2,
            reverb_delay_secs: 0.09,
            reverb_feedback: 0.55,
        }
    }
}
