//! Audio engine seam: the scheduler issues timed voice commands through
//! `AudioEngine` and never builds the audio graph itself.

use std::fmt;

use crate::error::Result;

pub mod cpal_engine;
pub mod offline;
pub mod wavetable;

pub use cpal_engine::CpalEngine;
pub use offline::OfflineEngine;
pub use wavetable::{pitch_to_frequency, WaveTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(pub u64);

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "voice-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReverbId(pub u64);

/// The two gain stages every voice carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GainPath {
    Dry,
    ReverbSend,
}

/// Everything the engine needs to start one voice.
#[derive(Debug, Clone)]
pub struct VoiceRequest {
    pub waveform: WaveTable,
    /// Semitones from the engine's reference frequency.
    pub pitch: f64,
    /// Absolute engine-clock time.
    pub start_time: f64,
    pub reverb: ReverbId,
}

/// Called once when a voice stops producing sound.
pub type VoiceEndedCallback = Box<dyn FnOnce(VoiceId) + Send + 'static>;

/// A single gain automation event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GainStep {
    /// Jump to `value` at `time`.
    SetValueAt { value: f64, time: f64 },
    /// Ramp linearly from the previous event to `value`, arriving at `time`.
    LinearRampTo { value: f64, time: f64 },
}

impl GainStep {
    pub fn time(&self) -> f64 {
        match *self {
            GainStep::SetValueAt { time, .. } | GainStep::LinearRampTo { time, .. } => time,
        }
    }

    pub fn value(&self) -> f64 {
        match *self {
            GainStep::SetValueAt { value, .. } | GainStep::LinearRampTo { value, .. } => value,
        }
    }
}

/// Ordered gain automation for one path of one voice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GainProgram {
    steps: Vec<GainStep>,
}

impl GainProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_value_at(&mut self, value: f64, time: f64) -> &mut Self {
        self.steps.push(GainStep::SetValueAt { value, time });
        self
    }

    pub fn linear_ramp_to(&mut self, value: f64, time: f64) -> &mut Self {
        self.steps.push(GainStep::LinearRampTo { value, time });
        self
    }

    pub fn steps(&self) -> &[GainStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Largest value the program ever reaches.
    pub fn peak(&self) -> f64 {
        self.steps.iter().map(GainStep::value).fold(0.0, f64::max)
    }

    /// Evaluate the gain at `time`. Before the first event the gain is 0.
    pub fn value_at(&self, time: f64) -> f64 {
        let mut value = 0.0;
        let mut anchor_time = f64::NEG_INFINITY;

        for step in &self.steps {
            match *step {
                GainStep::SetValueAt { value: v, time: t } => {
                    if time < t {
                        return value;
                    }
                    value = v;
                    anchor_time = t;
                }
                GainStep::LinearRampTo { value: v, time: t } => {
                    if time < t {
                        if !anchor_time.is_finite() || t <= anchor_time {
                            return value;
                        }
                        let alpha = (time - anchor_time) / (t - anchor_time);
                        return value + (v - value) * alpha;
                    }
                    value = v;
                    anchor_time = t;
                }
            }
        }

        value
    }
}

/// Consumed interface of the audio backend.
///
/// Implementations render voices on whatever thread they like, but
/// `on_voice_ended` callbacks must only run from `poll()`, on the caller's
/// thread.
pub trait AudioEngine {
    fn init(&mut self) -> Result<()>;

    fn shutdown(&mut self);

    /// Monotonic engine clock, in seconds.
    fn current_time(&self) -> f64;

    fn create_reverb_send(&mut self) -> Result<ReverbId>;

    fn create_voice(&mut self, request: VoiceRequest) -> Result<VoiceId>;

    fn set_gain_program(&mut self, voice: VoiceId, path: GainPath, program: GainProgram);

    fn stop_voice(&mut self, voice: VoiceId, at: f64);

    fn disconnect_voice(&mut self, voice: VoiceId);

    fn on_voice_ended(&mut self, voice: VoiceId, callback: VoiceEndedCallback);

    /// Deliver pending ended callbacks.
    fn poll(&mut self) {}
}
