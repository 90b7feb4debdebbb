//! Deterministic engine with a manually advanced clock.
//!
//! Nothing is rendered; every command is recorded so headless hosts and
//! tests can inspect what would have been played.

use std::collections::BTreeMap;

use log::debug;

use super::{
    pitch_to_frequency, AudioEngine, GainPath, GainProgram, ReverbId, VoiceEndedCallback,
    VoiceId, VoiceRequest,
};
use crate::config::EngineConfig;
use crate::error::{Error, Result};

pub struct OfflineVoice {
    pub request: VoiceRequest,
    pub frequency: f64,
    pub dry: GainProgram,
    pub reverb: GainProgram,
    pub stop_time: Option<f64>,
    pub disconnected: bool,
    ended: bool,
    callback: Option<VoiceEndedCallback>,
}

impl OfflineVoice {
    pub fn has_ended(&self) -> bool {
        self.ended
    }
}

pub struct OfflineEngine {
    config: EngineConfig,
    now: f64,
    running: bool,
    next_voice: u64,
    reverb_sends: u64,
    voices: BTreeMap<VoiceId, OfflineVoice>,
}

impl OfflineEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            now: 0.0,
            running: false,
            next_voice: 0,
            reverb_sends: 0,
            voices: BTreeMap::new(),
        }
    }

    /// Move the clock forward. The clock never runs backwards.
    pub fn advance_to(&mut self, time: f64) {
        self.now = self.now.max(time);
    }

    pub fn advance_by(&mut self, seconds: f64) {
        self.advance_to(self.now + seconds);
    }

    pub fn voice(&self, id: VoiceId) -> Option<&OfflineVoice> {
        self.voices.get(&id)
    }

    /// All voices ever created, in creation order.
    pub fn voices(&self) -> impl Iterator<Item = (VoiceId, &OfflineVoice)> {
        self.voices.iter().map(|(id, voice)| (*id, voice))
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn reverb_send_count(&self) -> u64 {
        self.reverb_sends
    }

    fn voice_mut(&mut self, id: VoiceId) -> Option<&mut OfflineVoice> {
        let voice = self.voices.get_mut(&id);
        if voice.is_none() {
            debug!("offline engine: ignoring command for unknown {}", id);
        }
        voice
    }
}

impl Default for OfflineEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl AudioEngine for OfflineEngine {
    fn init(&mut self) -> Result<()> {
        self.running = true;
        Ok(())
    }

    fn shutdown(&mut self) {
        self.running = false;
    }

    fn current_time(&self) -> f64 {
        self.now
    }

    fn create_reverb_send(&mut self) -> Result<ReverbId> {
        if !self.running {
            return Err(Error::EngineNotRunning);
        }
        let id = ReverbId(self.reverb_sends);
        self.reverb_sends += 1;
        Ok(id)
    }

    fn create_voice(&mut self, request: VoiceRequest) -> Result<VoiceId> {
        if !self.running {
            return Err(Error::EngineNotRunning);
        }
        let id = VoiceId(self.next_voice);
        self.next_voice += 1;

        let frequency = pitch_to_frequency(request.pitch, self.config.reference_frequency);
        self.voices.insert(
            id,
            OfflineVoice {
                request,
                frequency,
                dry: GainProgram::new(),
                reverb: GainProgram::new(),
                stop_time: None,
                disconnected: false,
                ended: false,
                callback: None,
            },
        );
        Ok(id)
    }

    fn set_gain_program(&mut self, voice: VoiceId, path: GainPath, program: GainProgram) {
        if let Some(voice) = self.voice_mut(voice) {
            match path {
                GainPath::Dry => voice.dry = program,
                GainPath::ReverbSend => voice.reverb = program,
            }
        }
    }

    fn stop_voice(&mut self, voice: VoiceId, at: f64) {
        if let Some(voice) = self.voice_mut(voice) {
            // An earlier stop wins, like a hard stop on a real node.
            voice.stop_time = Some(voice.stop_time.map_or(at, |t| t.min(at)));
        }
    }

    fn disconnect_voice(&mut self, voice: VoiceId) {
        if let Some(voice) = self.voice_mut(voice) {
            voice.disconnected = true;
        }
    }

    fn on_voice_ended(&mut self, voice: VoiceId, callback: VoiceEndedCallback) {
        if let Some(voice) = self.voice_mut(voice) {
            voice.callback = Some(callback);
        }
    }

    fn poll(&mut self) {
        let now = self.now;
        let mut finished: Vec<(f64, VoiceId)> = Vec::new();

        for (id, voice) in self.voices.iter_mut() {
            if voice.ended {
                continue;
            }
            if let Some(stop) = voice.stop_time {
                if stop <= now {
                    voice.ended = true;
                    finished.push((stop, *id));
                }
            }
        }

        // Completion order follows the engine clock, not creation order.
        finished.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        for (_, id) in finished {
            if let Some(callback) = self.voices.get_mut(&id).and_then(|v| v.callback.take()) {
                callback(id);
            }
        }
    }
}
