//! Per-note gain envelopes for the dry and reverb-send paths.

use crate::audio::{AudioEngine, GainPath, GainProgram, VoiceId};

use super::ChannelConfig;

/// Attack values are scaled by this before use.
const ATTACK_SCALE: f64 = 5.0;

/// Gain automation for one note, plus the time its voice must stop so the
/// release tail stays audible.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelFx {
    pub dry: GainProgram,
    pub reverb: GainProgram,
    pub stop_time: f64,
}

/// Build the envelopes for a note sounding from `start` to `end` on a
/// channel configured with `config`.
///
/// The attack is clamped to the note's duration, volume follows a cubic
/// curve and is split between the dry path and the reverb send by
/// `config.reverb`.
pub fn channel_fx(config: &ChannelConfig, start: f64, end: f64) -> ChannelFx {
    let attack = (ATTACK_SCALE * config.attack).min(end - start);
    let volume = config.volume.powi(3);
    let peak_dry = (1.0 - config.reverb) * volume;
    let peak_reverb = config.reverb * volume;

    let reverb_release = if config.reverb > 0.0 {
        config.release
    } else {
        0.0
    };

    ChannelFx {
        dry: shape(peak_dry, start, attack, end, config.release),
        reverb: shape(peak_reverb, start, attack, end, reverb_release),
        stop_time: end + config.release,
    }
}

fn shape(peak: f64, start: f64, attack: f64, end: f64, release: f64) -> GainProgram {
    let mut program = GainProgram::new();

    if attack > 0.0 {
        program
            .set_value_at(0.0, start)
            .linear_ramp_to(peak, start + attack);
    } else {
        program.set_value_at(peak, start);
    }

    if release > 0.0 {
        program
            .set_value_at(peak, end)
            .linear_ramp_to(0.0, end + release);
    }

    program
}

/// Issue the channel's envelopes to `voice`. Voice lifetime stays with the
/// caller; the returned `stop_time` says when to stop it.
pub fn apply_channel_fx<E: AudioEngine + ?Sized>(
    engine: &mut E,
    voice: VoiceId,
    config: &ChannelConfig,
    start: f64,
    end: f64,
) -> ChannelFx {
    let fx = channel_fx(config, start, end);
    engine.set_gain_program(voice, GainPath::Dry, fx.dry.clone());
    engine.set_gain_program(voice, GainPath::ReverbSend, fx.reverb.clone());
    fx
}
