//! Real-time engine on a cpal output stream.
//!
//! The audio callback owns every voice. Commands reach it over a channel
//! and are applied at the start of each buffer; finished voices travel
//! back over a second channel and their callbacks run in `poll()`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info};

use super::{
    pitch_to_frequency, AudioEngine, GainPath, GainProgram, ReverbId, VoiceEndedCallback,
    VoiceId, VoiceRequest, WaveTable,
};
use crate::config::EngineConfig;
use crate::error::{Error, Result};

enum Command {
    AddReverb(ReverbBus),
    AddVoice(RenderVoice),
    SetGain {
        voice: VoiceId,
        path: GainPath,
        program: GainProgram,
    },
    Stop {
        voice: VoiceId,
        at: f64,
    },
    Disconnect(VoiceId),
}

/// Feedback delay standing in for a convolution reverb.
struct ReverbBus {
    buffer: Vec<f32>,
    position: usize,
    feedback: f32,
    input: f32,
}

impl ReverbBus {
    fn new(length: usize, feedback: f32) -> Self {
        Self {
            buffer: vec![0.0; length.max(1)],
            position: 0,
            feedback,
            input: 0.0,
        }
    }

    fn process(&mut self) -> f32 {
        let out = self.buffer[self.position];
        self.buffer[self.position] = self.input + out * self.feedback;
        self.position = (self.position + 1) % self.buffer.len();
        self.input = 0.0;
        out
    }
}

struct RenderVoice {
    id: VoiceId,
    table: WaveTable,
    frequency: f64,
    phase: f64,
    start: f64,
    stop: Option<f64>,
    dry: GainProgram,
    reverb: GainProgram,
    send: usize,
    connected: bool,
    finished: bool,
}

struct Renderer {
    sample_rate: f64,
    /// Engine time at which this stream's frame counter started.
    time_offset: f64,
    master_gain: f32,
    frames: Arc<AtomicU64>,
    commands: Receiver<Command>,
    ended: Sender<VoiceId>,
    voices: Vec<RenderVoice>,
    reverbs: Vec<ReverbBus>,
}

impl Renderer {
    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::AddReverb(bus) => self.reverbs.push(bus),
                Command::AddVoice(voice) => self.voices.push(voice),
                Command::SetGain {
                    voice,
                    path,
                    program,
                } => {
                    if let Some(v) = self.voices.iter_mut().find(|v| v.id == voice) {
                        match path {
                            GainPath::Dry => v.dry = program,
                            GainPath::ReverbSend => v.reverb = program,
                        }
                    }
                }
                Command::Stop { voice, at } => {
                    if let Some(v) = self.voices.iter_mut().find(|v| v.id == voice) {
                        v.stop = Some(v.stop.map_or(at, |s| s.min(at)));
                    }
                }
                Command::Disconnect(voice) => {
                    if let Some(v) = self.voices.iter_mut().find(|v| v.id == voice) {
                        v.connected = false;
                    }
                }
            }
        }
    }

    fn render(&mut self, data: &mut [f32], channels: usize) {
        self.apply_commands();

        for frame in data.chunks_mut(channels.max(1)) {
            let t =
                self.time_offset + self.frames.load(Ordering::Relaxed) as f64 / self.sample_rate;
            let mut dry = 0.0_f32;

            for voice in self.voices.iter_mut() {
                if voice.finished {
                    continue;
                }
                // a stop can land before the voice ever started
                if voice.stop.is_some_and(|stop| t >= stop) {
                    voice.finished = true;
                    continue;
                }
                if t < voice.start {
                    continue;
                }

                let sample = voice.table.sample(voice.phase);
                voice.phase = (voice.phase + voice.frequency / self.sample_rate).fract();
                if !voice.connected {
                    continue;
                }

                dry += sample * voice.dry.value_at(t) as f32;
                if let Some(bus) = self.reverbs.get_mut(voice.send) {
                    bus.input += sample * voice.reverb.value_at(t) as f32;
                }
            }

            let wet: f32 = self.reverbs.iter_mut().map(ReverbBus::process).sum();
            let value = (dry + wet) * self.master_gain;
            for sample in frame.iter_mut() {
                *sample = value;
            }

            self.frames.fetch_add(1, Ordering::Relaxed);
        }

        let ended = &self.ended;
        self.voices.retain(|voice| {
            if voice.finished {
                let _ = ended.send(voice.id);
            }
            !voice.finished
        });
    }
}

pub struct CpalEngine {
    config: EngineConfig,
    stream: Option<cpal::Stream>,
    sample_rate: f64,
    time_offset: f64,
    frames: Arc<AtomicU64>,
    commands: Option<Sender<Command>>,
    ended: Option<Receiver<VoiceId>>,
    callbacks: HashMap<VoiceId, VoiceEndedCallback>,
    next_voice: u64,
    next_reverb: u64,
}

impl CpalEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            stream: None,
            sample_rate: 44_100.0,
            time_offset: 0.0,
            frames: Arc::new(AtomicU64::new(0)),
            commands: None,
            ended: None,
            callbacks: HashMap::new(),
            next_voice: 0,
            next_reverb: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .as_ref()
            .ok_or(Error::EngineNotRunning)?
            .send(command)
            .map_err(|_| Error::EngineNotRunning)
    }

    fn send_or_log(&self, command: Command) {
        if self.send(command).is_err() {
            debug!("audio engine not running; command dropped");
        }
    }

    /// Re-create every reverb send handed out before a restart so existing
    /// `ReverbId`s stay valid.
    fn restore_reverb_sends(&self) -> Result<()> {
        for _ in 0..self.next_reverb {
            self.send(self.reverb_bus())?;
        }
        Ok(())
    }

    fn reverb_bus(&self) -> Command {
        let length = (self.config.reverb_delay_secs * self.sample_rate) as usize;
        Command::AddReverb(ReverbBus::new(length, self.config.reverb_feedback))
    }

    fn setup_audio_stream(
        &mut self,
        commands: Receiver<Command>,
        ended: Sender<VoiceId>,
    ) -> Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(Error::NoOutputDevice)?;
        let config = device.default_output_config()?;

        self.sample_rate = config.sample_rate().0 as f64;
        let channels = config.channels() as usize;

        let mut renderer = Renderer {
            sample_rate: self.sample_rate,
            time_offset: self.time_offset,
            master_gain: self.config.master_gain,
            frames: Arc::clone(&self.frames),
            commands,
            ended,
            voices: Vec::new(),
            reverbs: Vec::new(),
        };

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device.build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    renderer.render(data, channels);
                },
                |err| error!("audio stream error: {}", err),
                None,
            )?,
            other => return Err(Error::UnsupportedSampleFormat(format!("{:?}", other))),
        };

        stream.play()?;
        Ok(stream)
    }
}

impl Default for CpalEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl AudioEngine for CpalEngine {
    fn init(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let (command_tx, command_rx) = unbounded();
        let (ended_tx, ended_rx) = unbounded();
        let stream = self.setup_audio_stream(command_rx, ended_tx)?;

        info!("audio output running at {} Hz", self.sample_rate);
        self.stream = Some(stream);
        self.commands = Some(command_tx);
        self.ended = Some(ended_rx);
        self.restore_reverb_sends()
    }

    fn shutdown(&mut self) {
        self.stream = None;
        self.commands = None;
        self.ended = None;
        self.callbacks.clear();

        // the next stream counts frames from zero at its own sample rate
        self.time_offset = self.current_time();
        self.frames.store(0, Ordering::Relaxed);
        info!("audio output stopped");
    }

    fn current_time(&self) -> f64 {
        self.time_offset + self.frames.load(Ordering::Relaxed) as f64 / self.sample_rate
    }

    fn create_reverb_send(&mut self) -> Result<ReverbId> {
        self.send(self.reverb_bus())?;

        let id = ReverbId(self.next_reverb);
        self.next_reverb += 1;
        Ok(id)
    }

    fn create_voice(&mut self, request: VoiceRequest) -> Result<VoiceId> {
        let id = VoiceId(self.next_voice);
        let frequency = pitch_to_frequency(request.pitch, self.config.reference_frequency);

        self.send(Command::AddVoice(RenderVoice {
            id,
            table: request.waveform,
            frequency,
            phase: 0.0,
            start: request.start_time,
            stop: None,
            dry: GainProgram::new(),
            reverb: GainProgram::new(),
            send: request.reverb.0 as usize,
            connected: true,
            finished: false,
        }))?;

        self.next_voice += 1;
        Ok(id)
    }

    fn set_gain_program(&mut self, voice: VoiceId, path: GainPath, program: GainProgram) {
        self.send_or_log(Command::SetGain {
            voice,
            path,
            program,
        });
    }

    fn stop_voice(&mut self, voice: VoiceId, at: f64) {
        self.send_or_log(Command::Stop { voice, at });
    }

    fn disconnect_voice(&mut self, voice: VoiceId) {
        self.send_or_log(Command::Disconnect(voice));
    }

    fn on_voice_ended(&mut self, voice: VoiceId, callback: VoiceEndedCallback) {
        self.callbacks.insert(voice, callback);
    }

    fn poll(&mut self) {
        let Some(ended) = self.ended.as_ref() else {
            return;
        };

        let finished: Vec<VoiceId> = ended.try_iter().collect();
        for voice in finished {
            if let Some(callback) = self.callbacks.remove(&voice) {
                callback(voice);
            }
        }
    }
}
