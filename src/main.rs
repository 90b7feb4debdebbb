#[cfg(feature = "gui")]
use eframe::egui;

#[cfg(feature = "gui")]
use crossbeam_channel::{unbounded, Receiver};

#[cfg(feature = "gui")]
use notegrid::{
    AudioEngine, ChannelConfigUpdate, ChannelId, Config, CpalEngine, EventKind, NoteDraft,
    Sequence, SequenceEvent, WaveTable,
};

#[cfg(feature = "gui")]
const EVENT_LOG_LEN: usize = 12;

#[cfg(feature = "gui")]
fn main() -> Result<(), eframe::Error> {
    env_logger::init();
    let config = load_config();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([800.0, 800.0])
            .with_title("NOTEGRID - Sequencer"),
        ..Default::default()
    };

    eframe::run_native(
        "NOTEGRID",
        options,
        Box::new(move |_cc| Ok(Box::new(SequencerApp::new(config)))),
    )
}

#[cfg(not(feature = "gui"))]
fn main() {
    eprintln!("This binary requires the 'gui' feature to be enabled");
    std::process::exit(1);
}

/// `NOTEGRID_CONFIG` points at an optional TOML file.
#[cfg(feature = "gui")]
fn load_config() -> Config {
    match std::env::var("NOTEGRID_CONFIG") {
        Ok(path) => Config::load(&path).unwrap_or_else(|e| {
            log::warn!("ignoring config {}: {}", path, e);
            Config::default()
        }),
        Err(_) => Config::default(),
    }
}

#[cfg(feature = "gui")]
struct SequencerApp {
    sequence: Sequence<CpalEngine>,
    events: Receiver<SequenceEvent>,

    // UI state
    event_log: Vec<String>,
    selected: Option<ChannelId>,
    status: Option<String>,
}

#[cfg(feature = "gui")]
impl SequencerApp {
    fn new(config: Config) -> Self {
        let mut engine = CpalEngine::new(config.engine.clone());
        let status = engine.init().err().map(|e| {
            log::error!("audio engine unavailable: {}", e);
            format!("Audio unavailable: {}", e)
        });

        let mut sequence = Sequence::new(engine, config.sequence.clone());
        let (tx, events) = unbounded();
        for kind in [
            EventKind::Play,
            EventKind::Stop,
            EventKind::Ended,
            EventKind::NoteStart,
            EventKind::NoteEnd,
            EventKind::CreateChannel,
        ] {
            let tx = tx.clone();
            sequence.on(kind, move |event| {
                let _ = tx.send(event.clone());
            });
        }

        load_demo(&mut sequence);
        let selected = sequence.channels().first().map(|c| c.id.clone());

        Self {
            sequence,
            events,
            event_log: Vec::new(),
            selected,
            status,
        }
    }

    fn handle_sequence_events(&mut self) {
        for event in self.events.try_iter() {
            let line = match &event {
                SequenceEvent::NoteStart(note) | SequenceEvent::NoteEnd(note) => format!(
                    "{} {} ({}, {:.2}s)",
                    event.kind(),
                    note.id,
                    note.channel_id,
                    note.offset
                ),
                SequenceEvent::CreateChannel(channel) => {
                    format!("{} {}", event.kind(), channel.id)
                }
                _ => event.kind().to_string(),
            };
            self.event_log.push(line);
        }

        let overflow = self.event_log.len().saturating_sub(EVENT_LOG_LEN);
        self.event_log.drain(..overflow);
    }

    fn start_playback(&mut self) {
        if let Err(e) = self.sequence.play() {
            self.status = Some(format!("Play failed: {}", e));
        }
    }

    fn channel_controls(&mut self, ui: &mut egui::Ui, channel_id: &ChannelId) {
        let Some(config) = self
            .sequence
            .find_channel(channel_id)
            .map(|c| c.config.clone())
        else {
            return;
        };

        let mut update = ChannelConfigUpdate::default();
        let mut changed = false;

        let mut volume = config.volume;
        if ui
            .add(egui::Slider::new(&mut volume, 0.0..=1.0).text("Volume"))
            .changed()
        {
            update.volume = Some(volume);
            changed = true;
        }

        let mut attack = config.attack;
        if ui
            .add(egui::Slider::new(&mut attack, 0.0..=1.0).text("Attack"))
            .changed()
        {
            update.attack = Some(attack);
            changed = true;
        }

        let mut release = config.release;
        if ui
            .add(egui::Slider::new(&mut release, 0.0..=2.0).text("Release"))
            .changed()
        {
            update.release = Some(release);
            changed = true;
        }

        let mut reverb = config.reverb;
        if ui
            .add(egui::Slider::new(&mut reverb, 0.0..=1.0).text("Reverb"))
            .changed()
        {
            update.reverb = Some(reverb);
            changed = true;
        }

        ui.horizontal(|ui| {
            ui.label("Waveform:");
            for table in [WaveTable::square(), WaveTable::sine()] {
                let is_current = config.waveform.name() == table.name();
                if ui.selectable_label(is_current, table.name()).clicked() && !is_current {
                    update.waveform = Some(table);
                    changed = true;
                }
            }
        });

        if changed {
            self.sequence.update_channel_config(channel_id, update);
        }

        if ui.button("🔊 Audition").clicked() {
            if let Err(e) = self.sequence.audition(channel_id, 0.0, 0.5) {
                self.status = Some(format!("Audition failed: {}", e));
            }
        }
    }
}

/// A short two-channel phrase so the transport has something to play.
#[cfg(feature = "gui")]
fn load_demo<E: AudioEngine>(sequence: &mut Sequence<E>) {
    let lead = sequence.create_channel("Lead").id.clone();
    sequence.update_channel_config(
        &lead,
        ChannelConfigUpdate {
            volume: Some(0.8),
            attack: Some(0.01),
            release: Some(0.3),
            reverb: Some(0.3),
            ..Default::default()
        },
    );
    for (i, pitch) in [0.0, 4.0, 7.0, 12.0, 7.0, 4.0, 0.0, 3.5].iter().enumerate() {
        let note = sequence.create_note(NoteDraft {
            channel_id: lead.clone(),
            pitch: *pitch,
            offset: i as f64 * 0.25,
            duration: 0.2,
        });
        sequence.add_note_to_channel(&lead, note);
    }

    let bass = sequence.create_channel("Bass").id.clone();
    sequence.update_channel_config(
        &bass,
        ChannelConfigUpdate {
            waveform: Some(WaveTable::sine()),
            volume: Some(0.9),
            release: Some(0.1),
            ..Default::default()
        },
    );
    for (i, pitch) in [-24.0, -19.0].iter().enumerate() {
        let note = sequence.create_note(NoteDraft {
            channel_id: bass.clone(),
            pitch: *pitch,
            offset: i as f64,
            duration: 0.9,
        });
        sequence.add_note_to_channel(&bass, note);
    }
}

#[cfg(feature = "gui")]
impl eframe::App for SequencerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint();

        if let Err(e) = self.sequence.tick() {
            self.status = Some(format!("Scheduling failed: {}", e));
        }
        self.handle_sequence_events();

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("NOTEGRID - Sequencer");
            ui.add_space(10.0);

            // Transport controls
            ui.horizontal(|ui| {
                if self.sequence.is_playing() {
                    if ui.button("⏹ Stop").clicked() {
                        self.sequence.stop();
                    }
                } else if ui.button("▶ Play").clicked() {
                    self.start_playback();
                }

                ui.add_space(20.0);

                match self.sequence.play_offset_time() {
                    Some(t) => ui.label(format!("{:.2}s", t)),
                    None => ui.label("idle"),
                };
            });

            ui.add_space(20.0);

            // Channels
            ui.label("Channels:");
            let mut selected_changed = None;
            ui.horizontal(|ui| {
                for channel in self.sequence.channels() {
                    let is_selected = self.selected.as_ref() == Some(&channel.id);
                    let text = format!("{} ({})", channel.name, channel.notes().len());
                    if ui.selectable_label(is_selected, text).clicked() {
                        selected_changed = Some(channel.id.clone());
                    }
                }
            });
            if let Some(id) = selected_changed {
                self.selected = Some(id);
            }

            if let Some(id) = self.selected.clone() {
                ui.add_space(5.0);
                self.channel_controls(ui, &id);
            }

            ui.separator();

            // Lookahead
            ui.label(match self.sequence.next_note() {
                Some(note) => format!("Next: {} at {:.2}s", note.id, note.offset),
                None => "Next: -".to_string(),
            });
            egui::ScrollArea::vertical()
                .id_source("pending")
                .max_height(150.0)
                .show(ui, |ui| {
                    for note in self.sequence.pending_notes() {
                        ui.label(format!(
                            "{:.2}s  {}  pitch {:+.1}",
                            note.offset, note.channel_id, note.pitch
                        ));
                    }
                });

            ui.separator();
            ui.label("Events:");
            for line in &self.event_log {
                ui.monospace(line);
            }

            if let Some(status) = &self.status {
                ui.separator();
                ui.colored_label(egui::Color32::YELLOW, format!("⚠ {}", status));
            }
        });
    }
}
