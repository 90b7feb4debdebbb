//! Core sequence data - channels, notes and their ordering.
//! Channels are created on demand; nothing here talks to the audio engine.

use std::fmt;

use crate::audio::WaveTable;

pub mod envelope;
pub mod events;
pub mod playback;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChannelId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NoteId(u64);

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "note-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    pub waveform: WaveTable,
    /// 0..=1, cubed before use
    pub volume: f64,
    pub attack: f64,
    pub release: f64,
    /// Fraction of the signal sent to the reverb, 0..=1
    pub reverb: f64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            waveform: WaveTable::square(),
            volume: 1.0,
            attack: 0.0,
            release: 0.0,
            reverb: 0.0,
        }
    }
}

/// Partial config; `None` fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct ChannelConfigUpdate {
    pub waveform: Option<WaveTable>,
    pub volume: Option<f64>,
    pub attack: Option<f64>,
    pub release: Option<f64>,
    pub reverb: Option<f64>,
}

impl ChannelConfig {
    pub fn merge(&mut self, update: ChannelConfigUpdate) {
        if let Some(waveform) = update.waveform {
            self.waveform = waveform;
        }
        if let Some(volume) = update.volume {
            self.volume = volume;
        }
        if let Some(attack) = update.attack {
            self.attack = attack;
        }
        if let Some(release) = update.release {
            self.release = release;
        }
        if let Some(reverb) = update.reverb {
            self.reverb = reverb;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub id: NoteId,
    pub channel_id: ChannelId,
    /// Semitones from the reference pitch; fractional values are microtonal.
    pub pitch: f64,
    /// Seconds from sequence start.
    pub offset: f64,
    pub duration: f64,
}

impl Note {
    pub fn end(&self) -> f64 {
        self.offset + self.duration
    }
}

/// A note before it has been given an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteDraft {
    pub channel_id: ChannelId,
    pub pitch: f64,
    pub offset: f64,
    pub duration: f64,
}

/// In-place edit of an existing note (drag, resize, transpose).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoteUpdate {
    pub pitch: Option<f64>,
    pub offset: Option<f64>,
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub config: ChannelConfig,
    notes: Vec<Note>,
}

impl Channel {
    fn new(id: ChannelId, name: String) -> Self {
        Self {
            id,
            name,
            config: ChannelConfig::default(),
            notes: Vec::new(),
        }
    }

    /// Notes in ascending `offset` order.
    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    fn sort_notes(&mut self) {
        // stable: equal offsets keep insertion order
        self.notes.sort_by(|a, b| a.offset.total_cmp(&b.offset));
    }
}

/// Owns every channel and note. Lookups with unknown ids return `None`
/// rather than failing; mutators given an unknown channel id create it.
#[derive(Debug, Default)]
pub struct ChannelStore {
    channels: Vec<Channel>,
    next_note: u64,
    next_channel: u64,
}

impl ChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channels in creation order.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn note_count(&self) -> usize {
        self.channels.iter().map(|c| c.notes.len()).sum()
    }

    pub fn create_channel(&mut self, name: &str) -> &Channel {
        let id = loop {
            let candidate = ChannelId::new(format!("channel-{}", self.next_channel));
            self.next_channel += 1;
            if self.find_channel(&candidate).is_none() {
                break candidate;
            }
        };

        self.channels.push(Channel::new(id, name.to_string()));
        &self.channels[self.channels.len() - 1]
    }

    pub fn find_channel(&self, id: &ChannelId) -> Option<&Channel> {
        self.channels.iter().find(|c| &c.id == id)
    }

    fn find_channel_mut(&mut self, id: &ChannelId) -> Option<&mut Channel> {
        self.channels.iter_mut().find(|c| &c.id == id)
    }

    /// Returns the channel and whether it had to be created. A created
    /// channel is named after its id and has the default config.
    pub fn ensure_channel(&mut self, id: &ChannelId) -> (&mut Channel, bool) {
        match self.channels.iter().position(|c| &c.id == id) {
            Some(index) => (&mut self.channels[index], false),
            None => {
                self.channels
                    .push(Channel::new(id.clone(), id.as_str().to_string()));
                let last = self.channels.len() - 1;
                (&mut self.channels[last], true)
            }
        }
    }

    /// Stamp a fresh id on `draft`. The note is not inserted.
    pub fn create_note(&mut self, draft: NoteDraft) -> Note {
        let id = NoteId(self.next_note);
        self.next_note += 1;

        Note {
            id,
            channel_id: draft.channel_id,
            pitch: draft.pitch,
            offset: draft.offset,
            duration: draft.duration,
        }
    }

    /// Insert `note` keeping the channel sorted. Returns true if the
    /// channel did not exist and was created.
    pub fn add_note_to_channel(&mut self, channel_id: &ChannelId, mut note: Note) -> bool {
        let (channel, created) = self.ensure_channel(channel_id);
        note.channel_id = channel.id.clone();
        channel.notes.push(note);
        channel.sort_notes();
        created
    }

    pub fn remove_note_from_channel(
        &mut self,
        channel_id: &ChannelId,
        note_id: NoteId,
    ) -> Option<Note> {
        let channel = self.find_channel_mut(channel_id)?;
        let index = channel.notes.iter().position(|n| n.id == note_id)?;
        Some(channel.notes.remove(index))
    }

    pub fn sort_channel_notes(&mut self, channel_id: &ChannelId) {
        if let Some(channel) = self.find_channel_mut(channel_id) {
            channel.sort_notes();
        }
    }

    /// Merge `update` onto the channel's config. Returns true if the
    /// channel was created.
    pub fn update_channel_config(
        &mut self,
        channel_id: &ChannelId,
        update: ChannelConfigUpdate,
    ) -> bool {
        let (channel, created) = self.ensure_channel(channel_id);
        channel.config.merge(update);
        created
    }

    pub fn update_note(
        &mut self,
        channel_id: &ChannelId,
        note_id: NoteId,
        update: NoteUpdate,
    ) -> Option<&Note> {
        let channel = self.find_channel_mut(channel_id)?;
        let note = channel.notes.iter_mut().find(|n| n.id == note_id)?;

        if let Some(pitch) = update.pitch {
            note.pitch = pitch;
        }
        if let Some(duration) = update.duration {
            note.duration = duration;
        }
        if let Some(offset) = update.offset {
            note.offset = offset;
            channel.sort_notes();
        }

        channel.notes.iter().find(|n| n.id == note_id)
    }

    pub fn find_note(&self, channel_id: &ChannelId, note_id: NoteId) -> Option<&Note> {
        self.find_channel(channel_id)?
            .notes
            .iter()
            .find(|n| n.id == note_id)
    }
}
