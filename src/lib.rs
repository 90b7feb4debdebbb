//! NOTEGRID - sequence scheduling and playback
//!
//! This library provides the core components for a multi-channel note sequencer:
//! - Channels and notes kept in offset order
//! - Per-note dry/reverb gain envelopes
//! - A playback scheduler that turns notes into timed voices
//! - Typed lifecycle events for UIs and visualizers
//! - Audio engines: a cpal output stream and a deterministic offline clock

pub mod audio;
pub mod config;
pub mod error;
pub mod sequencer;

// Re-export commonly used types
pub use audio::{AudioEngine, CpalEngine, OfflineEngine, WaveTable};
pub use config::{Config, EngineConfig, SequenceConfig};
pub use error::{Error, Result};
pub use sequencer::envelope::{apply_channel_fx, channel_fx, ChannelFx};
pub use sequencer::events::{EventKind, SequenceEvent, SubscriptionId};
pub use sequencer::playback::{PlaybackState, Sequence};
pub use sequencer::{
    Channel, ChannelConfig, ChannelConfigUpdate, ChannelId, ChannelStore, Note, NoteDraft, NoteId,
    NoteUpdate,
};
