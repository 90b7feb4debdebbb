//! Playback scheduler - turns the channel store into timed voices and
//! keeps observers in step with the audio clock.
//!
//! Voice onsets have no engine callback, so the host calls [`Sequence::tick`]
//! once per frame: it hands voices inside the lookahead window to the
//! engine, publishes `note-start` for every onset the clock has passed and
//! then dispatches completed voices as `note-end`/`ended`.

use std::collections::{HashMap, VecDeque};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};

use super::envelope::apply_channel_fx;
use super::events::{EventBus, EventKind, SequenceEvent, SubscriptionId};
use super::{
    Channel, ChannelConfig, ChannelConfigUpdate, ChannelId, ChannelStore, Note, NoteDraft,
    NoteId, NoteUpdate,
};
use crate::audio::{AudioEngine, ReverbId, VoiceId, VoiceRequest};
use crate::config::SequenceConfig;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
}

/// A note captured at `play()` together with its channel's config, so later
/// edits cannot leak into the running session.
struct QueuedNote {
    note: Note,
    config: ChannelConfig,
}

struct Completion {
    session: u64,
    voice: VoiceId,
}

pub struct Sequence<E: AudioEngine> {
    store: ChannelStore,
    bus: EventBus,
    engine: E,
    config: SequenceConfig,
    state: PlaybackState,
    session: u64,
    play_start_time: f64,
    /// Notes not yet announced with `note-start`, ascending by offset.
    pending: VecDeque<Note>,
    /// Notes not yet handed to the engine, ascending by offset.
    unscheduled: VecDeque<QueuedNote>,
    voices: HashMap<VoiceId, Note>,
    last_note: Option<NoteId>,
    reverb_sends: HashMap<ChannelId, ReverbId>,
    completion_tx: Sender<Completion>,
    completion_rx: Receiver<Completion>,
}

impl<E: AudioEngine> Sequence<E> {
    /// The engine is expected to be initialised already.
    pub fn new(engine: E, config: SequenceConfig) -> Self {
        let (completion_tx, completion_rx) = unbounded();

        Self {
            store: ChannelStore::new(),
            bus: EventBus::new(),
            engine,
            config,
            state: PlaybackState::Idle,
            session: 0,
            play_start_time: 0.0,
            pending: VecDeque::new(),
            unscheduled: VecDeque::new(),
            voices: HashMap::new(),
            last_note: None,
            reverb_sends: HashMap::new(),
            completion_tx,
            completion_rx,
        }
    }

    pub fn store(&self) -> &ChannelStore {
        &self.store
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn config(&self) -> &SequenceConfig {
        &self.config
    }

    // --- events -----------------------------------------------------------

    pub fn on(
        &mut self,
        kind: EventKind,
        handler: impl FnMut(&SequenceEvent) + 'static,
    ) -> SubscriptionId {
        self.bus.on(kind, handler)
    }

    pub fn off(&mut self, id: SubscriptionId) -> bool {
        self.bus.off(id)
    }

    fn emit(&mut self, event: SequenceEvent) {
        self.bus.emit(&event);
    }

    // --- store ------------------------------------------------------------

    pub fn channels(&self) -> &[Channel] {
        self.store.channels()
    }

    pub fn create_channel(&mut self, name: &str) -> &Channel {
        self.store.create_channel(name)
    }

    pub fn find_channel(&self, id: &ChannelId) -> Option<&Channel> {
        self.store.find_channel(id)
    }

    /// Explicit form of the implicit creation the mutators perform.
    pub fn ensure_channel(&mut self, id: &ChannelId) -> &Channel {
        self.ensure_channel_announced(id);
        let (channel, _) = self.store.ensure_channel(id);
        channel
    }

    pub fn create_note(&mut self, draft: NoteDraft) -> Note {
        self.store.create_note(draft)
    }

    pub fn add_note_to_channel(&mut self, channel_id: &ChannelId, note: Note) {
        self.ensure_channel_announced(channel_id);
        self.store.add_note_to_channel(channel_id, note);
    }

    pub fn remove_note_from_channel(
        &mut self,
        channel_id: &ChannelId,
        note_id: NoteId,
    ) -> Option<Note> {
        self.store.remove_note_from_channel(channel_id, note_id)
    }

    pub fn sort_channel_notes(&mut self, channel_id: &ChannelId) {
        self.store.sort_channel_notes(channel_id);
    }

    pub fn update_channel_config(&mut self, channel_id: &ChannelId, update: ChannelConfigUpdate) {
        self.ensure_channel_announced(channel_id);
        self.store.update_channel_config(channel_id, update);
    }

    pub fn update_note(
        &mut self,
        channel_id: &ChannelId,
        note_id: NoteId,
        update: NoteUpdate,
    ) -> Option<&Note> {
        self.store.update_note(channel_id, note_id, update)
    }

    pub fn find_note(&self, channel_id: &ChannelId, note_id: NoteId) -> Option<&Note> {
        self.store.find_note(channel_id, note_id)
    }

    fn ensure_channel_announced(&mut self, id: &ChannelId) {
        let (channel, created) = self.store.ensure_channel(id);
        if created {
            let channel = channel.clone();
            info!("implicitly created channel {}", channel.id);
            self.emit(SequenceEvent::CreateChannel(channel));
        }
    }

    // --- playback -----------------------------------------------------------

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    /// Seconds since the current session started; `None` while idle.
    pub fn play_offset_time(&self) -> Option<f64> {
        self.is_playing()
            .then(|| self.engine.current_time() - self.play_start_time)
    }

    /// Snapshot of the notes still waiting for `note-start`.
    pub fn pending_notes(&self) -> Vec<Note> {
        self.pending.iter().cloned().collect()
    }

    pub fn next_note(&self) -> Option<&Note> {
        self.pending.front()
    }

    /// Start playback from the top. Calling this while already playing
    /// cancels the running session first.
    pub fn play(&mut self) -> Result<()> {
        if self.is_playing() {
            info!("restarting playback");
        }
        self.cancel_session();
        self.session += 1;

        let mut queue = Vec::with_capacity(self.store.note_count());
        let mut last: Option<&Note> = None;
        for channel in self.store.channels() {
            for note in channel.notes() {
                // ties go to the first note in channel/note order
                if last.map_or(true, |l| note.end() > l.end()) {
                    last = Some(note);
                }
                queue.push(QueuedNote {
                    note: note.clone(),
                    config: channel.config.clone(),
                });
            }
        }
        self.last_note = last.map(|n| n.id);
        // stable, so equal offsets stay in channel order
        queue.sort_by(|a, b| a.note.offset.total_cmp(&b.note.offset));

        self.pending = queue.iter().map(|q| q.note.clone()).collect();
        self.unscheduled = queue.into();
        self.play_start_time = self.engine.current_time();
        self.state = PlaybackState::Playing;

        if let Err(e) = self.schedule_window() {
            self.cancel_session();
            return Err(e);
        }

        info!(
            "playing {} notes from t={:.3}",
            self.pending.len(),
            self.play_start_time
        );
        self.emit(SequenceEvent::Play);

        if self.last_note.is_none() {
            // nothing to wait for
            self.finish_session();
        }
        Ok(())
    }

    /// Hard-stop every outstanding voice. Only a running session publishes
    /// `stop`; calling this while idle just silences any release tails.
    pub fn stop(&mut self) {
        let was_playing = self.is_playing();
        self.cancel_session();

        if was_playing {
            info!("stopped");
            self.emit(SequenceEvent::Stop);
        }
    }

    /// Host entry point, once per rendering frame.
    pub fn tick(&mut self) -> Result<()> {
        self.engine.poll();

        let scheduled = if self.is_playing() {
            self.schedule_window()
        } else {
            Ok(())
        };

        self.trigger_note_start_handlers();
        self.dispatch_completions();
        scheduled
    }

    /// Publish `note-start` for every pending note whose offset the clock
    /// has passed, in offset order.
    pub fn trigger_note_start_handlers(&mut self) {
        let Some(t) = self.play_offset_time() else {
            return;
        };

        while self.pending.front().is_some_and(|n| n.offset < t) {
            if let Some(note) = self.pending.pop_front() {
                self.emit(SequenceEvent::NoteStart(note));
            }
        }
    }

    /// Play one note right now on `channel_id`, outside any session.
    pub fn audition(
        &mut self,
        channel_id: &ChannelId,
        pitch: f64,
        duration: f64,
    ) -> Result<VoiceId> {
        self.ensure_channel_announced(channel_id);
        let config = self
            .store
            .find_channel(channel_id)
            .map(|c| c.config.clone())
            .unwrap_or_default();

        let reverb = self.reverb_send(channel_id)?;
        let start = self.engine.current_time();
        let voice = self.engine.create_voice(VoiceRequest {
            waveform: config.waveform.clone(),
            pitch,
            start_time: start,
            reverb,
        })?;
        let fx = apply_channel_fx(&mut self.engine, voice, &config, start, start + duration);
        self.engine.stop_voice(voice, fx.stop_time);

        debug!("audition {} pitch {} on {}", voice, pitch, channel_id);
        Ok(voice)
    }

    fn schedule_window(&mut self) -> Result<()> {
        let horizon = match self.config.schedule_ahead_secs {
            Some(window) => self.engine.current_time() - self.play_start_time + window,
            None => f64::INFINITY,
        };

        while self
            .unscheduled
            .front()
            .is_some_and(|q| q.note.offset <= horizon)
        {
            if let Some(queued) = self.unscheduled.pop_front() {
                self.schedule_note(queued)?;
            }
        }
        Ok(())
    }

    fn schedule_note(&mut self, queued: QueuedNote) -> Result<()> {
        let QueuedNote { note, config } = queued;
        let reverb = self.reverb_send(&note.channel_id)?;

        let start = self.play_start_time + note.offset;
        let end = start + note.duration;
        let now = self.engine.current_time();
        if start < now {
            warn!("{} scheduled {:.3}s late", note.id, now - start);
        }

        let voice = self.engine.create_voice(VoiceRequest {
            waveform: config.waveform.clone(),
            pitch: note.pitch,
            start_time: start,
            reverb,
        })?;
        let fx = apply_channel_fx(&mut self.engine, voice, &config, start, end);
        self.engine.stop_voice(voice, fx.stop_time);

        let tx = self.completion_tx.clone();
        let session = self.session;
        self.engine.on_voice_ended(
            voice,
            Box::new(move |voice| {
                let _ = tx.send(Completion { session, voice });
            }),
        );

        debug!(
            "{} -> {} at {:.3}..{:.3} (stop {:.3})",
            note.id, voice, start, end, fx.stop_time
        );
        self.voices.insert(voice, note);
        Ok(())
    }

    fn reverb_send(&mut self, channel_id: &ChannelId) -> Result<ReverbId> {
        if let Some(id) = self.reverb_sends.get(channel_id) {
            return Ok(*id);
        }
        let id = self.engine.create_reverb_send()?;
        self.reverb_sends.insert(channel_id.clone(), id);
        Ok(id)
    }

    fn dispatch_completions(&mut self) {
        while let Ok(completion) = self.completion_rx.try_recv() {
            if completion.session != self.session {
                debug!("dropping stale completion of {}", completion.voice);
                continue;
            }
            let Some(note) = self.voices.remove(&completion.voice) else {
                continue;
            };

            let is_last = self.is_playing() && self.last_note == Some(note.id);
            self.emit(SequenceEvent::NoteEnd(note));
            if is_last {
                self.finish_session();
            }
        }
    }

    fn finish_session(&mut self) {
        self.state = PlaybackState::Idle;
        self.pending.clear();
        self.unscheduled.clear();
        self.last_note = None;
        info!("playback ended");
        self.emit(SequenceEvent::Ended);
    }

    /// Stop and disconnect every outstanding voice and forget the session.
    fn cancel_session(&mut self) {
        let now = self.engine.current_time();
        for (voice, _) in self.voices.drain() {
            self.engine.stop_voice(voice, now);
            self.engine.disconnect_voice(voice);
        }

        self.state = PlaybackState::Idle;
        self.pending.clear();
        self.unscheduled.clear();
        self.last_note = None;
        self.session += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{OfflineEngine, WaveTable};
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    fn sequence(window: Option<f64>) -> Sequence<OfflineEngine> {
        let mut engine = OfflineEngine::default();
        engine.init().unwrap();
        Sequence::new(
            engine,
            SequenceConfig {
                schedule_ahead_secs: window,
            },
        )
    }

    fn record(seq: &mut Sequence<OfflineEngine>) -> Log {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        for kind in [
            EventKind::Play,
            EventKind::Stop,
            EventKind::Ended,
            EventKind::NoteStart,
            EventKind::NoteEnd,
            EventKind::CreateChannel,
        ] {
            let log = Rc::clone(&log);
            seq.on(kind, move |event| {
                let entry = match event {
                    SequenceEvent::NoteStart(n) | SequenceEvent::NoteEnd(n) => {
                        format!("{}@{}", event.kind(), n.offset)
                    }
                    SequenceEvent::CreateChannel(c) => format!("{}:{}", event.kind(), c.id),
                    _ => event.kind().to_string(),
                };
                log.borrow_mut().push(entry);
            });
        }
        log
    }

    fn add(seq: &mut Sequence<OfflineEngine>, channel: &str, offset: f64, duration: f64) -> Note {
        let channel_id = ChannelId::from(channel);
        let note = seq.create_note(NoteDraft {
            channel_id: channel_id.clone(),
            pitch: 0.0,
            offset,
            duration,
        });
        seq.add_note_to_channel(&channel_id, note.clone());
        note
    }

    /// offsets [0.0, 0.5, 1.2], durations [1.0, 1.0, 0.5]
    fn three_notes(seq: &mut Sequence<OfflineEngine>) {
        add(seq, "lead", 0.0, 1.0);
        add(seq, "lead", 0.5, 1.0);
        add(seq, "lead", 1.2, 0.5);
    }

    fn run_until(seq: &mut Sequence<OfflineEngine>, until: f64, step: f64) {
        let mut t = seq.engine().current_time();
        while t < until {
            t += step;
            seq.engine_mut().advance_to(t);
            seq.tick().unwrap();
        }
    }

    fn count(log: &Log, entry: &str) -> usize {
        log.borrow().iter().filter(|e| e.as_str() == entry).count()
    }

    #[test]
    fn test_initial_state() {
        let seq = sequence(None);
        assert_eq!(seq.state(), PlaybackState::Idle);
        assert!(!seq.is_playing());
        assert_eq!(seq.play_offset_time(), None);
        assert!(seq.next_note().is_none());
    }

    #[test]
    fn test_note_start_order() {
        let mut seq = sequence(None);
        three_notes(&mut seq);
        let log = record(&mut seq);

        seq.play().unwrap();
        run_until(&mut seq, 3.0, 0.05);

        let starts: Vec<String> = log
            .borrow()
            .iter()
            .filter(|e| e.starts_with("note-start"))
            .cloned()
            .collect();
        assert_eq!(
            starts,
            vec!["note-start@0", "note-start@0.5", "note-start@1.2"]
        );
    }

    #[test]
    fn test_long_frame_fires_every_missed_onset() {
        let mut seq = sequence(None);
        three_notes(&mut seq);
        let log = record(&mut seq);

        seq.play().unwrap();
        seq.engine_mut().advance_to(1.3);
        seq.trigger_note_start_handlers();

        assert_eq!(
            *log.borrow(),
            vec!["play", "note-start@0", "note-start@0.5", "note-start@1.2"]
        );
        assert!(seq.pending_notes().is_empty());

        // ticking again never repeats an onset
        seq.trigger_note_start_handlers();
        assert_eq!(log.borrow().len(), 4);
    }

    #[test]
    fn test_long_tick_starts_before_it_ends() {
        let mut seq = sequence(None);
        three_notes(&mut seq);
        let log = record(&mut seq);

        seq.play().unwrap();
        seq.engine_mut().advance_to(5.0);
        seq.tick().unwrap();

        assert_eq!(
            *log.borrow(),
            vec![
                "play",
                "note-start@0",
                "note-start@0.5",
                "note-start@1.2",
                "note-end@0",
                "note-end@0.5",
                "note-end@1.2",
                "ended",
            ]
        );
    }

    /// "a" ends the session at 1.0; "b" keeps a release tail until 2.5.
    fn with_release_tail(seq: &mut Sequence<OfflineEngine>) {
        add(seq, "a", 0.0, 1.0);
        add(seq, "b", 0.25, 0.25);
        seq.update_channel_config(
            &ChannelId::from("b"),
            ChannelConfigUpdate {
                release: Some(2.0),
                ..Default::default()
            },
        );
    }

    #[test]
    fn test_release_tail_ends_after_session() {
        let mut seq = sequence(None);
        with_release_tail(&mut seq);
        let log = record(&mut seq);

        seq.play().unwrap();
        run_until(&mut seq, 3.0, 0.1);

        let log = log.borrow();
        let ended = log.iter().position(|e| e == "ended").unwrap();
        let tail = log.iter().position(|e| e == "note-end@0.25").unwrap();
        assert!(ended < tail, "{:?}", *log);
        assert_eq!(log.iter().filter(|e| *e == "ended").count(), 1);
    }

    #[test]
    fn test_idle_stop_silences_release_tail() {
        let mut seq = sequence(None);
        with_release_tail(&mut seq);
        let log = record(&mut seq);

        seq.play().unwrap();
        run_until(&mut seq, 1.2, 0.1);
        assert!(!seq.is_playing());
        assert_eq!(count(&log, "ended"), 1);
        assert_eq!(count(&log, "note-end@0.25"), 0);

        let now = seq.engine().current_time();
        seq.stop();

        let tail = seq
            .engine()
            .voices()
            .find(|(_, v)| v.request.start_time == 0.25)
            .map(|(_, v)| v)
            .unwrap();
        assert!(tail.disconnected);
        assert_relative_eq!(tail.stop_time.unwrap(), now, epsilon = 1e-9);

        run_until(&mut seq, 3.0, 0.1);
        assert_eq!(count(&log, "stop"), 0);
        assert_eq!(count(&log, "note-end@0.25"), 0);
    }

    #[test]
    fn test_natural_end_follows_latest_ending_note() {
        let mut seq = sequence(None);
        three_notes(&mut seq);
        let log = record(&mut seq);

        seq.play().unwrap();
        run_until(&mut seq, 3.0, 0.1);

        let log = log.borrow();
        assert_eq!(log.iter().filter(|e| *e == "ended").count(), 1);
        assert_eq!(log.last().map(String::as_str), Some("ended"));
        let ended = log.iter().position(|e| e == "ended").unwrap();
        assert_eq!(log[ended - 1], "note-end@1.2");
        assert!(!seq.is_playing());
    }

    #[test]
    fn test_note_end_follows_completion_order() {
        let mut seq = sequence(None);
        add(&mut seq, "a", 0.0, 2.0);
        add(&mut seq, "b", 0.5, 0.5);
        let log = record(&mut seq);

        seq.play().unwrap();
        run_until(&mut seq, 3.0, 0.1);

        let ends: Vec<String> = log
            .borrow()
            .iter()
            .filter(|e| e.starts_with("note-end"))
            .cloned()
            .collect();
        assert_eq!(ends, vec!["note-end@0.5", "note-end@0"]);
    }

    #[test]
    fn test_stop_preempts_end() {
        let mut seq = sequence(None);
        three_notes(&mut seq);
        let log = record(&mut seq);

        seq.play().unwrap();
        run_until(&mut seq, 0.3, 0.1);
        seq.stop();
        assert!(!seq.is_playing());

        // cancelled voices still report completion; none may surface
        run_until(&mut seq, 3.0, 0.1);
        seq.trigger_note_start_handlers();

        let log = log.borrow();
        assert_eq!(*log, vec!["play", "note-start@0", "stop"]);
    }

    #[test]
    fn test_stop_hard_stops_voices() {
        let mut seq = sequence(None);
        three_notes(&mut seq);
        seq.play().unwrap();
        seq.engine_mut().advance_to(0.3);
        seq.stop();

        for (_, voice) in seq.engine().voices() {
            assert_relative_eq!(voice.stop_time.unwrap(), 0.3, epsilon = 1e-9);
            assert!(voice.disconnected);
        }
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut seq = sequence(None);
        three_notes(&mut seq);
        let log = record(&mut seq);

        seq.play().unwrap();
        seq.stop();
        seq.stop();

        assert_eq!(count(&log, "stop"), 1);
        assert!(!seq.is_playing());

        // stop while never played publishes nothing
        let mut idle = sequence(None);
        let idle_log = record(&mut idle);
        idle.stop();
        assert!(idle_log.borrow().is_empty());
    }

    #[test]
    fn test_play_schedules_absolute_times() {
        let mut seq = sequence(None);
        seq.engine_mut().advance_to(10.0);
        let note = add(&mut seq, "lead", 0.5, 1.0);
        seq.update_channel_config(
            &ChannelId::from("lead"),
            ChannelConfigUpdate {
                release: Some(0.25),
                ..Default::default()
            },
        );

        seq.play().unwrap();

        assert_eq!(seq.play_offset_time(), Some(0.0));
        let (_, voice) = seq.engine().voices().next().unwrap();
        assert_eq!(voice.request.start_time, 10.5);
        assert_eq!(voice.request.pitch, note.pitch);
        assert_eq!(voice.stop_time, Some(11.75));
    }

    #[test]
    fn test_removed_note_is_not_scheduled() {
        let mut seq = sequence(None);
        let keep = add(&mut seq, "lead", 0.0, 1.0);
        let gone = add(&mut seq, "lead", 0.5, 1.0);
        let id = ChannelId::from("lead");

        assert!(seq.remove_note_from_channel(&id, gone.id).is_some());
        assert!(seq.find_note(&id, gone.id).is_none());

        seq.play().unwrap();
        assert_eq!(seq.engine().voice_count(), 1);
        assert_eq!(seq.pending_notes(), vec![keep]);
    }

    #[test]
    fn test_cross_channel_merge() {
        let mut seq = sequence(None);
        add(&mut seq, "a", 1.0, 0.5);
        add(&mut seq, "b", 0.25, 0.5);
        add(&mut seq, "a", 0.0, 0.5);
        add(&mut seq, "b", 1.0, 0.5);

        seq.play().unwrap();

        let pending: Vec<(f64, String)> = seq
            .pending_notes()
            .iter()
            .map(|n| (n.offset, n.channel_id.to_string()))
            .collect();
        assert_eq!(
            pending,
            vec![
                (0.0, "a".to_string()),
                (0.25, "b".to_string()),
                (1.0, "a".to_string()),
                (1.0, "b".to_string()),
            ]
        );
        assert_eq!(seq.next_note().map(|n| n.offset), Some(0.0));
    }

    #[test]
    fn test_empty_sequence_ends_immediately() {
        let mut seq = sequence(None);
        let log = record(&mut seq);

        seq.play().unwrap();

        assert_eq!(*log.borrow(), vec!["play", "ended"]);
        assert!(!seq.is_playing());
    }

    #[test]
    fn test_replay_restarts_session() {
        let mut seq = sequence(None);
        three_notes(&mut seq);
        let log = record(&mut seq);

        seq.play().unwrap();
        run_until(&mut seq, 0.6, 0.1);
        seq.play().unwrap();

        // first session's three voices were cancelled
        let cancelled = seq
            .engine()
            .voices()
            .filter(|(_, v)| v.disconnected)
            .count();
        assert_eq!(cancelled, 3);
        assert_eq!(seq.pending_notes().len(), 3);

        run_until(&mut seq, 4.0, 0.1);

        assert_eq!(count(&log, "play"), 2);
        assert_eq!(count(&log, "stop"), 0);
        assert_eq!(count(&log, "ended"), 1);
        // one onset per note from the first pass (0, 0.5), all three from the second
        assert_eq!(count(&log, "note-start@0"), 2);
        assert_eq!(count(&log, "note-start@1.2"), 1);
        // only the second session's voices report completion
        assert_eq!(count(&log, "note-end@0"), 1);
        assert_eq!(count(&log, "note-end@1.2"), 1);
    }

    #[test]
    fn test_ended_tie_goes_to_first_note() {
        let mut seq = sequence(None);
        let first = add(&mut seq, "a", 0.0, 1.0);
        add(&mut seq, "b", 0.5, 0.5);

        seq.play().unwrap();
        assert_eq!(seq.last_note, Some(first.id));
    }

    #[test]
    fn test_implicit_channel_creation_is_announced() {
        let mut seq = sequence(None);
        let log = record(&mut seq);

        let explicit = seq.create_channel("Lead").id.clone();
        add(&mut seq, explicit.as_str(), 0.0, 1.0);
        add(&mut seq, "drums", 0.0, 1.0);
        add(&mut seq, "drums", 1.0, 1.0);
        seq.update_channel_config(&ChannelId::from("pad"), ChannelConfigUpdate::default());

        assert_eq!(
            *log.borrow(),
            vec!["create-channel:drums", "create-channel:pad"]
        );
        assert_eq!(seq.channels().len(), 3);
    }

    #[test]
    fn test_ensure_channel_and_audition_announce_new_channels() {
        let mut seq = sequence(None);
        let log = record(&mut seq);

        let pad = ChannelId::from("pad");
        assert_eq!(seq.ensure_channel(&pad).id, pad);
        seq.ensure_channel(&pad);
        seq.audition(&ChannelId::from("solo"), 0.0, 0.5).unwrap();
        seq.audition(&ChannelId::from("solo"), 2.0, 0.5).unwrap();

        assert_eq!(
            *log.borrow(),
            vec!["create-channel:pad", "create-channel:solo"]
        );
    }

    #[test]
    fn test_edits_during_playback_do_not_affect_session() {
        let mut seq = sequence(None);
        let note = add(&mut seq, "lead", 0.0, 1.0);
        let log = record(&mut seq);

        seq.play().unwrap();
        let id = ChannelId::from("lead");
        seq.remove_note_from_channel(&id, note.id);
        add(&mut seq, "lead", 0.2, 5.0);
        run_until(&mut seq, 1.5, 0.1);

        assert_eq!(count(&log, "note-start@0"), 1);
        assert_eq!(count(&log, "note-start@0.2"), 0);
        assert_eq!(count(&log, "ended"), 1);
    }

    #[test]
    fn test_lookahead_window_schedules_progressively() {
        let mut seq = sequence(Some(1.0));
        for i in 0..6 {
            add(&mut seq, "lead", i as f64, 0.5);
        }
        let log = record(&mut seq);

        seq.play().unwrap();
        // offsets 0 and 1 are inside the first window
        assert_eq!(seq.engine().voice_count(), 2);
        assert_eq!(seq.pending_notes().len(), 6);

        run_until(&mut seq, 2.55, 0.1);
        assert_eq!(seq.engine().voice_count(), 4);

        run_until(&mut seq, 7.0, 0.1);
        assert_eq!(seq.engine().voice_count(), 6);
        assert_eq!(count(&log, "ended"), 1);

        // every voice still starts on its absolute time
        let starts: Vec<f64> = seq
            .engine()
            .voices()
            .map(|(_, v)| v.request.start_time)
            .collect();
        assert_eq!(starts, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_reverb_send_per_channel() {
        let mut seq = sequence(None);
        add(&mut seq, "a", 0.0, 1.0);
        add(&mut seq, "a", 0.5, 1.0);
        add(&mut seq, "b", 0.0, 1.0);

        seq.play().unwrap();
        seq.play().unwrap();

        assert_eq!(seq.engine().reverb_send_count(), 2);
    }

    #[test]
    fn test_audition_uses_channel_fx() {
        let mut seq = sequence(None);
        let id = ChannelId::from("lead");
        seq.update_channel_config(
            &id,
            ChannelConfigUpdate {
                waveform: Some(WaveTable::sine()),
                volume: Some(0.5),
                release: Some(0.5),
                ..Default::default()
            },
        );
        seq.engine_mut().advance_to(2.0);

        let voice = seq.audition(&id, 7.0, 1.0).unwrap();

        let recorded = seq.engine().voice(voice).unwrap();
        assert_eq!(recorded.request.waveform, WaveTable::sine());
        assert_eq!(recorded.request.start_time, 2.0);
        assert_eq!(recorded.stop_time, Some(3.5));
        assert_relative_eq!(recorded.dry.peak(), 0.125, epsilon = 1e-9);
        assert!(!seq.is_playing());
    }

    #[test]
    fn test_play_fails_without_engine() {
        let mut seq = Sequence::new(OfflineEngine::default(), SequenceConfig::default());
        add(&mut seq, "lead", 0.0, 1.0);

        assert!(seq.play().is_err());
        assert!(!seq.is_playing());
        assert!(seq.pending_notes().is_empty());
    }

    // Offsets and durations stay non-negative; the store does not validate
    // input, so out-of-range notes are outside what is checked here.
    proptest! {
        #[test]
        fn test_note_start_fires_once_in_offset_order(
            notes in prop::collection::vec((0.0_f64..8.0, 0.01_f64..1.0), 1..24),
            step in 0.01_f64..1.5,
            window in prop::option::of(0.1_f64..3.0),
        ) {
            let mut seq = sequence(window);
            let mut ids = Vec::new();
            for (i, (offset, duration)) in notes.iter().enumerate() {
                let channel = if i % 2 == 0 { "a" } else { "b" };
                ids.push(add(&mut seq, channel, *offset, *duration).id);
            }

            let started = Rc::new(RefCell::new(Vec::new()));
            let s = Rc::clone(&started);
            seq.on(EventKind::NoteStart, move |event| {
                if let SequenceEvent::NoteStart(note) = event {
                    s.borrow_mut().push((note.id, note.offset));
                }
            });

            seq.play().unwrap();
            run_until(&mut seq, 10.0, step);
            prop_assert!(!seq.is_playing());

            let started = started.borrow();
            prop_assert!(started.windows(2).all(|w| w[0].1 <= w[1].1));

            let mut seen: Vec<NoteId> = started.iter().map(|(id, _)| *id).collect();
            seen.sort();
            ids.sort();
            prop_assert_eq!(seen, ids);
        }
    }
}
