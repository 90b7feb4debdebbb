//! Typed publish/subscribe for playback lifecycle notifications.
//!
//! Handlers run synchronously, in subscription order, on the thread that
//! triggered the event. A handler cannot reach back into the sequence that
//! owns the bus, so dispatch is never re-entrant.

use std::fmt;

use super::{Channel, Note};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Play,
    Stop,
    Ended,
    NoteStart,
    NoteEnd,
    CreateChannel,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Play => "play",
            EventKind::Stop => "stop",
            EventKind::Ended => "ended",
            EventKind::NoteStart => "note-start",
            EventKind::NoteEnd => "note-end",
            EventKind::CreateChannel => "create-channel",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SequenceEvent {
    Play,
    Stop,
    Ended,
    NoteStart(Note),
    NoteEnd(Note),
    CreateChannel(Channel),
}

impl SequenceEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SequenceEvent::Play => EventKind::Play,
            SequenceEvent::Stop => EventKind::Stop,
            SequenceEvent::Ended => EventKind::Ended,
            SequenceEvent::NoteStart(_) => EventKind::NoteStart,
            SequenceEvent::NoteEnd(_) => EventKind::NoteEnd,
            SequenceEvent::CreateChannel(_) => EventKind::CreateChannel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Box<dyn FnMut(&SequenceEvent)>;

struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    handler: Handler,
}

#[derive(Default)]
pub struct EventBus {
    subscriptions: Vec<Subscription>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(
        &mut self,
        kind: EventKind,
        handler: impl FnMut(&SequenceEvent) + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscriptions.push(Subscription {
            id,
            kind,
            handler: Box::new(handler),
        });
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn off(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.subscriptions.iter().filter(|s| s.kind == kind).count()
    }

    pub fn emit(&mut self, event: &SequenceEvent) {
        let kind = event.kind();
        for subscription in self.subscriptions.iter_mut().filter(|s| s.kind == kind) {
            (subscription.handler)(event);
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}
