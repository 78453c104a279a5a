//! Event bus recorder

use std::sync::Arc;

use parking_lot::Mutex;

use crate::events::{EventBus, EventKind, PlayerEvent, SubscriptionId};
use crate::types::PlaybackState;

/// Collects every event published on a bus
#[derive(Debug, Clone)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<PlayerEvent>>>,
    subscription: SubscriptionId,
}

impl EventRecorder {
    pub fn attach(bus: &EventBus) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let subscription = bus.subscribe(move |event| sink.lock().push(event.clone()));
        Self {
            events,
            subscription,
        }
    }

    pub fn subscription(&self) -> SubscriptionId {
        self.subscription
    }

    pub fn events(&self) -> Vec<PlayerEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(PlayerEvent::kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.kind() == kind)
            .count()
    }

    /// Target states of every recorded transition, in order
    pub fn states(&self) -> Vec<PlaybackState> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                PlayerEvent::PlaybackStateChange { state, .. } => Some(*state),
                _ => None,
            })
            .collect()
    }

    /// Events of one kind, in order
    pub fn of_kind(&self, kind: EventKind) -> Vec<PlayerEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}
