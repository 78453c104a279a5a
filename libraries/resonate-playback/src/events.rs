//! Player events and the per-engine event bus
//!
//! Events are the only way to observe engine and queue state. Each engine
//! owns one `EventBus`; there is no global store, so engines stay independent.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::PlaybackErrorInfo;
use crate::types::{PlaybackState, QueueItem, Track};

/// Events emitted by the engine and its queue
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlayerEvent {
    /// Lifecycle transition
    PlaybackStateChange {
        state: PlaybackState,
        previous: PlaybackState,
    },

    /// Current track replaced or cleared
    TrackChange { track: Option<Track> },

    BufferingStateChange { buffering: bool },

    /// Position update, driven by the media element
    TimeUpdate { current_time: f64, duration: f64 },

    DurationChange { duration: f64 },

    VolumeChange { volume: f32, muted: bool },

    RateChange { rate: f32 },

    Error(PlaybackErrorInfo),

    /// Enough data buffered to start; once per load
    BufferLoaded,

    /// Natural end of the current track
    Ended,

    /// A seek was applied
    Seek { time: f64 },

    /// Queue items or order changed
    QueueChange {
        items: Vec<QueueItem>,
        current_index: Option<usize>,
    },

    /// Queue current item changed
    ActiveItemChange {
        item: Option<QueueItem>,
        index: Option<usize>,
    },

    /// Submission refused because the queue processor is full
    QueueRejected { id: String },

    /// Analyser output, `fft_size / 2` byte bins
    FrequencyDataUpdate { data: Vec<u8> },

    /// The audio-processing context was built
    ContextInitialized { sample_rate: f32 },
}

/// Event discriminant, for filtered subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PlaybackStateChange,
    TrackChange,
    BufferingStateChange,
    TimeUpdate,
    DurationChange,
    VolumeChange,
    RateChange,
    Error,
    BufferLoaded,
    Ended,
    Seek,
    QueueChange,
    ActiveItemChange,
    QueueRejected,
    FrequencyDataUpdate,
    ContextInitialized,
}

impl PlayerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PlayerEvent::PlaybackStateChange { .. } => EventKind::PlaybackStateChange,
            PlayerEvent::TrackChange { .. } => EventKind::TrackChange,
            PlayerEvent::BufferingStateChange { .. } => EventKind::BufferingStateChange,
            PlayerEvent::TimeUpdate { .. } => EventKind::TimeUpdate,
            PlayerEvent::DurationChange { .. } => EventKind::DurationChange,
            PlayerEvent::VolumeChange { .. } => EventKind::VolumeChange,
            PlayerEvent::RateChange { .. } => EventKind::RateChange,
            PlayerEvent::Error(_) => EventKind::Error,
            PlayerEvent::BufferLoaded => EventKind::BufferLoaded,
            PlayerEvent::Ended => EventKind::Ended,
            PlayerEvent::Seek { .. } => EventKind::Seek,
            PlayerEvent::QueueChange { .. } => EventKind::QueueChange,
            PlayerEvent::ActiveItemChange { .. } => EventKind::ActiveItemChange,
            PlayerEvent::QueueRejected { .. } => EventKind::QueueRejected,
            PlayerEvent::FrequencyDataUpdate { .. } => EventKind::FrequencyDataUpdate,
            PlayerEvent::ContextInitialized { .. } => EventKind::ContextInitialized,
        }
    }
}

/// Subscriber callback
pub type EventCallback = Arc<dyn Fn(&PlayerEvent) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    filter: Option<EventKind>,
    callback: EventCallback,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    list: Vec<Subscriber>,
}

/// Typed publish/subscribe
///
/// Callbacks run synchronously on the publishing thread, in subscription
/// order, without the bus lock held; a callback may subscribe, unsubscribe or
/// publish.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Subscribers>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event
    pub fn subscribe(&self, callback: impl Fn(&PlayerEvent) + Send + Sync + 'static) -> SubscriptionId {
        self.add(None, Arc::new(callback))
    }

    /// Receive events of one kind
    pub fn subscribe_to(
        &self,
        kind: EventKind,
        callback: impl Fn(&PlayerEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.add(Some(kind), Arc::new(callback))
    }

    /// Returns false if the id was not subscribed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.list.len();
        subscribers.list.retain(|s| s.id != id);
        subscribers.list.len() != before
    }

    pub fn publish(&self, event: &PlayerEvent) {
        let kind = event.kind();
        let callbacks: Vec<EventCallback> = self
            .subscribers
            .lock()
            .list
            .iter()
            .filter(|s| s.filter.map_or(true, |filter| filter == kind))
            .map(|s| Arc::clone(&s.callback))
            .collect();

        for callback in callbacks {
            callback(event);
        }
    }

    /// Drop every subscriber
    pub fn clear(&self) {
        self.subscribers.lock().list.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().list.len()
    }

    fn add(&self, filter: Option<EventKind>, callback: EventCallback) -> SubscriptionId {
        let mut subscribers = self.subscribers.lock();
        subscribers.next_id += 1;
        let id = SubscriptionId(subscribers.next_id);
        subscribers.list.push(Subscriber {
            id,
            filter,
            callback,
        });
        id
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn filtered_subscription_sees_only_its_kind() {
        let bus = EventBus::new();
        let all = Arc::new(AtomicUsize::new(0));
        let ended = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&all);
        bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&ended);
        bus.subscribe_to(EventKind::Ended, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&PlayerEvent::BufferLoaded);
        bus.publish(&PlayerEvent::Ended);

        assert_eq!(all.load(Ordering::SeqCst), 2);
        assert_eq!(ended.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(&PlayerEvent::Ended);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn callback_may_unsubscribe_itself() {
        let bus = Arc::new(EventBus::new());
        let slot = Arc::new(Mutex::new(None::<SubscriptionId>));

        let inner_bus = Arc::clone(&bus);
        let inner_slot = Arc::clone(&slot);
        let id = bus.subscribe(move |_| {
            if let Some(id) = inner_slot.lock().take() {
                inner_bus.unsubscribe(id);
            }
        });
        *slot.lock() = Some(id);

        bus.publish(&PlayerEvent::Ended);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn event_kind_matches_variant() {
        let event = PlayerEvent::VolumeChange {
            volume: 0.0,
            muted: true,
        };
        assert_eq!(event.kind(), EventKind::VolumeChange);
    }
}
