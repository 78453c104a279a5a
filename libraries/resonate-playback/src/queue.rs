//! Playback queue
//!
//! Holds the ordered item list and decides what plays next. Playback itself
//! is delegated to the engine through a single-flight [`ItemProcessor`]: one
//! item is loaded and started at a time, and a full processor rejects new
//! submissions with a `QueueRejected` event.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::engine::PlaybackEngine;
use crate::error::{ErrorCode, PlaybackErrorInfo, QueueError};
use crate::events::{EventKind, PlayerEvent, SubscriptionId};
use crate::navigation::{index_after_move, index_after_removal, next_index, previous_index};
use crate::processor::{ItemHandler, ItemProcessor};
use crate::session::{ActionHandler, SessionAction};
use crate::types::{PlaybackState, QueueItem, QueueState, RepeatMode};

struct QueueInner {
    engine: PlaybackEngine,
    config: QueueConfig,
    /// Locked before `rng` when both are needed
    state: Mutex<QueueState>,
    rng: Mutex<StdRng>,
    processor: ItemProcessor<QueueItem>,
}

impl QueueInner {
    fn change_event(state: &QueueState) -> PlayerEvent {
        PlayerEvent::QueueChange {
            items: state.items.clone(),
            current_index: state.current_index,
        }
    }

    fn active_event(state: &QueueState) -> PlayerEvent {
        PlayerEvent::ActiveItemChange {
            item: state.current_item().cloned(),
            index: state.current_index,
        }
    }

    fn publish(&self, events: Vec<PlayerEvent>) {
        for event in &events {
            self.engine.events().publish(event);
        }
    }

    fn submit(&self, item: QueueItem) -> Result<(), QueueError> {
        let id = item.id.clone();
        match self.processor.submit(item) {
            Ok(()) => {
                debug!("Queued {} for playback", id);
                Ok(())
            }
            Err(e @ QueueError::Saturated { .. }) => {
                warn!("Rejected {}: {}", id, e);
                self.publish(vec![PlayerEvent::QueueRejected { id }]);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Submit the neighbour chosen by `pick`; false when there is none
    fn step(
        &self,
        pick: fn(usize, Option<usize>, RepeatMode, bool, &mut StdRng) -> Option<usize>,
    ) -> Result<bool, QueueError> {
        let item = {
            let state = self.state.lock();
            let mut rng = self.rng.lock();
            pick(
                state.items.len(),
                state.current_index,
                state.repeat_mode,
                state.shuffle_mode,
                &mut *rng,
            )
            .and_then(|index| state.items.get(index).cloned())
        };
        match item {
            Some(item) => self.submit(item).map(|()| true),
            None => Ok(false),
        }
    }

    fn next(&self) -> Result<bool, QueueError> {
        self.step(next_index::<StdRng>)
    }

    fn previous(&self) -> Result<bool, QueueError> {
        self.step(previous_index::<StdRng>)
    }

    fn on_ended(&self) {
        match self.next() {
            Ok(true) => debug!("Advancing to the next queue item"),
            Ok(false) => info!("Reached the end of the queue"),
            Err(e) => warn!("Auto-advance failed: {}", e),
        }
    }
}

#[async_trait]
impl ItemHandler<QueueItem> for QueueInner {
    async fn process(&self, item: QueueItem) -> Result<(), QueueError> {
        debug!("Processing queue item {}", item.id);
        tokio::time::timeout(
            self.config.item_timeout(),
            self.engine.play(Some(item.to_track())),
        )
        .await
        .map_err(|_| QueueError::Timeout)?;

        let state = self.engine.state();
        if state != PlaybackState::Playing {
            let info = self.engine.last_error().unwrap_or_else(|| {
                PlaybackErrorInfo::new(ErrorCode::Unknown, format!("engine is {}", state))
            });
            return Err(QueueError::Playback(info));
        }

        let event = {
            let mut queue = self.state.lock();
            queue.history.push(item.clone());
            if let Some(index) = queue.position_of(&item.id) {
                queue.current_index = Some(index);
            }
            Self::active_event(&queue)
        };
        info!("Now playing queue item {}", item.id);
        self.publish(vec![event]);
        Ok(())
    }
}

/// Ordered playback queue bound to one engine
///
/// Must be created inside a tokio runtime. Dropping the queue stops its
/// processor and detaches it from the engine.
pub struct Queue {
    inner: Arc<QueueInner>,
    ended_subscription: SubscriptionId,
}

impl Queue {
    pub fn new(engine: PlaybackEngine, config: QueueConfig) -> Result<Self, QueueError> {
        let runtime = Handle::try_current().map_err(|_| QueueError::NoRuntime)?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let state = QueueState {
            shuffle_mode: config.shuffle,
            repeat_mode: config.repeat,
            ..QueueState::default()
        };

        let inner = Arc::new_cyclic(|weak: &Weak<QueueInner>| QueueInner {
            processor: ItemProcessor::spawn(
                &runtime,
                config.capacity,
                config.inter_item_wait(),
                weak.clone(),
            ),
            engine,
            config,
            state: Mutex::new(state),
            rng: Mutex::new(rng),
        });

        let weak = Arc::downgrade(&inner);
        let ended_subscription = inner
            .engine
            .events()
            .subscribe_to(EventKind::Ended, move |_| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_ended();
                }
            });

        let steps: [(SessionAction, fn(&QueueInner) -> Result<bool, QueueError>); 2] = [
            (SessionAction::NextTrack, QueueInner::next),
            (SessionAction::PreviousTrack, QueueInner::previous),
        ];
        for (action, step) in steps {
            let weak = Arc::downgrade(&inner);
            let handler: ActionHandler = Arc::new(move |action, _| {
                if let Some(inner) = weak.upgrade() {
                    if let Err(e) = step(&inner) {
                        warn!("Media session {:?} failed: {}", action, e);
                    }
                }
            });
            inner.engine.register_session_action(action, handler);
        }

        Ok(Self {
            inner,
            ended_subscription,
        })
    }

    /// Append an item; ids must be unique
    pub fn add_item(&self, item: QueueItem) -> Result<(), QueueError> {
        let event = {
            let mut state = self.inner.state.lock();
            if state.position_of(&item.id).is_some() {
                return Err(QueueError::DuplicateId(item.id));
            }
            state.items.push(item);
            QueueInner::change_event(&state)
        };
        self.inner.publish(vec![event]);
        Ok(())
    }

    /// Remove an item by id
    ///
    /// Removing the current item moves the current index to the item the
    /// next-index policy picks, or clears it. Nothing starts playing.
    pub fn remove_item(&self, id: &str) -> Result<QueueItem, QueueError> {
        let (removed, events) = {
            let mut state = self.inner.state.lock();
            let index = state
                .position_of(id)
                .ok_or_else(|| QueueError::ItemNotFound(id.to_string()))?;
            let len = state.items.len();
            let was_current = state.current_index == Some(index);

            let successor = if was_current {
                let mut rng = self.inner.rng.lock();
                next_index(
                    len,
                    state.current_index,
                    state.repeat_mode,
                    state.shuffle_mode,
                    &mut *rng,
                )
            } else {
                None
            };

            let removed = state.items.remove(index);
            state.current_index = index_after_removal(len, state.current_index, index, successor);

            let mut events = vec![QueueInner::change_event(&state)];
            if was_current {
                events.push(QueueInner::active_event(&state));
            }
            (removed, events)
        };
        self.inner.publish(events);
        Ok(removed)
    }

    /// Drop every item; history is kept
    pub fn clear(&self) {
        let events = {
            let mut state = self.inner.state.lock();
            let had_current = state.current_index.is_some();
            state.items.clear();
            state.current_index = None;
            let mut events = vec![QueueInner::change_event(&state)];
            if had_current {
                events.push(QueueInner::active_event(&state));
            }
            events
        };
        self.inner.publish(events);
    }

    /// Move the item at `from` to `to`
    pub fn reorder(&self, from: usize, to: usize) -> Result<(), QueueError> {
        let event = {
            let mut state = self.inner.state.lock();
            let len = state.items.len();
            for index in [from, to] {
                if index >= len {
                    return Err(QueueError::IndexOutOfBounds { index, len });
                }
            }
            let item = state.items.remove(from);
            state.items.insert(to, item);
            state.current_index = index_after_move(state.current_index, from, to);
            QueueInner::change_event(&state)
        };
        self.inner.publish(vec![event]);
        Ok(())
    }

    /// Randomly permute the items; the current item stays current
    pub fn shuffle(&self) {
        let event = {
            let mut state = self.inner.state.lock();
            let current_id = state.current_item().map(|item| item.id.clone());
            {
                let mut rng = self.inner.rng.lock();
                state.items.shuffle(&mut *rng);
            }
            state.current_index = current_id.and_then(|id| state.position_of(&id));
            QueueInner::change_event(&state)
        };
        self.inner.publish(vec![event]);
    }

    /// Replace the whole list; nothing is current afterwards
    pub fn set_queue(&self, items: Vec<QueueItem>) -> Result<(), QueueError> {
        let mut seen = HashSet::new();
        if let Some(duplicate) = items.iter().find(|item| !seen.insert(item.id.as_str())) {
            return Err(QueueError::DuplicateId(duplicate.id.clone()));
        }

        let events = {
            let mut state = self.inner.state.lock();
            let had_current = state.current_index.is_some();
            state.items = items;
            state.current_index = None;
            let mut events = vec![QueueInner::change_event(&state)];
            if had_current {
                events.push(QueueInner::active_event(&state));
            }
            events
        };
        self.inner.publish(events);
        Ok(())
    }

    /// Submit the item with this id for playback
    pub fn set_active_item(&self, id: &str) -> Result<(), QueueError> {
        let item = self
            .inner
            .state
            .lock()
            .items
            .iter()
            .find(|item| item.id == id)
            .cloned()
            .ok_or_else(|| QueueError::ItemNotFound(id.to_string()))?;
        self.inner.submit(item)
    }

    /// Submit the next item; `Ok(false)` when the policy says stop
    pub fn next(&self) -> Result<bool, QueueError> {
        self.inner.next()
    }

    /// Submit the previous item; `Ok(false)` at the start without repeat
    pub fn previous(&self) -> Result<bool, QueueError> {
        self.inner.previous()
    }

    pub fn set_shuffle_mode(&self, shuffle: bool) {
        self.inner.state.lock().shuffle_mode = shuffle;
        debug!("Shuffle {}", if shuffle { "on" } else { "off" });
    }

    pub fn set_repeat_mode(&self, repeat: RepeatMode) {
        self.inner.state.lock().repeat_mode = repeat;
        debug!("Repeat mode {:?}", repeat);
    }

    /// Copy of the current queue state
    pub fn snapshot(&self) -> QueueState {
        self.inner.state.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current_index(&self) -> Option<usize> {
        self.inner.state.lock().current_index
    }

    /// Submissions waiting behind the one in flight
    pub fn pending(&self) -> usize {
        self.inner.processor.pending()
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.inner.engine
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        self.inner
            .engine
            .events()
            .unsubscribe(self.ended_subscription);
        self.inner
            .engine
            .unregister_session_action(SessionAction::NextTrack);
        self.inner
            .engine
            .unregister_session_action(SessionAction::PreviousTrack);
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Queue")
            .field("len", &state.items.len())
            .field("current_index", &state.current_index)
            .field("repeat_mode", &state.repeat_mode)
            .field("shuffle_mode", &state.shuffle_mode)
            .finish()
    }
}
