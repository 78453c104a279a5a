//! Media session double that records every call

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::SessionError;
use crate::session::{
    ActionHandler, MediaSession, SessionAction, SessionMetadata, SessionPlaybackState,
};

/// A call made on the session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCall {
    Metadata(Option<SessionMetadata>),
    PlaybackState(SessionPlaybackState),
    ActionHandler {
        action: SessionAction,
        registered: bool,
    },
    PositionState {
        duration: f64,
        position: f64,
        rate: f32,
    },
}

/// Records calls, keeps registered handlers so tests can trigger them, and
/// can be switched to fail every call
#[derive(Default)]
pub struct RecordingSession {
    calls: Mutex<Vec<SessionCall>>,
    handlers: Mutex<HashMap<SessionAction, ActionHandler>>,
    failing: AtomicBool,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call return an error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<SessionCall> {
        self.calls.lock().clone()
    }

    pub fn has_handler(&self, action: SessionAction) -> bool {
        self.handlers.lock().contains_key(&action)
    }

    /// Run the handler for `action` as system controls would; false if none
    pub fn trigger(&self, action: SessionAction, argument: Option<f64>) -> bool {
        let handler = self.handlers.lock().get(&action).cloned();
        match handler {
            Some(handler) => {
                handler(action, argument);
                true
            }
            None => false,
        }
    }

    pub fn last_playback_state(&self) -> Option<SessionPlaybackState> {
        self.calls.lock().iter().rev().find_map(|call| match call {
            SessionCall::PlaybackState(state) => Some(*state),
            _ => None,
        })
    }

    pub fn last_metadata(&self) -> Option<Option<SessionMetadata>> {
        self.calls.lock().iter().rev().find_map(|call| match call {
            SessionCall::Metadata(metadata) => Some(metadata.clone()),
            _ => None,
        })
    }

    fn record(&self, call: SessionCall) -> Result<(), SessionError> {
        self.calls.lock().push(call);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SessionError("session unavailable".to_string()));
        }
        Ok(())
    }
}

impl MediaSession for RecordingSession {
    fn set_metadata(&self, metadata: Option<SessionMetadata>) -> Result<(), SessionError> {
        self.record(SessionCall::Metadata(metadata))
    }

    fn set_playback_state(&self, state: SessionPlaybackState) -> Result<(), SessionError> {
        self.record(SessionCall::PlaybackState(state))
    }

    fn set_action_handler(
        &self,
        action: SessionAction,
        handler: Option<ActionHandler>,
    ) -> Result<(), SessionError> {
        self.record(SessionCall::ActionHandler {
            action,
            registered: handler.is_some(),
        })?;
        let mut handlers = self.handlers.lock();
        match handler {
            Some(handler) => {
                handlers.insert(action, handler);
            }
            None => {
                handlers.remove(&action);
            }
        }
        Ok(())
    }

    fn set_position_state(
        &self,
        duration: f64,
        position: f64,
        rate: f32,
    ) -> Result<(), SessionError> {
        self.record(SessionCall::PositionState {
            duration,
            position,
            rate,
        })
    }
}

impl std::fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingSession")
            .field("calls", &self.calls.lock().len())
            .field("handlers", &self.handlers.lock().len())
            .finish()
    }
}
