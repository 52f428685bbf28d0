use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::audio_models::AudioLevels;
use crate::models::error::StreamError;
use crate::models::events::{ErrorPayload, EventPayload, StatePayload, ERROR_EVENT, STATE_EVENT};
use crate::models::state::SessionState;
use crate::traits::event_sink::EventSink;

struct StatusInner {
    state: SessionState,
    session_id: Option<String>,
    levels: AudioLevels,
}

/// Session state shared by the controller and its worker.
///
/// Every change is announced to the sink as an `audioState` event. Changes
/// and their announcements are serialized by `order`, so the sink sees states
/// in the order they were entered and the last one announced is the current
/// one. Readers only take `inner`.
pub(crate) struct SessionStatus {
    inner: Mutex<StatusInner>,
    order: Mutex<()>,
    sink: Arc<dyn EventSink>,
}

impl SessionStatus {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            inner: Mutex::new(StatusInner {
                state: SessionState::Idle,
                session_id: None,
                levels: AudioLevels::default(),
            }),
            order: Mutex::new(()),
            sink,
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state.clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.lock().session_id.clone()
    }

    pub fn levels(&self) -> AudioLevels {
        self.inner.lock().levels
    }

    pub fn set_levels(&self, levels: AudioLevels) {
        self.inner.lock().levels = levels;
    }

    /// Enter `Starting` for a new session id.
    pub fn begin(&self, session_id: &str) {
        {
            let mut inner = self.inner.lock();
            inner.session_id = Some(session_id.to_string());
            inner.levels = AudioLevels::default();
        }
        self.set(SessionState::Starting);
    }

    pub fn set(&self, state: SessionState) {
        let _order = self.order.lock();
        let session_id = {
            let mut inner = self.inner.lock();
            inner.state = state.clone();
            inner.session_id.clone()
        };
        self.announce(&state, session_id.as_deref());
    }

    /// Move to `to` only if the current state satisfies `from`.
    pub fn transition(&self, from: impl Fn(&SessionState) -> bool, to: SessionState) -> bool {
        let _order = self.order.lock();
        let session_id = {
            let mut inner = self.inner.lock();
            if !from(&inner.state) {
                return false;
            }
            inner.state = to.clone();
            inner.session_id.clone()
        };
        self.announce(&to, session_id.as_deref());
        true
    }

    /// Record a fatal error for the active session.
    ///
    /// Ignored unless a session is active, so a fault never replaces `Idle`
    /// or an earlier error.
    pub fn fail(&self, error: StreamError) -> bool {
        let failed = SessionState::Error(error.clone());
        if !self.transition(SessionState::is_active, failed) {
            return false;
        }
        let session_id = self.session_id();
        let payload = EventPayload::Error(ErrorPayload::new(&error, session_id.as_deref()));
        if let Err(e) = self.sink.emit(ERROR_EVENT, &payload) {
            log::warn!("error event not delivered: {}", e);
        }
        true
    }

    /// Announce a failure that did not change the session state.
    pub fn report(&self, error: &StreamError) {
        let session_id = self.session_id();
        let payload = EventPayload::Error(ErrorPayload::new(error, session_id.as_deref()));
        if let Err(e) = self.sink.emit(ERROR_EVENT, &payload) {
            log::warn!("error event not delivered: {}", e);
        }
    }

    fn announce(&self, state: &SessionState, session_id: Option<&str>) {
        let payload = EventPayload::State(StatePayload::new(state, session_id));
        if let Err(e) = self.sink.emit(STATE_EVENT, &payload) {
            log::debug!("state event not delivered: {}", e);
        }
    }
}
