use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};

use serde_json::Value;

use crate::logger::Logger;

use super::EventCallback;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@dl-api/channel"));

/// Callback name that receives every non-state event.
pub const DEFAULT_EVENT: &str = "_default";
/// Prefix of the lifecycle events emitted by the channel itself.
pub const STATE_EVENT_PREFIX: &str = "state:";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelState {
    New,
    Connecting,
    Connected,
    Error,
    Closed,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::New => "new",
            ChannelState::Connecting => "connecting",
            ChannelState::Connected => "connected",
            ChannelState::Error => "error",
            ChannelState::Closed => "closed",
        }
    }
}

/// Transport-agnostic lifecycle and callback registry shared by every channel flavour.
///
/// The registry keeps one callback per event name; registering again replaces it.
pub struct ChannelStateMachine {
    name: String,
    state: Mutex<ChannelState>,
    client_id: Mutex<Option<String>>,
    callbacks: Mutex<HashMap<String, EventCallback>>,
}

impl ChannelStateMachine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(ChannelState::New),
            client_id: Mutex::new(None),
            callbacks: Mutex::new(HashMap::new()),
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.state.lock().unwrap()
    }

    pub fn set_state(&self, next: ChannelState) {
        let previous = std::mem::replace(&mut *self.state.lock().unwrap(), next);
        if previous != next {
            LOGGER.debug(format!(
                "channel '{}' {} -> {}",
                self.name,
                previous.as_str(),
                next.as_str()
            ));
        }
    }

    /// Applies `next` unless the channel is already closed. Returns whether it moved.
    pub fn advance(&self, next: ChannelState) -> bool {
        let mut state = self.state.lock().unwrap();
        if *state == ChannelState::Closed {
            return false;
        }
        let previous = std::mem::replace(&mut *state, next);
        if previous != next {
            LOGGER.debug(format!(
                "channel '{}' {} -> {}",
                self.name,
                previous.as_str(),
                next.as_str()
            ));
        }
        true
    }

    /// Moves `New` to `Connecting`. Returns `false` when a connect already happened.
    pub fn begin_connect(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if *state != ChannelState::New {
            return false;
        }
        *state = ChannelState::Connecting;
        LOGGER.debug(format!("channel '{}' new -> connecting", self.name));
        true
    }

    /// True unless the channel never connected or was closed. `Error` counts as connected.
    pub fn is_connected(&self) -> bool {
        !matches!(self.state(), ChannelState::New | ChannelState::Closed)
    }

    pub fn client_id(&self) -> Option<String> {
        self.client_id.lock().unwrap().clone()
    }

    pub fn set_client_id(&self, client_id: Option<String>) {
        *self.client_id.lock().unwrap() = client_id;
    }

    pub fn register(&self, event: impl Into<String>, callback: EventCallback) {
        self.callbacks.lock().unwrap().insert(event.into(), callback);
    }

    pub fn unregister(&self, event: &str) -> bool {
        self.callbacks.lock().unwrap().remove(event).is_some()
    }

    pub fn has_callback(&self, event: &str) -> bool {
        self.callbacks.lock().unwrap().contains_key(event)
    }

    /// Delivers an event: the default callback first (skipped for `state:` events), then the
    /// callback registered under the exact name.
    pub fn dispatch(&self, event: &str, payload: &Value) {
        let (fallback, specific) = {
            let callbacks = self.callbacks.lock().unwrap();
            let fallback = if event.starts_with(STATE_EVENT_PREFIX) {
                None
            } else {
                callbacks.get(DEFAULT_EVENT).cloned()
            };
            (fallback, callbacks.get(event).cloned())
        };

        if let Some(callback) = fallback {
            callback(event, payload);
        }
        if let Some(callback) = specific {
            callback(event, payload);
        }
    }

    pub fn emit_state(&self, name: &str, payload: &Value) {
        self.dispatch(&format!("{STATE_EVENT_PREFIX}{name}"), payload);
    }
}

impl std::fmt::Debug for ChannelStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelStateMachine")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("client_id", &self.client_id())
            .finish()
    }
}
