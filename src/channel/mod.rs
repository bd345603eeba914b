//! Realtime channels bound to a collection.
//!
//! Two transports share one surface, [`RealtimeChannel`]:
//!
//! - [`ServerPushChannel`] announces itself with a `connected` publish over HTTP and then
//!   reads the collection's changes as a `text/event-stream`.
//! - [`PubSubChannel`] speaks WAMP v1 over a websocket, with topic subscriptions and RPC.
//!
//! Callbacks receive the event name and its payload. A callback registered for no event
//! receives every non-lifecycle event; lifecycle events are named `state:<name>`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::collection::Collection;
use crate::error::DlResult;

mod event_stream;
mod pubsub;
mod server_push;
mod state;
mod wamp;

pub use event_stream::{EventStreamDecoder, StreamFrame};
pub use pubsub::PubSubChannel;
pub use server_push::ServerPushChannel;
pub use state::{ChannelState, ChannelStateMachine, DEFAULT_EVENT, STATE_EVENT_PREFIX};
pub use wamp::WampMessage;

pub type EventCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransportKind {
    #[default]
    ServerSentEvents,
    WebSockets,
}

/// Settings shared by both channel transports.
#[derive(Clone, Debug)]
pub struct ChannelOptions {
    pub transport: TransportKind,
    /// Server-side polling interval for the event stream, in seconds.
    pub refresh: u64,
    /// Delay the server advertises before a stream reconnect, in seconds.
    pub retry: u64,
    /// Websocket endpoint override; derived from the client url when unset.
    pub url: Option<String>,
    pub retry_delay: Duration,
    pub max_retries: u32,
    /// Sends a blocking `disconnected` publish when the last handle is dropped.
    pub disconnect_on_drop: bool,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            refresh: 1,
            retry: 1,
            url: None,
            retry_delay: Duration::from_millis(1000),
            max_retries: 10,
            disconnect_on_drop: true,
        }
    }
}

impl ChannelOptions {
    pub fn websockets() -> Self {
        Self {
            transport: TransportKind::WebSockets,
            ..Self::default()
        }
    }
}

/// Targeting for a published event. Both lists hold client ids.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub exclude: Vec<String>,
    pub eligible: Vec<String>,
}

#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    /// Registers `callback` for `event`, or for every event when `event` is `None`.
    /// Opens the connection on first use.
    async fn subscribe(&self, event: Option<&str>, callback: EventCallback) -> DlResult<()>;

    fn unsubscribe(&self, event: Option<&str>);

    /// Registers a listener without opening the connection, typically for `connected` or a
    /// `state:` event.
    fn on(&self, event: &str, callback: EventCallback);

    async fn publish(&self, event: &str, message: Value, options: PublishOptions)
        -> DlResult<Value>;

    fn is_connected(&self) -> bool;

    /// Closes the connection. With `sync` the goodbye is delivered before returning.
    async fn disconnect(&self, sync: bool) -> DlResult<()>;

    fn state(&self) -> ChannelState;

    fn client_id(&self) -> Option<String>;
}

pub(crate) fn open_channel(
    collection: Collection,
    options: ChannelOptions,
) -> DlResult<Arc<dyn RealtimeChannel>> {
    Ok(match options.transport {
        TransportKind::ServerSentEvents => Arc::new(ServerPushChannel::new(collection, options)),
        TransportKind::WebSockets => Arc::new(PubSubChannel::open(collection, options)?),
    })
}
