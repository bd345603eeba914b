use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex};

use async_trait::async_trait;
use futures::channel::oneshot;
use futures::future::{select, Either};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::collection::Collection;
use crate::error::{call_failed, invalid_argument, transport_error, DlResult};
use crate::logger::Logger;
use crate::platform::runtime::{sleep, spawn_detached};
use crate::request::{encode_uri_component, HEADER_APP_ID, HEADER_APP_KEY, HEADER_AUTH_TOKEN};

use super::state::{ChannelState, ChannelStateMachine};
use super::wamp::WampMessage;
use super::{ChannelOptions, EventCallback, PublishOptions, RealtimeChannel};

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@dl-api/channel/pubsub"));

type TcpWebSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WebSocketSink = SplitSink<TcpWebSocket, Message>;

/// WAMP v1 channel over a websocket session.
///
/// The session opens as soon as the channel is created and reconnects with a fixed delay
/// until `max_retries` consecutive attempts fail. Topics are namespaced
/// `<collection>.<event>`; subscriptions made before the session is up are joined on
/// welcome, and publishes or calls made meanwhile are queued.
///
/// Connectedness comes from the socket itself: `is_connected` is true only between the
/// server's welcome and the loss of the socket.
#[derive(Clone)]
pub struct PubSubChannel {
    inner: Arc<PubSubInner>,
}

struct PubSubInner {
    session: Arc<Session>,
}

impl Drop for PubSubInner {
    fn drop(&mut self) {
        self.session.shutdown();
    }
}

struct Session {
    collection_name: String,
    endpoint: Url,
    options: ChannelOptions,
    machine: ChannelStateMachine,
    topics: Mutex<HashMap<String, EventCallback>>,
    connected: AtomicBool,
    closed: AtomicBool,
    stop: Notify,
    sink: AsyncMutex<Option<WebSocketSink>>,
    pending: AsyncMutex<VecDeque<WampMessage>>,
    calls: Mutex<HashMap<String, oneshot::Sender<DlResult<Value>>>>,
    next_call_id: AtomicU64,
}

impl PubSubChannel {
    /// Opens the session for `collection` in the background and returns immediately.
    pub fn open(collection: Collection, options: ChannelOptions) -> DlResult<Self> {
        let pipeline = collection.pipeline();
        let token = pipeline.credentials().token()?;
        let endpoint = session_endpoint(
            pipeline.url(),
            &options,
            collection.name(),
            pipeline.app_id(),
            pipeline.key(),
            token.as_deref(),
        )?;

        let session = Arc::new(Session {
            collection_name: collection.name().to_string(),
            endpoint,
            options,
            machine: ChannelStateMachine::new(collection.name()),
            topics: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            stop: Notify::new(),
            sink: AsyncMutex::new(None),
            pending: AsyncMutex::new(VecDeque::new()),
            calls: Mutex::new(HashMap::new()),
            next_call_id: AtomicU64::new(1),
        });
        session.machine.set_state(ChannelState::Connecting);
        spawn_detached(run_session(session.clone()));

        Ok(Self {
            inner: Arc::new(PubSubInner { session }),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.inner.session.endpoint
    }

    /// Registers a lifecycle listener: `connected`, or `state:error` / `state:closed`.
    pub fn on(&self, event: &str, callback: EventCallback) {
        self.inner.session.machine.register(event, callback);
    }

    /// Remote procedure call; resolves with the server's result.
    pub async fn call(&self, procedure: &str, args: Vec<Value>) -> DlResult<Value> {
        let session = &self.inner.session;
        let call_id = format!(
            "{}.{}",
            session.collection_name,
            session.next_call_id.fetch_add(1, Ordering::SeqCst)
        );
        let (sender, receiver) = oneshot::channel();
        session.calls.lock().unwrap().insert(call_id.clone(), sender);

        let frame = WampMessage::Call {
            call_id: call_id.clone(),
            procedure: procedure.to_string(),
            args,
        };
        if let Err(err) = session.send_or_queue(frame).await {
            session.calls.lock().unwrap().remove(&call_id);
            return Err(err);
        }

        receiver
            .await
            .unwrap_or_else(|_| Err(transport_error("channel closed before the call completed")))
    }

    fn topic(&self, event: &str) -> String {
        format!("{}.{event}", self.inner.session.collection_name)
    }
}

impl Session {
    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.stop.notify_one();
    }

    async fn send(&self, message: &WampMessage) -> DlResult<bool> {
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return Ok(false);
        };
        sink.send(Message::Text(message.encode()))
            .await
            .map_err(|err| transport_error(format!("failed to send WAMP frame: {err}")))?;
        Ok(true)
    }

    async fn send_or_queue(&self, message: WampMessage) -> DlResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(transport_error("channel is closed"));
        }
        // Held across the check: a welcome flush must not drain between check and push.
        let mut pending = self.pending.lock().await;
        if self.connected.load(Ordering::SeqCst)
            && pending.is_empty()
            && self.send(&message).await?
        {
            return Ok(());
        }
        pending.push_back(message);
        Ok(())
    }

    async fn flush_pending(&self) -> DlResult<()> {
        loop {
            let next = self.pending.lock().await.pop_front();
            let Some(message) = next else {
                break;
            };
            match self.send(&message).await {
                Ok(true) => {}
                Ok(false) => {
                    self.pending.lock().await.push_front(message);
                    break;
                }
                Err(err) => {
                    self.pending.lock().await.push_front(message);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn complete_call(&self, call_id: &str, result: DlResult<Value>) {
        match self.calls.lock().unwrap().remove(call_id) {
            Some(sender) => {
                let _ = sender.send(result);
            }
            None => LOGGER.debug(format!("result for unknown call '{call_id}'")),
        }
    }

    fn fail_calls(&self) {
        let calls: Vec<_> = self.calls.lock().unwrap().drain().collect();
        for (_, sender) in calls {
            let _ = sender.send(Err(transport_error("channel closed before the call completed")));
        }
    }

    async fn handle_frame(&self, text: &str) {
        let message = match WampMessage::decode(text) {
            Ok(message) => message,
            Err(err) => {
                LOGGER.debug(format!("dropping frame: {err}"));
                return;
            }
        };

        match message {
            WampMessage::Welcome { session_id, .. } => {
                self.machine.set_client_id(Some(session_id.clone()));
                self.connected.store(true, Ordering::SeqCst);
                self.machine.set_state(ChannelState::Connected);

                let topics: Vec<String> = self.topics.lock().unwrap().keys().cloned().collect();
                for topic in topics {
                    if let Err(err) = self.send(&WampMessage::Subscribe { topic }).await {
                        LOGGER.warn(format!("failed to join topic: {err}"));
                    }
                }
                if let Err(err) = self.flush_pending().await {
                    LOGGER.warn(format!("failed to flush queued frames: {err}"));
                }
                self.machine
                    .dispatch("connected", &json!({ "client_id": session_id }));
            }
            WampMessage::Event { topic, event } => {
                let callback = self.topics.lock().unwrap().get(&topic).cloned();
                let Some(callback) = callback else {
                    LOGGER.debug(format!("event for topic '{topic}' without subscriber"));
                    return;
                };
                let name = topic
                    .strip_prefix(&format!("{}.", self.collection_name))
                    .unwrap_or(&topic);
                callback(name, &event);
            }
            WampMessage::CallResult { call_id, result } => self.complete_call(&call_id, Ok(result)),
            WampMessage::CallError {
                call_id,
                error_uri,
                description,
                details,
            } => {
                let payload = details.unwrap_or_else(|| json!({ "uri": error_uri }));
                self.complete_call(&call_id, Err(call_failed(description, payload)));
            }
            other => LOGGER.debug(format!("ignoring WAMP frame type {}", other.type_id())),
        }
    }
}

async fn run_session(session: Arc<Session>) {
    let mut failures: u32 = 0;

    while !session.closed.load(Ordering::SeqCst) {
        match connect_async(session.endpoint.as_str()).await {
            Ok((stream, _response)) => {
                failures = 0;
                let (sink, mut reader) = stream.split();
                *session.sink.lock().await = Some(sink);

                loop {
                    let next = {
                        let stop = std::pin::pin!(session.stop.notified());
                        match select(reader.next(), stop).await {
                            Either::Left((message, _)) => message,
                            Either::Right(_) => None,
                        }
                    };
                    match next {
                        Some(Ok(Message::Text(text))) => session.handle_frame(&text).await,
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                            Ok(text) => session.handle_frame(&text).await,
                            Err(_) => LOGGER.debug("dropping non-UTF8 binary frame"),
                        },
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => {}
                    }
                }

                if let Some(mut sink) = session.sink.lock().await.take() {
                    let _ = sink.close().await;
                }
            }
            Err(err) => LOGGER.warn(format!("websocket connection failed: {err}")),
        }

        session.connected.store(false, Ordering::SeqCst);
        if session.closed.load(Ordering::SeqCst) {
            break;
        }
        session.machine.set_state(ChannelState::Error);
        session.machine.emit_state("error", &Value::Null);

        failures += 1;
        if failures > session.options.max_retries {
            LOGGER.warn(format!("giving up on websocket after {failures} attempts"));
            session.closed.store(true, Ordering::SeqCst);
            session.machine.set_state(ChannelState::Closed);
            session.machine.emit_state("closed", &Value::Null);
            break;
        }
        sleep(session.options.retry_delay).await;
    }

    session.fail_calls();
}

#[async_trait]
impl RealtimeChannel for PubSubChannel {
    /// Joins `<collection>.<event>`; the callback receives the event name without the
    /// collection prefix.
    async fn subscribe(&self, event: Option<&str>, callback: EventCallback) -> DlResult<()> {
        let event = event.ok_or_else(|| {
            invalid_argument("websocket channels need an event name to subscribe to")
        })?;
        let topic = self.topic(event);
        let session = &self.inner.session;
        session
            .topics
            .lock()
            .unwrap()
            .insert(topic.clone(), callback);

        // Topics joined before the welcome are subscribed by the session itself.
        if session.connected.load(Ordering::SeqCst) {
            session.send(&WampMessage::Subscribe { topic }).await?;
        }
        Ok(())
    }

    fn on(&self, event: &str, callback: EventCallback) {
        PubSubChannel::on(self, event, callback);
    }

    fn unsubscribe(&self, event: Option<&str>) {
        let Some(event) = event else {
            return;
        };
        let topic = self.topic(event);
        let session = self.inner.session.clone();
        if session.topics.lock().unwrap().remove(&topic).is_none() {
            return;
        }
        if !session.connected.load(Ordering::SeqCst) {
            return;
        }
        spawn_detached(async move {
            if let Err(err) = session.send(&WampMessage::Unsubscribe { topic }).await {
                LOGGER.warn(format!("failed to leave topic: {err}"));
            }
        });
    }

    async fn publish(&self, event: &str, message: Value, options: PublishOptions) -> DlResult<Value> {
        let frame = WampMessage::Publish {
            topic: self.topic(event),
            event: message,
            exclude: options.exclude,
            eligible: options.eligible,
        };
        self.inner.session.send_or_queue(frame).await?;
        Ok(Value::Null)
    }

    fn is_connected(&self) -> bool {
        self.inner.session.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self, _sync: bool) -> DlResult<()> {
        let session = &self.inner.session;
        session.shutdown();
        if let Some(mut sink) = session.sink.lock().await.take() {
            let _ = sink.close().await;
        }
        session.machine.set_state(ChannelState::Closed);
        session.fail_calls();
        Ok(())
    }

    fn state(&self) -> ChannelState {
        self.inner.session.machine.state()
    }

    fn client_id(&self) -> Option<String> {
        self.inner.session.machine.client_id()
    }
}

impl std::fmt::Debug for PubSubChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubChannel")
            .field("endpoint", &self.inner.session.endpoint.as_str())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

/// `ws[s]://` endpoint for a collection: an explicit `options.url`, or the HTTP base with
/// its scheme swapped and `index.php` replaced by `ws/`.
fn session_endpoint(
    base_url: &str,
    options: &ChannelOptions,
    name: &str,
    app_id: &str,
    key: &str,
    token: Option<&str>,
) -> DlResult<Url> {
    let mut endpoint = match &options.url {
        Some(url) if url.ends_with('/') => url.clone(),
        Some(url) => format!("{url}/"),
        None => socket_base(base_url),
    };
    endpoint.push_str(name);
    endpoint.push_str(&format!(
        "?{HEADER_APP_ID}={}&{HEADER_APP_KEY}={}",
        encode_uri_component(app_id),
        encode_uri_component(key)
    ));
    if let Some(token) = token {
        endpoint.push_str(&format!("&{HEADER_AUTH_TOKEN}={}", encode_uri_component(token)));
    }
    Url::parse(&endpoint)
        .map_err(|err| invalid_argument(format!("invalid websocket url '{endpoint}': {err}")))
}

fn socket_base(base_url: &str) -> String {
    let (scheme, rest) = if let Some(rest) = base_url.strip_prefix("https://") {
        ("wss://", rest)
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        ("ws://", rest)
    } else {
        ("ws://", base_url.trim_start_matches("//"))
    };

    let rest = if rest.contains("index.php/") {
        rest.replacen("index.php/", "ws/", 1)
    } else if rest.contains("index.php") {
        rest.replacen("index.php", "ws/", 1)
    } else if rest.ends_with('/') {
        format!("{rest}ws/")
    } else {
        format!("{rest}/ws/")
    };
    format!("{scheme}{rest}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_socket_base_from_http_url() {
        assert_eq!(
            socket_base("http://dl-api.dev/api/public/index.php/"),
            "ws://dl-api.dev/api/public/ws/"
        );
        assert_eq!(socket_base("https://example.com/api/"), "wss://example.com/api/ws/");
        assert_eq!(socket_base("https://example.com/index.php"), "wss://example.com/ws/");
    }

    #[test]
    fn endpoint_carries_identity() {
        let endpoint = session_endpoint(
            "https://example.com/index.php/",
            &ChannelOptions::websockets(),
            "messages",
            "7",
            "k&y",
            Some("tok"),
        )
        .unwrap();
        assert_eq!(
            endpoint.as_str(),
            "wss://example.com/ws/messages?X-App-Id=7&X-App-Key=k%26y&X-Auth-Token=tok"
        );
    }

    #[test]
    fn explicit_url_gets_a_separator() {
        let options = ChannelOptions {
            url: Some("ws://localhost:8080".into()),
            ..ChannelOptions::websockets()
        };
        let endpoint = session_endpoint("http://ignored/", &options, "chat", "1", "k", None).unwrap();
        assert_eq!(endpoint.as_str(), "ws://localhost:8080/chat?X-App-Id=1&X-App-Key=k");
    }

    fn idle_session(connected: bool) -> Session {
        Session {
            collection_name: "messages".into(),
            endpoint: Url::parse("ws://localhost/ws/messages").unwrap(),
            options: ChannelOptions::websockets(),
            machine: ChannelStateMachine::new("messages"),
            topics: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(connected),
            closed: AtomicBool::new(false),
            stop: Notify::new(),
            sink: AsyncMutex::new(None),
            pending: AsyncMutex::new(VecDeque::new()),
            calls: Mutex::new(HashMap::new()),
            next_call_id: AtomicU64::new(1),
        }
    }

    fn publish(event: &str) -> WampMessage {
        WampMessage::Publish {
            topic: format!("messages.{event}"),
            event: json!({}),
            exclude: Vec::new(),
            eligible: Vec::new(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn frames_queue_behind_unflushed_ones() {
        let session = idle_session(false);
        session.send_or_queue(publish("first")).await.unwrap();

        // Welcome seen, but the queue has not been flushed yet.
        session.connected.store(true, Ordering::SeqCst);
        session.send_or_queue(publish("second")).await.unwrap();

        let queued: Vec<WampMessage> = session.pending.lock().await.iter().cloned().collect();
        assert_eq!(queued, vec![publish("first"), publish("second")]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn closed_session_rejects_frames() {
        let session = idle_session(false);
        session.shutdown();
        let err = session.send_or_queue(publish("late")).await.unwrap_err();
        assert_eq!(err.code_str(), "dl-api/transport");
        assert!(session.pending.lock().await.is_empty());
    }
}
