use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{abortable, AbortHandle};
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde_json::{json, Map, Value};
use url::Url;

use crate::collection::{Collection, Operator};
use crate::error::{invalid_argument, DlResult};
use crate::logger::Logger;
use crate::platform::runtime;
use crate::request::transport::{HttpClient, HttpRequest};
use crate::request::{
    encode_uri_component, RequestHandle, HEADER_APP_ID, HEADER_APP_KEY, HEADER_AUTH_TOKEN,
    SYNC_FIELD,
};

use super::event_stream::{EventStreamDecoder, StreamFrame};
use super::state::{ChannelState, ChannelStateMachine, DEFAULT_EVENT};
use super::{ChannelOptions, EventCallback, PublishOptions, RealtimeChannel};

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@dl-api/channel/server-push"));

const EVENT_STREAM_MIME: &str = "text/event-stream";

/// Channel that publishes through the collection endpoint and listens on an event stream.
///
/// The connection opens on the first [`RealtimeChannel::subscribe`]: a `connected` record is
/// published, the handshake timestamp becomes a permanent `updated_at >` filter, and the
/// stream is opened with that filter so only newer events arrive.
#[derive(Clone)]
pub struct ServerPushChannel {
    inner: Arc<ServerPushInner>,
}

struct ServerPushInner {
    options: ChannelOptions,
    machine: Arc<ChannelStateMachine>,
    collection: Mutex<Collection>,
    reader: Mutex<Option<AbortHandle>>,
}

impl ServerPushChannel {
    pub(crate) fn new(collection: Collection, options: ChannelOptions) -> Self {
        let machine = Arc::new(ChannelStateMachine::new(collection.name()));
        Self {
            inner: Arc::new(ServerPushInner {
                options,
                machine,
                collection: Mutex::new(collection),
                reader: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> String {
        self.inner.collection.lock().unwrap().name().to_string()
    }

    /// Performs the handshake and starts the stream reader. Later calls return immediately.
    pub async fn connect(&self) -> DlResult<()> {
        let inner = &self.inner;
        if !inner.machine.begin_connect() {
            return Ok(());
        }
        inner.machine.emit_state("connecting", &Value::Null);

        let payload = match inner.publish_record("connected", Map::new(), false).await {
            Ok(payload) => payload,
            Err(err) => {
                LOGGER.warn(format!("handshake failed: {err}"));
                inner.machine.set_state(ChannelState::Closed);
                inner
                    .machine
                    .emit_state("error", &err.payload().cloned().unwrap_or(Value::Null));
                return Err(err);
            }
        };

        inner
            .machine
            .set_client_id(payload.get("client_id").and_then(identifier));
        let (http, url) = {
            let mut collection = inner.collection.lock().unwrap();
            if let Some(timestamp) = payload.get("updated_at") {
                collection
                    .query_mut()
                    .pin_filter("updated_at", Operator::Gt, timestamp.clone());
            }
            (
                collection.pipeline().http().clone(),
                stream_url(&mut collection, &inner.options),
            )
        };
        let url = match url {
            Ok(url) => url,
            Err(err) => {
                inner.machine.set_state(ChannelState::Closed);
                inner.machine.emit_state("error", &Value::Null);
                return Err(err);
            }
        };

        inner.machine.set_state(ChannelState::Connected);
        inner.machine.dispatch("connected", &payload);

        let (task, reader) = abortable(read_stream(
            inner.machine.clone(),
            http,
            url,
            inner.options.clone(),
        ));
        runtime::spawn_detached(async move {
            let _ = task.await;
        });
        if let Some(previous) = inner.reader.lock().unwrap().replace(reader) {
            previous.abort();
        }
        Ok(())
    }
}

impl ServerPushInner {
    fn publish_record(&self, event: &str, mut message: Map<String, Value>, sync: bool) -> RequestHandle {
        message.insert(
            "client_id".into(),
            self.machine.client_id().map(Value::from).unwrap_or(Value::Null),
        );
        message.insert("event".into(), Value::from(event));
        if sync {
            message.insert(SYNC_FIELD.into(), Value::Bool(true));
        }
        self.collection.lock().unwrap().create(message)
    }

    fn close(&self) {
        if let Some(reader) = self.reader.lock().unwrap().take() {
            reader.abort();
        }
        self.machine.set_state(ChannelState::Closed);
    }
}

impl Drop for ServerPushInner {
    fn drop(&mut self) {
        if !(self.options.disconnect_on_drop && self.machine.is_connected()) {
            if let Ok(reader) = self.reader.get_mut() {
                if let Some(reader) = reader.take() {
                    reader.abort();
                }
            }
            return;
        }
        self.close();
        let handle = self.publish_record("disconnected", Map::new(), true);
        if let Some(Err(err)) = handle.peek() {
            LOGGER.warn(format!("failed to announce disconnect: {err}"));
        }
    }
}

#[async_trait]
impl RealtimeChannel for ServerPushChannel {
    async fn subscribe(&self, event: Option<&str>, callback: EventCallback) -> DlResult<()> {
        self.inner
            .machine
            .register(event.unwrap_or(DEFAULT_EVENT), callback);
        self.connect().await
    }

    fn unsubscribe(&self, event: Option<&str>) {
        self.inner.machine.unregister(event.unwrap_or(DEFAULT_EVENT));
    }

    fn on(&self, event: &str, callback: EventCallback) {
        self.inner.machine.register(event, callback);
    }

    /// Writes `{...message, client_id, event}` to the channel collection. Targeting options
    /// have no meaning on this transport and are ignored.
    async fn publish(
        &self,
        event: &str,
        message: Value,
        _options: PublishOptions,
    ) -> DlResult<Value> {
        let fields = match message {
            Value::Null => Map::new(),
            Value::Object(fields) => fields,
            other => {
                return Err(invalid_argument(format!(
                    "channel messages must be objects, got {other}"
                )))
            }
        };
        self.inner.publish_record(event, fields, false).await
    }

    fn is_connected(&self) -> bool {
        self.inner.machine.is_connected()
    }

    async fn disconnect(&self, sync: bool) -> DlResult<()> {
        if !self.inner.machine.is_connected() {
            return Ok(());
        }
        self.inner.close();
        self.inner
            .publish_record("disconnected", Map::new(), sync)
            .await
            .map(|_| ())
    }

    fn state(&self) -> ChannelState {
        self.inner.machine.state()
    }

    fn client_id(&self) -> Option<String> {
        self.inner.machine.client_id()
    }
}

impl std::fmt::Debug for ServerPushChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerPushChannel")
            .field("machine", &self.inner.machine)
            .finish_non_exhaustive()
    }
}

fn identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// `<url><segments>?<json>` where the JSON carries the query, identity and stream policy.
fn stream_url(collection: &mut Collection, options: &ChannelOptions) -> DlResult<Url> {
    let pipeline = collection.pipeline().clone();
    let mut query = collection.build_query();
    query.insert(HEADER_APP_ID.into(), Value::from(pipeline.app_id()));
    query.insert(HEADER_APP_KEY.into(), Value::from(pipeline.key()));
    if let Some(token) = pipeline.credentials().token()? {
        query.insert(HEADER_AUTH_TOKEN.into(), Value::from(token));
    }
    query.insert(
        "stream".into(),
        json!({"refresh": options.refresh, "retry": options.retry}),
    );

    let target = format!(
        "{}{}?{}",
        pipeline.url(),
        collection.segments(),
        encode_uri_component(&Value::Object(query).to_string())
    );
    Url::parse(&target).map_err(|err| invalid_argument(format!("invalid stream url '{target}': {err}")))
}

async fn read_stream(
    machine: Arc<ChannelStateMachine>,
    http: HttpClient,
    url: Url,
    options: ChannelOptions,
) {
    let mut decoder = EventStreamDecoder::new();
    let mut failures: u32 = 0;

    loop {
        let mut request = HttpRequest::new(Method::GET, url.clone())
            .with_header("Accept", EVENT_STREAM_MIME)
            .with_header("Cache-Control", "no-cache");
        if let Some(last_id) = decoder.last_event_id() {
            request = request.with_header("Last-Event-ID", last_id);
        }

        match http.open_stream(request).await {
            Ok(response) => {
                let status = response.status();
                let is_stream = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok())
                    .map(|value| value.starts_with(EVENT_STREAM_MIME))
                    .unwrap_or(false);
                if !status.is_success() || !is_stream {
                    LOGGER.warn(format!(
                        "event stream refused with status {status}, content type ok: {is_stream}"
                    ));
                    if machine.advance(ChannelState::Closed) {
                        machine.emit_state("error", &json!({"status": status.as_u16()}));
                    }
                    return;
                }

                if !machine.advance(ChannelState::Connected) {
                    return;
                }
                machine.emit_state("open", &Value::Null);

                let mut body = response.bytes_stream();
                while let Some(chunk) = body.next().await {
                    if machine.state() == ChannelState::Closed {
                        return;
                    }
                    match chunk {
                        Ok(bytes) => {
                            for frame in decoder.push(&bytes) {
                                if deliver(&machine, &frame) {
                                    failures = 0;
                                }
                            }
                        }
                        Err(err) => {
                            LOGGER.debug(format!("event stream interrupted: {err}"));
                            break;
                        }
                    }
                }
            }
            Err(err) => LOGGER.warn(format!("event stream unavailable: {err}")),
        }

        if !machine.advance(ChannelState::Error) {
            return;
        }
        machine.emit_state("error", &Value::Null);

        failures += 1;
        if failures > options.max_retries {
            LOGGER.warn(format!("giving up on event stream after {failures} attempts"));
            if machine.advance(ChannelState::Closed) {
                machine.emit_state("closed", &Value::Null);
            }
            return;
        }
        let delay = decoder
            .retry()
            .unwrap_or(Duration::from_secs(options.retry));
        runtime::sleep(delay).await;
    }
}

/// Dispatches a `{event, ...payload}` envelope. Returns `false` for dropped frames.
fn deliver(machine: &ChannelStateMachine, frame: &StreamFrame) -> bool {
    if frame.event_type != "message" {
        LOGGER.debug(format!("ignoring '{}' stream frame", frame.event_type));
        return false;
    }
    let Ok(Value::Object(mut envelope)) = serde_json::from_str::<Value>(&frame.data) else {
        LOGGER.debug(format!("dropping malformed stream message: {}", frame.data));
        return false;
    };
    let Some(Value::String(event)) = envelope.remove("event") else {
        LOGGER.debug("dropping stream message without event name");
        return false;
    };
    machine.dispatch(&event, &Value::Object(envelope));
    true
}
