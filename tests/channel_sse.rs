use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use dl_api_sdk::channel::{ChannelState, EventCallback};
use dl_api_sdk::RealtimeChannel;
use dl_api_sdk::{ChannelOptions, DlClient, DlOptions};
use httpmock::prelude::*;
use serde_json::{json, Value};

type Recorded = Arc<Mutex<Vec<(String, Value)>>>;

fn recorder() -> (Recorded, EventCallback) {
    let seen: Recorded = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: EventCallback = Arc::new(move |event: &str, payload: &Value| {
        sink.lock().unwrap().push((event.to_string(), payload.clone()));
    });
    (seen, callback)
}

async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

fn client_for(server: &MockServer) -> DlClient {
    DlClient::new(DlOptions::new("1", "secret").with_url(server.url("/"))).unwrap()
}

fn quiet_options() -> ChannelOptions {
    ChannelOptions {
        disconnect_on_drop: false,
        ..ChannelOptions::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn first_subscribe_performs_handshake() {
    let server = MockServer::start();
    let handshake = server.mock(|when, then| {
        when.method(POST)
            .path("/channels/chat")
            .json_body(json!({"client_id": null, "event": "connected"}));
        then.status(200)
            .json_body(json!({"client_id": "c-1", "updated_at": 1700000000}));
    });
    // Held open long enough that the stream never settles during the test.
    server.mock(|when, then| {
        when.method(GET).path("/channels/chat");
        then.status(200)
            .header("content-type", "text/event-stream")
            .delay(Duration::from_secs(5))
            .body("");
    });
    let goodbye = server.mock(|when, then| {
        when.method(POST)
            .path("/channels/chat")
            .json_body(json!({"client_id": "c-1", "event": "disconnected"}));
        then.status(200).json_body(json!({"success": true}));
    });

    let client = client_for(&server);
    let channel = client.channel("chat", quiet_options()).unwrap();
    assert_eq!(channel.state(), ChannelState::New);
    assert!(!channel.is_connected());

    let (seen, callback) = recorder();
    channel.subscribe(None, callback).await.unwrap();

    handshake.assert();
    assert_eq!(channel.state(), ChannelState::Connected);
    assert!(channel.is_connected());
    assert_eq!(channel.client_id().as_deref(), Some("c-1"));
    assert_eq!(
        seen.lock().unwrap().as_slice(),
        &[(
            "connected".to_string(),
            json!({"client_id": "c-1", "updated_at": 1700000000})
        )]
    );

    // Connect is idempotent: a second subscribe does not handshake again.
    let (_, other) = recorder();
    channel.subscribe(Some("typing"), other).await.unwrap();
    handshake.assert_hits(1);

    channel.disconnect(true).await.unwrap();
    goodbye.assert();
    assert_eq!(channel.state(), ChannelState::Closed);
    assert!(!channel.is_connected());

    // A closed channel stays closed.
    channel.disconnect(false).await.unwrap();
    goodbye.assert_hits(1);
}

#[tokio::test(flavor = "multi_thread")]
async fn stream_messages_reach_callbacks() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST)
            .path("/channels/chat")
            .json_body(json!({"client_id": null, "event": "connected"}));
        then.status(200)
            .json_body(json!({"client_id": "c-2", "updated_at": 1700000000}));
    });
    let stream = server.mock(|when, then| {
        when.method(GET)
            .path("/channels/chat")
            .header("accept", "text/event-stream");
        then.status(200)
            .header("content-type", "text/event-stream")
            .delay(Duration::from_millis(300))
            .body(concat!(
                ": keep-alive\n\n",
                "data: {\"event\":\"chat\",\"text\":\"hello\"}\n\n",
                "data: not json\n\n",
                "data: {\"event\":\"typing\",\"client_id\":\"c-9\"}\n\n"
            ));
    });

    let client = client_for(&server);
    let channel = client
        .channel(
            "chat",
            ChannelOptions {
                max_retries: 0,
                ..quiet_options()
            },
        )
        .unwrap();

    let (everything, fallback) = recorder();
    let (chats, on_chat) = recorder();
    let (closed, on_closed) = recorder();
    channel.subscribe(None, fallback).await.unwrap();
    channel.subscribe(Some("chat"), on_chat).await.unwrap();
    channel.subscribe(Some("state:closed"), on_closed).await.unwrap();

    assert!(wait_until(|| !closed.lock().unwrap().is_empty()).await);
    stream.assert_hits(1);

    assert_eq!(
        chats.lock().unwrap().as_slice(),
        &[("chat".to_string(), json!({"text": "hello"}))]
    );
    let names: Vec<String> = everything
        .lock()
        .unwrap()
        .iter()
        .map(|(event, _)| event.clone())
        .collect();
    assert_eq!(names, vec!["connected", "chat", "typing"]);
    assert_eq!(channel.state(), ChannelState::Closed);
    assert!(!channel.is_connected());
}

#[tokio::test(flavor = "multi_thread")]
async fn refused_stream_reports_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/channels/alerts");
        then.status(200)
            .json_body(json!({"client_id": "c-3", "updated_at": 5}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/channels/alerts");
        then.status(403).json_body(json!({"error": "forbidden"}));
    });

    let client = client_for(&server);
    let channel = client.channel("alerts", quiet_options()).unwrap();
    let (errors, on_error) = recorder();
    channel.subscribe(Some("state:error"), on_error).await.unwrap();

    assert!(wait_until(|| !errors.lock().unwrap().is_empty()).await);
    assert_eq!(
        errors.lock().unwrap()[0],
        ("state:error".to_string(), json!({"status": 403}))
    );
    assert_eq!(channel.state(), ChannelState::Closed);
}

#[tokio::test(flavor = "multi_thread")]
async fn first_subscribe_moves_through_connecting() {
    let server = MockServer::start();
    let handshake = server.mock(|when, then| {
        when.method(POST)
            .path("/channels/lobby")
            .json_body(json!({"client_id": null, "event": "connected"}));
        then.status(200)
            .json_body(json!({"client_id": "c-4", "updated_at": 1700000000}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/channels/lobby");
        then.status(200)
            .header("content-type", "text/event-stream")
            .delay(Duration::from_secs(5))
            .body("");
    });

    let client = client_for(&server);
    let channel = client.channel("lobby", quiet_options()).unwrap();

    // Each entry records the state and client id the channel reports at dispatch time.
    type Transitions = Arc<Mutex<Vec<(String, Option<ChannelState>, Option<String>)>>>;
    let transitions: Transitions = Arc::new(Mutex::new(Vec::new()));
    let observer = |transitions: Transitions, channel: Weak<dyn RealtimeChannel>| -> EventCallback {
        Arc::new(move |event: &str, _payload: &Value| {
            let channel = channel.upgrade();
            transitions.lock().unwrap().push((
                event.to_string(),
                channel.as_ref().map(|channel| channel.state()),
                channel.and_then(|channel| channel.client_id()),
            ));
        })
    };

    channel.on(
        "state:connecting",
        observer(transitions.clone(), Arc::downgrade(&channel)),
    );
    assert!(transitions.lock().unwrap().is_empty());
    assert_eq!(channel.state(), ChannelState::New);

    channel
        .subscribe(None, observer(transitions.clone(), Arc::downgrade(&channel)))
        .await
        .unwrap();
    let (_, other) = recorder();
    channel.subscribe(Some("typing"), other).await.unwrap();

    handshake.assert_hits(1);
    assert_eq!(
        transitions.lock().unwrap().as_slice(),
        &[
            ("state:connecting".to_string(), Some(ChannelState::Connecting), None),
            (
                "connected".to_string(),
                Some(ChannelState::Connected),
                Some("c-4".to_string())
            ),
        ]
    );
}
