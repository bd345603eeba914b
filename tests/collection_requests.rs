use std::sync::{Arc, Mutex};

use dl_api_sdk::auth::{AuthEvent, InMemoryCredentialStore};
use dl_api_sdk::request::{FieldValue, Fields};
use dl_api_sdk::{DlClient, DlOptions};
use httpmock::prelude::*;
use serde_json::json;

fn client_for(server: &MockServer) -> DlClient {
    DlClient::new(DlOptions::new("7", "public-key").with_url(server.url("/"))).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn login_attaches_token_to_later_requests() {
    let server = MockServer::start();
    let login = server.mock(|when, then| {
        when.method(POST)
            .path("/auth/email/verify")
            .header("X-App-Id", "7")
            .header("X-App-Key", "public-key")
            .json_body(json!({"email": "ana@example.com", "password": "pw"}));
        then.status(200).json_body(json!({
            "_id": 11,
            "email": "ana@example.com",
            "token": {"token": "tok-11", "expire_at": chrono::Utc::now().timestamp() + 600}
        }));
    });
    let create = server.mock(|when, then| {
        when.method(POST)
            .path("/collection/posts")
            .header("X-Auth-Token", "tok-11")
            .json_body(json!({"title": "hello"}));
        then.status(200).json_body(json!({"_id": 1, "title": "hello"}));
    });

    let client = client_for(&server);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let _subscription = client.auth().on_auth_state_changed(move |event| {
        sink.lock().unwrap().push(event.clone());
    });

    let user = client
        .auth()
        .login("email", json!({"email": "ana@example.com", "password": "pw"}))
        .await
        .unwrap();
    assert_eq!(user, json!({"_id": 11, "email": "ana@example.com"}));
    assert_eq!(client.auth().token().unwrap().as_deref(), Some("tok-11"));

    client
        .collection("posts")
        .unwrap()
        .create(json!({"title": "hello"}))
        .await
        .unwrap();

    client.auth().logout().unwrap();
    assert!(client.auth().current_user().unwrap().is_none());

    login.assert();
    create.assert();
    assert_eq!(
        events.lock().unwrap().as_slice(),
        &[
            AuthEvent::Login(json!({"_id": 11, "email": "ana@example.com"})),
            AuthEvent::Logout(Some(json!({"_id": 11, "email": "ana@example.com"}))),
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn error_bodies_reject_with_payload() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/collection/posts");
        then.status(200)
            .json_body(json!({"error": true, "message": "title is required"}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/collection/posts");
        then.status(503).body("<html>down</html>");
    });

    let client = client_for(&server);
    let mut posts = client.collection("posts").unwrap();

    let err = posts.create(json!({})).await.unwrap_err();
    assert_eq!(err.message(), "title is required");
    assert_eq!(err.payload(), Some(&json!({"error": true, "message": "title is required"})));

    let err = posts.get().await.unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert!(err.payload().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn binary_fields_switch_to_multipart() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/collection/photos")
            .body_contains("name=\"caption\"")
            .body_contains("sunset")
            .body_contains("filename=\"sunset.jpg\"");
        then.status(200).json_body(json!({"_id": 4}));
    });

    let client = client_for(&server);
    let fields = Fields::new()
        .with("caption", "sunset")
        .with("image", FieldValue::file(b"JPEG".to_vec(), "sunset.jpg"));
    let created = client
        .collection("photos")
        .unwrap()
        .create(fields)
        .await
        .unwrap();

    mock.assert();
    assert_eq!(created, json!({"_id": 4}));
}

#[tokio::test(flavor = "multi_thread")]
async fn aggregates_and_filters_share_one_reference() {
    let server = MockServer::start();
    let max = server.mock(|when, then| {
        when.method(GET)
            .path("/collection/scores")
            .query_param_exists(
                json!({"q": [["level", ">=", 3]], "aggr": {"method": "max", "field": "points"}})
                    .to_string(),
            );
        then.status(200).body("980");
    });
    let count = server.mock(|when, then| {
        when.method(GET)
            .path("/collection/scores")
            .query_param_exists(json!({"aggr": {"method": "count", "field": null}}).to_string());
        then.status(200).body("0");
    });

    let client = client_for(&server);
    let mut scores = client.collection("scores").unwrap();
    let best = scores
        .where_op("level", ">=", 3)
        .unwrap()
        .max("points")
        .await
        .unwrap();
    let total = scores.count().await.unwrap();

    max.assert();
    count.assert();
    assert_eq!(best, json!(980));
    assert_eq!(total, json!(0));
}

#[tokio::test(flavor = "multi_thread")]
async fn proxy_mode_forwards_endpoint() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/relay/key/motd")
            .header("X-Endpoint", "http://backend.internal/api/");
        then.status(200).json_body(json!({"value": "hi"}));
    });

    let client = DlClient::new(
        DlOptions::new("7", "public-key")
            .with_url("http://backend.internal/api")
            .with_proxy(server.url("/relay"))
            .with_credential_store(Arc::new(InMemoryCredentialStore::new())),
    )
    .unwrap();
    let motd = client.keys().get("motd").await.unwrap();

    mock.assert();
    assert_eq!(motd["value"], json!("hi"));
}
