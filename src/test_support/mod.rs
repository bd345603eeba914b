//! Test utilities shared across crate-level unit tests.

use httpmock::MockServer;

use crate::client::{DlClient, DlOptions};

/// Start a fresh `httpmock::MockServer` instance for use in unit tests.
pub fn start_mock_server() -> MockServer {
    MockServer::start()
}

/// Client for app `1` with key `secret`, pointed at `server` and backed by an in-memory
/// credential store.
pub fn test_client(server: &MockServer) -> DlClient {
    DlClient::new(DlOptions::new("1", "secret").with_url(server.url("/")))
        .expect("test client")
}
