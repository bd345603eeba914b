use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, OnceLock, Weak};

use crate::auth::{Auth, Credentials};
use crate::channel::{ChannelOptions, RealtimeChannel};
use crate::collection::Collection;
use crate::error::{invalid_argument, DlResult};
use crate::files::Files;
use crate::key_values::KeyValues;
use crate::logger::Logger;
use crate::plugins::{instantiate_plugins, PluginInstance};
use crate::request::{PipelineConfig, RequestData, RequestHandle, RequestPipeline};
use crate::system::System;

use super::types::DlOptions;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@dl-api/client"));

/// Entry point: one client per application id and endpoint.
///
/// Cloning is cheap; clones share the request pipeline, the session and plugin instances.
#[derive(Clone)]
pub struct DlClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    pipeline: RequestPipeline,
    auth: Auth,
    keys: KeyValues,
    files: Files,
    system: System,
    plugins: OnceLock<HashMap<String, PluginInstance>>,
}

impl DlClient {
    /// Builds a client and restores any persisted session for `options.app_id`.
    pub fn new(options: DlOptions) -> DlResult<Self> {
        if options.app_id.is_empty() {
            return Err(invalid_argument("an app id is required"));
        }

        let config = PipelineConfig {
            url: options.normalized_url(),
            app_id: options.app_id.clone(),
            key: options.key.clone(),
            proxy: options.normalized_proxy(),
            credentials_in_query: options.credentials_in_query,
        };
        let credentials = Credentials::new(options.credential_store.clone(), options.app_id.clone());
        let pipeline = RequestPipeline::new(config, credentials)?;
        let auth = Auth::new(pipeline.clone())?;

        let client = Self {
            inner: Arc::new(ClientInner {
                keys: KeyValues::new(pipeline.clone()),
                files: Files::new(pipeline.clone()),
                system: System::new(pipeline.clone()),
                auth,
                pipeline,
                plugins: OnceLock::new(),
            }),
        };
        let plugins = instantiate_plugins(&client);
        if !plugins.is_empty() {
            LOGGER.debug(format!("instantiated {} plugin(s)", plugins.len()));
        }
        let _ = client.inner.plugins.set(plugins);

        LOGGER.debug(format!(
            "client ready for app {} at {}",
            client.app_id(),
            client.url()
        ));
        Ok(client)
    }

    pub fn url(&self) -> &str {
        self.inner.pipeline.url()
    }

    pub fn app_id(&self) -> &str {
        self.inner.pipeline.app_id()
    }

    pub fn pipeline(&self) -> &RequestPipeline {
        &self.inner.pipeline
    }

    pub fn auth(&self) -> &Auth {
        &self.inner.auth
    }

    pub fn keys(&self) -> &KeyValues {
        &self.inner.keys
    }

    pub fn files(&self) -> &Files {
        &self.inner.files
    }

    pub fn system(&self) -> &System {
        &self.inner.system
    }

    /// Fails for names outside `[a-z0-9_/]`.
    pub fn collection(&self, name: &str) -> DlResult<Collection> {
        Collection::new(self.inner.pipeline.clone(), name)
    }

    /// Opens a realtime channel on `name`, backed by `channels/<name>`.
    pub fn channel(&self, name: &str, options: ChannelOptions) -> DlResult<Arc<dyn RealtimeChannel>> {
        self.collection(name)?.channel(options)
    }

    pub fn get(&self, segments: &str, data: Option<RequestData>) -> RequestHandle {
        self.inner.pipeline.get(segments, data)
    }

    pub fn post(&self, segments: &str, data: Option<RequestData>) -> RequestHandle {
        self.inner.pipeline.post(segments, data)
    }

    pub fn put(&self, segments: &str, data: Option<RequestData>) -> RequestHandle {
        self.inner.pipeline.put(segments, data)
    }

    pub fn remove(&self, segments: &str, data: Option<RequestData>) -> RequestHandle {
        self.inner.pipeline.remove(segments, data)
    }

    pub fn downgrade(&self) -> WeakDlClient {
        WeakDlClient {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Instance of the plugin registered under `path`, if it has type `T`.
    pub fn plugin<T: Any + Send + Sync>(&self, path: &str) -> Option<Arc<T>> {
        let instance = self.inner.plugins.get()?.get(path)?.clone();
        instance.downcast::<T>().ok()
    }
}

/// Non-owning handle to a [`DlClient`].
///
/// Plugins live inside their client, so a plugin that needs the client back should hold
/// one of these rather than a `DlClient` clone.
#[derive(Clone, Debug)]
pub struct WeakDlClient {
    inner: Weak<ClientInner>,
}

impl WeakDlClient {
    /// The client, unless every `DlClient` handle has been dropped.
    pub fn upgrade(&self) -> Option<DlClient> {
        self.inner.upgrade().map(|inner| DlClient { inner })
    }
}

impl std::fmt::Debug for DlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DlClient")
            .field("url", &self.url())
            .field("app_id", &self.app_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::InMemoryCredentialStore;
    use crate::test_support::start_mock_server;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn requires_app_id() {
        let err = DlClient::new(DlOptions::default()).unwrap_err();
        assert_eq!(err.code_str(), "dl-api/invalid-argument");
    }

    #[test]
    fn normalizes_url_and_validates_collection_names() {
        let client = DlClient::new(DlOptions::new("1", "k").with_url("http://localhost/api")).unwrap();
        assert_eq!(client.url(), "http://localhost/api/");
        assert!(client.collection("Bad Name").is_err());
        assert_eq!(client.collection("posts").unwrap().segments(), "collection/posts");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restores_persisted_session() {
        let server = start_mock_server();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/system/time")
                .header("X-Auth-Token", "persisted");
            then.status(200).body("1");
        });

        let store = Arc::new(InMemoryCredentialStore::new());
        let credentials = Credentials::new(store.clone(), "1");
        credentials
            .store_token("persisted", &json!(chrono::Utc::now().timestamp() + 3600))
            .unwrap();
        credentials.store_current_user(&json!({"_id": 3})).unwrap();

        let client = DlClient::new(
            DlOptions::new("1", "secret")
                .with_url(server.url("/"))
                .with_credential_store(store),
        )
        .unwrap();

        assert_eq!(client.auth().current_user().unwrap(), Some(json!({"_id": 3})));
        client.system().time().await.unwrap();
        mock.assert();
    }
}
