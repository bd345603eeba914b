use std::sync::Arc;

use crate::auth::{CredentialStore, InMemoryCredentialStore};
use crate::platform::environment::{env_flag, env_string};

use super::constants::{
    DEFAULT_URL, ENV_APP_ID, ENV_CREDENTIALS_IN_QUERY, ENV_KEY, ENV_PROXY, ENV_URL,
};

/// Connection settings for a [`DlClient`](super::DlClient).
#[derive(Clone)]
pub struct DlOptions {
    /// Base endpoint; a trailing `/` is added when missing.
    pub url: String,
    pub app_id: String,
    pub key: String,
    /// Intermediary endpoint. When set, requests target the proxy and the real endpoint
    /// travels in the `X-Endpoint` header.
    pub proxy: Option<String>,
    /// Sends identity in the query string, for environments that cannot set headers.
    pub credentials_in_query: bool,
    pub credential_store: Arc<dyn CredentialStore>,
}

impl DlOptions {
    pub fn new(app_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credential_store = store;
        self
    }

    /// Reads `DL_API_URL`, `DL_API_APP_ID`, `DL_API_KEY`, `DL_API_PROXY` and
    /// `DL_API_CREDENTIALS_IN_QUERY`, keeping defaults for unset variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: env_string(ENV_URL).unwrap_or(defaults.url),
            app_id: env_string(ENV_APP_ID).unwrap_or_default(),
            key: env_string(ENV_KEY).unwrap_or_default(),
            proxy: env_string(ENV_PROXY),
            credentials_in_query: env_flag(ENV_CREDENTIALS_IN_QUERY),
            credential_store: defaults.credential_store,
        }
    }

    pub(crate) fn normalized_url(&self) -> String {
        with_trailing_slash(&self.url)
    }

    pub(crate) fn normalized_proxy(&self) -> Option<String> {
        self.proxy.as_deref().map(with_trailing_slash)
    }
}

impl Default for DlOptions {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            app_id: String::new(),
            key: String::new(),
            proxy: None,
            credentials_in_query: false,
            credential_store: Arc::new(InMemoryCredentialStore::new()),
        }
    }
}

impl std::fmt::Debug for DlOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DlOptions")
            .field("url", &self.url)
            .field("app_id", &self.app_id)
            .field("proxy", &self.proxy)
            .field("credentials_in_query", &self.credentials_in_query)
            .finish_non_exhaustive()
    }
}

fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_points_at_public_index() {
        let options = DlOptions::default();
        assert_eq!(options.normalized_url(), DEFAULT_URL);
    }

    #[test]
    fn trailing_slash_is_added() {
        let options = DlOptions::new("1", "key").with_url("http://localhost/api");
        assert_eq!(options.normalized_url(), "http://localhost/api/");
    }

    #[test]
    fn from_env_reads_identity() {
        std::env::set_var(ENV_APP_ID, "77");
        std::env::set_var(ENV_KEY, "env-key");
        let options = DlOptions::from_env();
        std::env::remove_var(ENV_APP_ID);
        std::env::remove_var(ENV_KEY);

        assert_eq!(options.app_id, "77");
        assert_eq!(options.key, "env-key");
        assert!(options.proxy.is_none());
    }
}
