use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex};

use serde_json::{json, Value};
use url::Url;

use crate::error::{invalid_argument, DlResult};
use crate::logger::Logger;
use crate::request::{RequestData, RequestHandle, RequestPipeline};

use super::credentials::Credentials;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@dl-api/auth"));

#[derive(Clone, Debug, PartialEq)]
pub enum AuthEvent {
    Login(Value),
    Logout(Option<Value>),
}

pub type AuthListener = Arc<dyn Fn(&AuthEvent) + Send + Sync>;

/// Keeps an auth listener registered until dropped.
pub struct AuthStateSubscription {
    cleanup: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl Drop for AuthStateSubscription {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

/// Input for [`Auth::reset_password`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResetPassword {
    pub token: Option<String>,
    pub password: Option<String>,
}

impl ResetPassword {
    pub fn new(token: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            password: Some(password.into()),
        }
    }

    /// Reads the token from the `token` query parameter of a recovery link.
    pub fn from_url(url: &str, password: impl Into<String>) -> Self {
        Self {
            token: Auth::token_from_url(url),
            password: Some(password.into()),
        }
    }
}

/// User registration, login and session state.
#[derive(Clone)]
pub struct Auth {
    inner: Arc<AuthInner>,
}

struct AuthInner {
    pipeline: RequestPipeline,
    current_user: Mutex<Option<Value>>,
    listeners: Arc<Mutex<Vec<(usize, AuthListener)>>>,
    next_listener_id: AtomicUsize,
}

impl Auth {
    /// Restores the persisted session; an expired one is invalidated instead.
    pub(crate) fn new(pipeline: RequestPipeline) -> DlResult<Self> {
        let current_user = pipeline.credentials().load_current_user()?;
        Ok(Self {
            inner: Arc::new(AuthInner {
                pipeline,
                current_user: Mutex::new(current_user),
                listeners: Arc::new(Mutex::new(Vec::new())),
                next_listener_id: AtomicUsize::new(1),
            }),
        })
    }

    fn credentials(&self) -> &Credentials {
        self.inner.pipeline.credentials()
    }

    /// Registers a user through `provider` (`POST auth/<provider>`).
    pub async fn register(
        &self,
        provider: &str,
        data: impl Into<RequestData>,
    ) -> DlResult<Value> {
        let response = self
            .inner
            .pipeline
            .post(&format!("auth/{provider}"), Some(data.into()))
            .await?;
        self.register_token(response)
    }

    /// Verifies existing credentials (`POST auth/<provider>/verify`).
    pub async fn login(&self, provider: &str, data: impl Into<RequestData>) -> DlResult<Value> {
        let response = self
            .inner
            .pipeline
            .post(&format!("auth/{provider}/verify"), Some(data.into()))
            .await?;
        self.register_token(response)
    }

    pub fn forgot_password(&self, data: Value) -> RequestHandle {
        self.inner
            .pipeline
            .post("auth/email/forgotPassword", Some(data.into()))
    }

    pub fn reset_password(&self, request: ResetPassword) -> DlResult<RequestHandle> {
        let token = request.token.filter(|token| !token.is_empty()).ok_or_else(|| {
            invalid_argument(
                "forgot password token required. Call forgot_password before reset_password.",
            )
        })?;
        let password = request
            .password
            .ok_or_else(|| invalid_argument("new password required."))?;

        Ok(self.inner.pipeline.post(
            "auth/email/resetPassword",
            Some(json!({ "token": token, "password": password }).into()),
        ))
    }

    pub fn token_from_url(url: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        url.query_pairs()
            .find(|(name, _)| name == "token")
            .map(|(_, value)| value.into_owned())
            .filter(|token| !token.is_empty())
    }

    pub fn logout(&self) -> DlResult<()> {
        self.set_current_user(None)
    }

    /// Current user, dropping it when the stored token has expired meanwhile.
    pub fn current_user(&self) -> DlResult<Option<Value>> {
        let cached = self.inner.current_user.lock().unwrap().clone();
        if cached.is_some() && self.credentials().token()?.is_none() {
            LOGGER.debug("stored session expired");
            self.set_current_user(None)?;
            return Ok(None);
        }
        Ok(cached)
    }

    pub fn token(&self) -> DlResult<Option<String>> {
        self.credentials().token()
    }

    pub fn on_auth_state_changed<F>(&self, listener: F) -> AuthStateSubscription
    where
        F: Fn(&AuthEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .listeners
            .lock()
            .unwrap()
            .push((id, Arc::new(listener)));

        let listeners = Arc::downgrade(&self.inner.listeners);
        AuthStateSubscription {
            cleanup: Some(Box::new(move || {
                if let Some(listeners) = listeners.upgrade() {
                    if let Ok(mut guard) = listeners.lock() {
                        guard.retain(|(listener_id, _)| *listener_id != id);
                    }
                }
            })),
        }
    }

    fn register_token(&self, mut data: Value) -> DlResult<Value> {
        let Some(token) = data.as_object_mut().and_then(|object| object.remove("token")) else {
            return Ok(data);
        };
        match token.get("token").and_then(Value::as_str) {
            Some(value) => {
                let expire_at = token.get("expire_at").cloned().unwrap_or(Value::Null);
                self.credentials().store_token(value, &expire_at)?;
            }
            None => LOGGER.warn("auth response carried a token without a value"),
        }
        self.set_current_user(Some(data.clone()))?;
        Ok(data)
    }

    fn set_current_user(&self, user: Option<Value>) -> DlResult<()> {
        let event = match user {
            Some(user) => {
                self.credentials().store_current_user(&user)?;
                *self.inner.current_user.lock().unwrap() = Some(user.clone());
                AuthEvent::Login(user)
            }
            None => {
                self.credentials().invalidate()?;
                let previous = self.inner.current_user.lock().unwrap().take();
                AuthEvent::Logout(previous)
            }
        };
        self.notify(&event);
        Ok(())
    }

    fn notify(&self, event: &AuthEvent) {
        let listeners = self
            .inner
            .listeners
            .lock()
            .unwrap()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect::<Vec<_>>();
        for listener in listeners {
            listener(event);
        }
    }
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auth")
            .field("current_user", &*self.inner.current_user.lock().unwrap())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{start_mock_server, test_client};
    use httpmock::prelude::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn login_stores_token_and_user() {
        let server = start_mock_server();
        let expire_at = chrono::Utc::now().timestamp() + 3600;
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/auth/email/verify")
                .json_body(json!({"email": "a@b.c", "password": "123"}));
            then.status(200).json_body(json!({
                "_id": 5,
                "email": "a@b.c",
                "token": {"token": "tok", "expire_at": expire_at}
            }));
        });

        let client = test_client(&server);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let _subscription = client
            .auth()
            .on_auth_state_changed(move |event| sink.lock().unwrap().push(event.clone()));

        let user = client
            .auth()
            .login("email", json!({"email": "a@b.c", "password": "123"}))
            .await
            .unwrap();

        mock.assert();
        assert_eq!(user, json!({"_id": 5, "email": "a@b.c"}));
        assert_eq!(client.auth().token().unwrap().as_deref(), Some("tok"));
        assert_eq!(client.auth().current_user().unwrap(), Some(user.clone()));
        assert_eq!(events.lock().unwrap().as_slice(), &[AuthEvent::Login(user)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn logout_clears_credentials() {
        let server = start_mock_server();
        server.mock(|when, then| {
            when.method(POST).path("/auth/email");
            then.status(200).json_body(json!({
                "_id": 9,
                "token": {"token": "tok", "expire_at": chrono::Utc::now().timestamp() + 60}
            }));
        });

        let client = test_client(&server);
        client.auth().register("email", json!({"email": "x@y.z"})).await.unwrap();
        client.auth().logout().unwrap();

        assert!(client.auth().token().unwrap().is_none());
        assert!(client.auth().current_user().unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reset_password_validates_before_network() {
        let server = start_mock_server();
        let client = test_client(&server);

        let err = client
            .auth()
            .reset_password(ResetPassword {
                token: None,
                password: Some("new".into()),
            })
            .unwrap_err();
        assert_eq!(err.code_str(), "dl-api/invalid-argument");

        let err = client
            .auth()
            .reset_password(ResetPassword {
                token: Some("abc".into()),
                password: None,
            })
            .unwrap_err();
        assert_eq!(err.message(), "new password required.");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reset_password_posts_token_and_password() {
        let server = start_mock_server();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/auth/email/resetPassword")
                .json_body(json!({"token": "abc123", "password": "new"}));
            then.status(200).json_body(json!({"success": true}));
        });

        let client = test_client(&server);
        let request =
            ResetPassword::from_url("https://app.example.com/recover?token=abc123", "new");
        client.auth().reset_password(request).unwrap().await.unwrap();
        mock.assert();
    }

    #[test]
    fn token_from_url_reads_query_parameter() {
        assert_eq!(
            Auth::token_from_url("http://x.com/reset?a=1&token=f00").as_deref(),
            Some("f00")
        );
        assert!(Auth::token_from_url("http://x.com/reset").is_none());
    }
}
