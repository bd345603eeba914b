use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, LazyLock};
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Method;
use serde_json::Value;
use url::Url;

use crate::auth::Credentials;
use crate::error::{internal_error, invalid_argument, request_failed, DlResult};
use crate::logger::Logger;
use crate::platform::runtime::spawn_detached;

use super::payload::{encode_payload, encode_uri_component, is_truthy, EncodedBody, RequestData};
use super::transport::{HttpClient, HttpRequest, ResponsePayload};

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@dl-api/request"));

pub const HEADER_APP_ID: &str = "X-App-Id";
pub const HEADER_APP_KEY: &str = "X-App-Key";
pub const HEADER_AUTH_TOKEN: &str = "X-Auth-Token";
pub const HEADER_ENDPOINT: &str = "X-Endpoint";

/// Single-resolution result of a request.
///
/// The request starts as soon as the handle is created. Clones observe the same outcome,
/// so several continuations can await one request.
#[derive(Clone)]
pub struct RequestHandle {
    inner: Shared<BoxFuture<'static, DlResult<Value>>>,
}

impl RequestHandle {
    pub(crate) fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = DlResult<Value>> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        spawn_detached(async move {
            let _ = sender.send(future.await);
        });
        let inner = receiver
            .map(|outcome| {
                outcome.unwrap_or_else(|_| Err(internal_error("request task ended without a result")))
            })
            .boxed()
            .shared();
        Self { inner }
    }

    pub(crate) fn ready(result: DlResult<Value>) -> Self {
        Self {
            inner: futures::future::ready(result).boxed().shared(),
        }
    }

    /// Returns the outcome without waiting, if the request already finished.
    pub fn peek(&self) -> Option<&DlResult<Value>> {
        self.inner.peek()
    }
}

impl Future for RequestHandle {
    type Output = DlResult<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("resolved", &self.inner.peek().is_some())
            .finish()
    }
}

/// Connection settings consumed by [`RequestPipeline`].
#[derive(Clone, Debug)]
pub(crate) struct PipelineConfig {
    pub url: String,
    pub app_id: String,
    pub key: String,
    pub proxy: Option<String>,
    pub credentials_in_query: bool,
}

/// Turns `(segments, method, data)` into HTTP calls against the configured endpoint.
#[derive(Clone, Debug)]
pub struct RequestPipeline {
    inner: Arc<PipelineInner>,
}

#[derive(Debug)]
struct PipelineInner {
    config: PipelineConfig,
    credentials: Credentials,
    http: HttpClient,
}

impl RequestPipeline {
    pub(crate) fn new(config: PipelineConfig, credentials: Credentials) -> DlResult<Self> {
        Ok(Self {
            inner: Arc::new(PipelineInner {
                config,
                credentials,
                http: HttpClient::new()?,
            }),
        })
    }

    pub fn url(&self) -> &str {
        &self.inner.config.url
    }

    pub fn app_id(&self) -> &str {
        &self.inner.config.app_id
    }

    pub fn key(&self) -> &str {
        &self.inner.config.key
    }

    pub fn credentials(&self) -> &Credentials {
        &self.inner.credentials
    }

    pub(crate) fn http(&self) -> &HttpClient {
        &self.inner.http
    }

    pub fn get(&self, segments: &str, data: Option<RequestData>) -> RequestHandle {
        self.request(segments, Method::GET, data)
    }

    pub fn post(&self, segments: &str, data: Option<RequestData>) -> RequestHandle {
        self.request(segments, Method::POST, data)
    }

    pub fn put(&self, segments: &str, data: Option<RequestData>) -> RequestHandle {
        self.request(segments, Method::PUT, data)
    }

    pub fn remove(&self, segments: &str, data: Option<RequestData>) -> RequestHandle {
        self.request(segments, Method::DELETE, data)
    }

    /// Issues a request.
    ///
    /// A truthy `_sync` field is stripped from `data` and makes the call block until the
    /// response arrives; the returned handle is then already resolved.
    pub fn request(
        &self,
        segments: &str,
        method: Method,
        mut data: Option<RequestData>,
    ) -> RequestHandle {
        let sync = data.as_mut().map(RequestData::take_sync_flag).unwrap_or(false);

        let request = match self.prepare(segments, method, data) {
            Ok(request) => request,
            Err(err) => return RequestHandle::ready(Err(err)),
        };
        LOGGER.debug(format!(
            "{} {}{}",
            request.method,
            request.url,
            if sync { " (sync)" } else { "" }
        ));

        if sync {
            return RequestHandle::ready(
                HttpClient::execute_blocking(request).and_then(|payload| resolve_response(&payload)),
            );
        }

        let http = self.inner.http.clone();
        RequestHandle::spawn(async move {
            let payload = http.execute(request).await?;
            resolve_response(&payload)
        })
    }

    pub(crate) fn prepare(
        &self,
        segments: &str,
        method: Method,
        data: Option<RequestData>,
    ) -> DlResult<HttpRequest> {
        let config = &self.inner.config;
        let token = self.inner.credentials.token()?;
        let encoded = encode_payload(method == Method::GET, data)?;

        let mut target = match &config.proxy {
            Some(proxy) => format!("{proxy}{segments}"),
            None => format!("{}{segments}", config.url),
        };
        if config.proxy.is_none() && config.credentials_in_query {
            target.push_str(&format!(
                "?{HEADER_APP_ID}={}&{HEADER_APP_KEY}={}",
                encode_uri_component(&config.app_id),
                encode_uri_component(&config.key)
            ));
            if let Some(token) = &token {
                target.push_str(&format!("&{HEADER_AUTH_TOKEN}={}", encode_uri_component(token)));
            }
        }
        if let Some(query) = &encoded.query {
            target.push(if target.contains('?') { '&' } else { '?' });
            target.push_str(query);
        }
        let url = Url::parse(&target)
            .map_err(|err| invalid_argument(format!("invalid request url '{target}': {err}")))?;

        let mut request = HttpRequest::new(method, url)
            .with_header(HEADER_APP_ID, config.app_id.clone())
            .with_header(HEADER_APP_KEY, config.key.clone());
        if let Some(token) = token {
            request = request.with_header(HEADER_AUTH_TOKEN, token);
        }
        match &encoded.body {
            EncodedBody::Multipart { content_type, .. } => {
                request = request.with_header("Content-Type", content_type.clone());
            }
            _ => {
                request = request.with_header("Content-Type", "application/json");
            }
        }
        if config.proxy.is_some() {
            request = request.with_header(HEADER_ENDPOINT, config.url.clone());
        }
        request.body = encoded.body;
        Ok(request)
    }
}

/// Applies the resolution rules to a raw response.
///
/// A 2xx response resolves unless its body is `null`, `false` or carries a truthy `error`
/// member; an unparseable 2xx body resolves to `null`. Any other status rejects with the
/// parsed body, or no payload when it was not JSON.
pub(crate) fn resolve_response(payload: &ResponsePayload) -> DlResult<Value> {
    let parsed = serde_json::from_slice::<Value>(&payload.body).ok();

    if !(200..300).contains(&payload.status) {
        LOGGER.warn(format!(
            "request failed with status {}: {}",
            payload.status,
            parsed
                .as_ref()
                .map(Value::to_string)
                .unwrap_or_else(|| "invalid json response".to_string())
        ));
        return Err(request_failed(payload.status, parsed));
    }

    let Some(body) = parsed else {
        return Ok(Value::Null);
    };
    let rejected = matches!(body, Value::Null | Value::Bool(false))
        || body.get("error").map(is_truthy).unwrap_or(false);
    if rejected {
        LOGGER.warn(format!("request rejected by server: {body}"));
        return Err(request_failed(payload.status, Some(body)));
    }
    Ok(body)
}
