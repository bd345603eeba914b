use std::time::Duration;

use reqwest::{Client, Method, Response};
use url::Url;

use crate::error::{internal_error, transport_error, DlResult};
use crate::platform::runtime;

use super::payload::EncodedBody;

/// Fully resolved HTTP request, ready to hand to either client flavour.
#[derive(Clone, Debug)]
pub(crate) struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: EncodedBody,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: EncodedBody::Empty,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn body_bytes(&self) -> Option<Vec<u8>> {
        match &self.body {
            EncodedBody::Empty => None,
            EncodedBody::Json(json) => Some(json.clone().into_bytes()),
            EncodedBody::Multipart { body, .. } => Some(body.clone()),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct ResponsePayload {
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(Clone, Debug)]
pub(crate) struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> DlResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|err| internal_error(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client })
    }

    pub async fn execute(&self, request: HttpRequest) -> DlResult<ResponsePayload> {
        let response = self.send(&request).await?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| transport_error(format!("failed to read response body: {err}")))?
            .to_vec();
        Ok(ResponsePayload { status, body })
    }

    /// Sends the request and hands back the live response for incremental reads.
    pub async fn open_stream(&self, request: HttpRequest) -> DlResult<Response> {
        self.send(&request).await
    }

    async fn send(&self, request: &HttpRequest) -> DlResult<Response> {
        let mut builder = self.client.request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body_bytes() {
            builder = builder.body(body);
        }
        builder
            .send()
            .await
            .map_err(|err| transport_error(format!("{} {} failed: {err}", request.method, request.url)))
    }

    /// Performs the request with a blocking client on a dedicated thread.
    pub fn execute_blocking(request: HttpRequest) -> DlResult<ResponsePayload> {
        runtime::block_on_thread(move || {
            let client = reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .map_err(|err| internal_error(format!("failed to build blocking HTTP client: {err}")))?;

            let mut builder = client.request(request.method.clone(), request.url.clone());
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }
            if let Some(body) = request.body_bytes() {
                builder = builder.body(body);
            }

            let response = builder.send().map_err(|err| {
                transport_error(format!("{} {} failed: {err}", request.method, request.url))
            })?;
            let status = response.status().as_u16();
            let body = response
                .bytes()
                .map_err(|err| transport_error(format!("failed to read response body: {err}")))?
                .to_vec();
            Ok(ResponsePayload { status, body })
        })
        .unwrap_or_else(|| Err(internal_error("blocking request thread panicked")))
    }
}
