//! Single-request HTTP execution.
//!
//! # Design
//! A `Transport` turns one `HttpRequest` into one `HttpResponse`. It never
//! retries and never interprets status codes: a 500 is a response like any
//! other. Only a missing URL, connection failures, timeouts, TLS failures and
//! I/O errors while moving the body are errors.
//!
//! `UreqTransport` builds one ureq agent from a `TransportConfig` and reuses it
//! for every call; the agent pools connections internally and is safe to share
//! across threads.

use std::collections::BTreeMap;
use std::time::Duration;

use ureq::http::header::CONTENT_TYPE;
use ureq::{Agent, RequestBuilder};

use crate::error::TransportError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::tls;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded;charset=UTF-8";

/// Executes a single request.
pub trait Transport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

impl<F> Transport for F
where
    F: Fn(&HttpRequest) -> Result<HttpResponse, TransportError>,
{
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self(request)
    }
}

/// Timeouts and TLS trust settings, read-only once a transport is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// `None` keeps the platform default.
    pub connect_timeout: Option<Duration>,
    /// Applies to waiting for the response head and to reading the body.
    pub read_timeout: Option<Duration>,
    /// Certificate and hostname verification. Turning this off must be explicit.
    pub verify: bool,
    /// A single trusted CA certificate, PEM encoded.
    pub ca_pem: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: None,
            read_timeout: None,
            verify: true,
            ca_pem: None,
        }
    }
}

/// Blocking transport backed by a ureq agent.
#[derive(Clone)]
pub struct UreqTransport {
    agent: Agent,
}

impl UreqTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        // Non-2xx statuses come back as data for the caller to judge.
        let mut builder = Agent::config_builder().http_status_as_error(false);
        if let Some(timeout) = config.connect_timeout {
            builder = builder.timeout_connect(Some(timeout));
        }
        if let Some(timeout) = config.read_timeout {
            builder = builder
                .timeout_recv_response(Some(timeout))
                .timeout_recv_body(Some(timeout));
        }
        if let Some(tls) = tls::tls_config(config)? {
            builder = builder.tls_config(tls);
        }
        Ok(Self {
            agent: builder.build().new_agent(),
        })
    }
}

impl Transport for UreqTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        if request.url().trim().is_empty() {
            return Err(TransportError::UrlNotSet);
        }
        let url = request.target_url();
        let method = request.method();

        let result = match method {
            HttpMethod::Get => with_headers(self.agent.get(&url), request.headers()).call(),
            HttpMethod::Delete => with_headers(self.agent.delete(&url), request.headers()).call(),
            HttpMethod::Post | HttpMethod::Put => {
                let builder = if method == HttpMethod::Post {
                    self.agent.post(&url)
                } else {
                    self.agent.put(&url)
                };
                let builder = with_headers(builder, request.headers()).header("Accept-Charset", "UTF-8");
                match (request.payload(), request.form_body()) {
                    (Some(body), _) => builder.send(body),
                    (None, Some(form)) => builder.header("Content-Type", FORM_CONTENT_TYPE).send(form.as_bytes()),
                    (None, None) => builder.send_empty(),
                }
            }
        };

        let mut response = result.map_err(|source| TransportError::Request {
            method: method.as_str(),
            url: url.clone(),
            source,
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response
            .body_mut()
            .read_to_vec()
            .map_err(|source| TransportError::Body { url, source })?;

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

fn with_headers<B>(mut builder: RequestBuilder<B>, headers: &BTreeMap<String, String>) -> RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}
