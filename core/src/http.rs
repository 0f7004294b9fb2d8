//! HTTP request descriptor and raw response.
//!
//! # Design
//! `HttpRequest` is built once through consuming setters and then shared by
//! reference with the transport, so a descriptor can be re-sent on every retry
//! attempt without copying or mutation. Header and parameter names and values
//! are form-urlencoded at the moment they are added, never at send time.
//!
//! `HttpResponse` is plain data: status code, content type and body bytes.
//! Interpreting the status is left to the caller.

use std::collections::BTreeMap;

use serde::Serialize;
use url::form_urlencoded;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// POST and PUT carry a payload; GET and DELETE carry parameters in the URL.
    pub fn has_payload(self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put)
    }
}

/// An HTTP request described as plain data.
///
/// The URL is used as given; any encoding it needs is the caller's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    method: HttpMethod,
    url: String,
    headers: BTreeMap<String, String>,
    parameters: BTreeMap<String, String>,
    body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            parameters: BTreeMap::new(),
            body: None,
        }
    }

    /// Add a header. A later header whose encoded name matches ignoring ASCII
    /// case replaces the earlier one.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        let name = encode(name);
        self.headers.retain(|existing, _| !existing.eq_ignore_ascii_case(&name));
        self.headers.insert(name, encode(value));
        self
    }

    /// Add a header only when a value is present.
    pub fn optional_header(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.header(name, value),
            None => self,
        }
    }

    /// Add a parameter. GET and DELETE append it to the query string; POST and
    /// PUT send it as form data unless a body is set.
    pub fn parameter(mut self, name: &str, value: &str) -> Self {
        self.parameters.insert(encode(name), encode(value));
        self
    }

    /// Set the payload for POST and PUT. Ignored by GET and DELETE.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON payload.
    pub fn json_body<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, serde_json::Error> {
        let bytes = serde_json::to_vec(value)?;
        Ok(self.body(bytes))
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Encoded headers, sorted by name.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Encoded parameters, sorted by name.
    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// `name=value` pairs joined by `&`, in name order.
    pub fn query_string(&self) -> String {
        self.parameters
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// The URL the transport dials. For GET and DELETE the parameters are
    /// appended to any existing query string.
    pub fn target_url(&self) -> String {
        if self.method.has_payload() || self.parameters.is_empty() {
            return self.url.clone();
        }
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{separator}{}", self.url, self.query_string())
    }

    /// Form payload for POST and PUT, present only when no body was set and
    /// parameters exist.
    pub fn form_body(&self) -> Option<String> {
        if !self.method.has_payload() || self.body.is_some() || self.parameters.is_empty() {
            return None;
        }
        Some(self.query_string())
    }
}

fn encode(raw: &str) -> String {
    form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

/// An HTTP response described as plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Media type without parameters, lowercased (`application/json; charset=utf-8`
    /// becomes `application/json`).
    pub fn mime_type(&self) -> Option<String> {
        self.content_type.as_deref().map(|raw| {
            raw.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
