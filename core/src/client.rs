//! Entry point tying configuration, transport and retries together.
//!
//! # Design
//! `Vault` owns an immutable `VaultConfig`, a `Transport` and a `RetryPolicy`.
//! Operation facades (`auth()`, `logical()`) borrow it and split every
//! endpoint into a pure `build_*` step that produces an `HttpRequest` and an
//! executing step that runs the request through `Vault::call`.
//!
//! `call` re-runs the whole attempt on any failure: transport, status
//! validation, content-type validation and envelope construction. The error
//! surfaced after the last attempt is the one that attempt produced.

use std::time::Duration;

use tracing::debug;

use crate::auth::Auth;
use crate::config::VaultConfig;
use crate::error::{ConfigError, VaultError};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::logical::Logical;
use crate::retry::{with_retry, CancelToken, RetryPolicy};
use crate::transport::{Transport, UreqTransport};

pub const TOKEN_HEADER: &str = "X-Vault-Token";
pub const NAMESPACE_HEADER: &str = "X-Vault-Namespace";
pub const WRAP_TTL_HEADER: &str = "X-Vault-Wrap-TTL";

const JSON_MIME_TYPE: &str = "application/json";

/// What an operation accepts from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expect {
    pub statuses: &'static [u16],
    /// Require `application/json` on every accepted status except 204.
    pub json: bool,
}

impl Expect {
    /// HTTP 200 with a JSON body.
    pub const JSON: Expect = Expect {
        statuses: &[200],
        json: true,
    };

    /// HTTP 204 with no body.
    pub const NO_CONTENT: Expect = Expect {
        statuses: &[204],
        json: false,
    };

    /// HTTP 200 with JSON, or 204 with no body.
    pub const JSON_OR_NO_CONTENT: Expect = Expect {
        statuses: &[200, 204],
        json: true,
    };
}

/// Validate status then content type, without touching the body.
pub fn check_response(response: HttpResponse, expect: Expect) -> Result<HttpResponse, VaultError> {
    if !expect.statuses.contains(&response.status) {
        return Err(VaultError::UnexpectedResponse {
            status: response.status,
            body: response.body,
        });
    }
    if expect.json && response.status != 204 {
        let mime_type = response.mime_type();
        if mime_type.as_deref() != Some(JSON_MIME_TYPE) {
            return Err(VaultError::UnexpectedContentType {
                mime_type: mime_type.unwrap_or_else(|| "null".to_string()),
                status: response.status,
            });
        }
    }
    Ok(response)
}

/// Client for one Vault server.
pub struct Vault<T = UreqTransport> {
    config: VaultConfig,
    transport: T,
    retry: RetryPolicy,
}

impl Vault<UreqTransport> {
    /// Build a client with the ureq transport configured from `config`.
    ///
    /// Fails with `ConfigError::MissingAddress` when the address is blank.
    pub fn new(config: VaultConfig) -> Result<Self, VaultError> {
        if normalize_address(&config.address).is_empty() {
            return Err(ConfigError::MissingAddress.into());
        }
        let transport = UreqTransport::new(&config.transport_config())?;
        Ok(Self::with_transport(config, transport))
    }
}

impl<T: Transport> Vault<T> {
    pub fn with_transport(mut config: VaultConfig, transport: T) -> Self {
        config.address = normalize_address(&config.address).to_string();
        let retry = config.retry_policy();
        Self {
            config,
            transport,
            retry,
        }
    }

    /// Override the retry bound and interval taken from the configuration.
    pub fn with_retries(mut self, max_retries: u32, retry_interval: Duration) -> Self {
        self.retry.max_retries = max_retries;
        self.retry.retry_interval = retry_interval;
        self
    }

    /// Abandon operations, including pending retry pauses, once `token` is cancelled.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.retry.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn auth(&self) -> Auth<'_, T> {
        Auth::new(self)
    }

    pub fn logical(&self) -> Logical<'_, T> {
        Logical::new(self)
    }

    /// `{address}/v1/{path}`.
    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.address, path.trim_start_matches('/'))
    }

    /// A request for `path` carrying the namespace header when one applies.
    pub(crate) fn request(&self, method: HttpMethod, path: &str, namespace: Option<&str>) -> HttpRequest {
        HttpRequest::new(method, self.url(path)).optional_header(NAMESPACE_HEADER, namespace)
    }

    /// Attach the configured token, if any.
    pub(crate) fn authenticated(&self, request: HttpRequest) -> HttpRequest {
        request.optional_header(TOKEN_HEADER, self.config.token.as_deref())
    }

    /// Send `request` under the retry policy, validate each answer against
    /// `expect`, and turn the accepted response into `R`.
    pub(crate) fn call<R, P>(&self, request: &HttpRequest, expect: Expect, parse: P) -> Result<R, VaultError>
    where
        P: Fn(HttpResponse, u32) -> Result<R, VaultError>,
    {
        let outcome = with_retry(&self.retry, |attempt| {
            let response = self.transport.execute(request)?;
            debug!(
                method = request.method().as_str(),
                url = request.url(),
                status = response.status,
                attempt,
                "vault responded"
            );
            let response = check_response(response, expect)?;
            parse(response, attempt)
        })?;
        Ok(outcome.value)
    }
}

/// Surrounding whitespace and trailing slashes would double up in `url`.
fn normalize_address(address: &str) -> &str {
    address.trim().trim_end_matches('/')
}
