//! Blocking client core for the Vault HTTP API.
//!
//! # Overview
//! Every operation is split into a pure `build_*` step that yields an
//! `HttpRequest` and an executing step that sends it through a `Transport`,
//! validates the answer and wraps it in a typed envelope. Envelopes never fail
//! to construct: absent or mistyped fields read as empty defaults.
//!
//! # Design
//! - `Vault` is configured once from a `VaultConfig` and is read-only after.
//! - `Transport` is a seam: the default `UreqTransport` does real HTTP, while
//!   any `Fn(&HttpRequest) -> Result<HttpResponse, TransportError>` can stand
//!   in for it in tests.
//! - Retries re-run transport, validation and envelope construction together
//!   at a fixed interval, and hand back the last error unchanged.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod logical;
pub mod response;
pub mod retry;
pub mod tls;
pub mod transport;

pub use auth::{Auth, TokenRequest};
pub use client::{check_response, Expect, Vault};
pub use config::{SslConfig, VaultConfig};
pub use error::{ConfigError, TransportError, VaultError};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use logical::Logical;
pub use response::{
    AuthData, AuthMetadata, AuthResponse, LogicalResponse, LookupResponse, TokenLookup, UnwrapResponse, VaultResponse,
    WrapInfo, WrapResponse,
};
pub use retry::{with_retry, CancelToken, Cancelled, Retried, RetryPolicy};
pub use transport::{Transport, TransportConfig, UreqTransport};
