//! Error types for the Vault client.
//!
//! # Design
//! `TransportError` covers everything that prevents a request from producing a
//! response at all. `VaultError` is what facade operations return: a transport
//! failure, a response the operation did not accept, or a body that lacks a
//! field the operation insists on. HTTP statuses are data carried by
//! `UnexpectedResponse`, with the raw body kept for diagnostics.
//!
//! The retry controller hands back the last error unchanged, so callers match
//! on the same variants whether the failure happened on the first attempt or
//! the last.

use std::path::PathBuf;

use crate::retry::Cancelled;

/// Failures raised while executing a single HTTP request.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no URL is set")]
    UrlNotSet,

    #[error("TLS configuration failed: {0}")]
    Tls(String),

    #[error("HTTP {method} {url} failed")]
    Request {
        method: &'static str,
        url: String,
        #[source]
        source: ureq::Error,
    },

    #[error("failed to read response body from {url}")]
    Body {
        url: String,
        #[source]
        source: ureq::Error,
    },
}

/// Failures raised while assembling a `VaultConfig`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no Vault address configured (set VAULT_ADDR)")]
    MissingAddress,

    #[error("invalid value {value:?} for {name}")]
    InvalidValue { name: &'static str, value: String },

    #[error("failed to read PEM file {path}")]
    PemFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors returned by facade operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The status code is outside the set the operation accepts.
    #[error("Vault responded with HTTP status code: {status}\nResponse body: {}", String::from_utf8_lossy(.body))]
    UnexpectedResponse { status: u16, body: Vec<u8> },

    /// JSON was required but the response declared another media type.
    #[error("Vault responded with MIME type: {mime_type}")]
    UnexpectedContentType { mime_type: String, status: u16 },

    /// The body parsed, but a field the operation requires is missing.
    #[error("malformed response body: {0}")]
    MalformedBody(String),

    #[error("failed to serialize request body")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<Cancelled> for VaultError {
    fn from(_: Cancelled) -> Self {
        VaultError::Cancelled
    }
}

impl VaultError {
    /// HTTP status attached to the error, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            VaultError::UnexpectedResponse { status, .. }
            | VaultError::UnexpectedContentType { status, .. } => Some(*status),
            _ => None,
        }
    }
}
