//! Client configuration.
//!
//! `VaultConfig` is assembled once, either as a struct literal, deserialized
//! with serde, or read from the conventional `VAULT_*` environment variables,
//! and is never mutated afterwards. The transport and retry settings are
//! derived from it.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::retry::{RetryPolicy, DEFAULT_RETRY_INTERVAL};
use crate::transport::TransportConfig;

/// TLS trust settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SslConfig {
    pub verify: bool,
    pub pem_utf8: Option<String>,
}

impl Default for SslConfig {
    fn default() -> Self {
        Self {
            verify: true,
            pem_utf8: None,
        }
    }
}

impl SslConfig {
    /// Trust only the CA certificate stored at `path`.
    pub fn with_pem_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let pem = std::fs::read_to_string(path).map_err(|source| ConfigError::PemFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            verify: true,
            pem_utf8: Some(pem),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Base address, e.g. `https://vault.example.com:8200`.
    pub address: String,
    pub token: Option<String>,
    pub namespace: Option<String>,
    /// Connect timeout in seconds.
    pub open_timeout: Option<u64>,
    /// Read timeout in seconds.
    pub read_timeout: Option<u64>,
    pub ssl: SslConfig,
    pub max_retries: u32,
    pub retry_interval_ms: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            token: None,
            namespace: None,
            open_timeout: None,
            read_timeout: None,
            ssl: SslConfig::default(),
            max_retries: 0,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL.as_millis() as u64,
        }
    }
}

impl VaultConfig {
    pub fn new(address: &str, token: &str) -> Self {
        Self {
            address: address.trim_end_matches('/').to_string(),
            token: Some(token.to_string()),
            ..Self::default()
        }
    }

    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to its value.
    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let address = lookup("VAULT_ADDR")
            .filter(|value| !value.trim().is_empty())
            .ok_or(ConfigError::MissingAddress)?;

        let ssl = match lookup("VAULT_SSL_CERT") {
            Some(path) => SslConfig::with_pem_file(path)?,
            None => SslConfig::default(),
        };
        let verify = match lookup("VAULT_SSL_VERIFY") {
            Some(value) => parse_bool("VAULT_SSL_VERIFY", &value)?,
            None => true,
        };

        let defaults = Self::default();
        Ok(Self {
            address: address.trim_end_matches('/').to_string(),
            token: lookup("VAULT_TOKEN"),
            namespace: lookup("VAULT_NAMESPACE"),
            open_timeout: parse_opt(&lookup, "VAULT_OPEN_TIMEOUT")?,
            read_timeout: parse_opt(&lookup, "VAULT_READ_TIMEOUT")?,
            ssl: SslConfig { verify, ..ssl },
            max_retries: parse_opt(&lookup, "VAULT_MAX_RETRIES")?.unwrap_or(defaults.max_retries),
            retry_interval_ms: parse_opt(&lookup, "VAULT_RETRY_INTERVAL_MILLISECONDS")?
                .unwrap_or(defaults.retry_interval_ms),
        })
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: self.open_timeout.map(Duration::from_secs),
            read_timeout: self.read_timeout.map(Duration::from_secs),
            verify: self.ssl.verify,
            ca_pem: self.ssl.pem_utf8.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_interval_ms))
    }
}

fn parse_opt<F, T>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { name, value })
        })
        .transpose()
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
        }),
    }
}
