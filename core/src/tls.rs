//! TLS trust configuration for the ureq transport.
//!
//! Three states: platform defaults, a trust store holding exactly one supplied
//! CA certificate, or verification switched off. Switching verification off is
//! only reachable through `TransportConfig::verify == false` and takes
//! precedence over a supplied CA.

use std::sync::Arc;

use ureq::tls::{Certificate, RootCerts, TlsConfig};

use crate::error::TransportError;
use crate::transport::TransportConfig;

/// Build the TLS settings for `config`, or `None` to keep ureq's defaults.
pub fn tls_config(config: &TransportConfig) -> Result<Option<TlsConfig>, TransportError> {
    if !config.verify {
        return Ok(Some(trust_all()));
    }
    match config.ca_pem.as_deref() {
        Some(pem) => {
            let roots = single_ca_roots(pem)?;
            Ok(Some(TlsConfig::builder().root_certs(roots).build()))
        }
        None => Ok(None),
    }
}

/// Root store sourced only from the first certificate in `pem`.
pub fn single_ca_roots(pem: &str) -> Result<RootCerts, TransportError> {
    let mut reader = pem.as_bytes();
    let der = rustls_pemfile::certs(&mut reader)
        .next()
        .ok_or_else(|| TransportError::Tls("no certificate found in PEM data".to_string()))?
        .map_err(|e| TransportError::Tls(format!("unreadable PEM certificate: {e}")))?;
    let certificate = Certificate::from_der(der.as_ref()).to_owned();
    Ok(RootCerts::Specific(Arc::new(vec![certificate])))
}

/// Accept any certificate chain for any hostname.
fn trust_all() -> TlsConfig {
    tracing::warn!("TLS certificate verification is disabled");
    TlsConfig::builder().disable_verification(true).build()
}
