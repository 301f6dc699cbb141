//! mTLS transport construction.
//!
//! A [`Transport`] wraps a `reqwest::Client` configured with the client key pair, the
//! trusted CA bundle and a restricted [`TlsPolicy`]. Transports are never mutated:
//! a certificate rotation builds a new one.

use crate::config::ClientParams;
use crate::error::{ClientError, Result};
use rustls::crypto::ring::{cipher_suite, default_provider};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{RootCertStore, SupportedCipherSuite, SupportedProtocolVersion};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// TLS 1.2 is the floor.
pub static PROTOCOL_VERSIONS: &[&SupportedProtocolVersion] =
    &[&rustls::version::TLS13, &rustls::version::TLS12];

/// Protocol versions and cipher suites offered to the server.
#[derive(Debug, Clone)]
pub struct TlsPolicy {
    pub versions: &'static [&'static SupportedProtocolVersion],
    pub cipher_suites: Vec<SupportedCipherSuite>,
}

impl TlsPolicy {
    /// ECDHE + AEAD only. We control the server too, so no static RSA or CBC suites.
    pub fn restricted() -> Self {
        Self {
            versions: PROTOCOL_VERSIONS,
            cipher_suites: vec![
                cipher_suite::TLS13_AES_128_GCM_SHA256,
                cipher_suite::TLS13_AES_256_GCM_SHA384,
                cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
                cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
                cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
            ],
        }
    }
}

impl Default for TlsPolicy {
    fn default() -> Self {
        Self::restricted()
    }
}

/// An HTTP client bound to one client identity and trust bundle.
#[derive(Debug, Clone)]
pub struct Transport {
    http: reqwest::Client,
}

impl Transport {
    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }
}

pub struct TransportBuilder {
    policy: TlsPolicy,
}

impl Default for TransportBuilder {
    fn default() -> Self {
        Self::new(TlsPolicy::restricted())
    }
}

impl TransportBuilder {
    pub fn new(policy: TlsPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &TlsPolicy {
        &self.policy
    }

    /// Read the key pair and CA bundle from disk and assemble a transport.
    pub fn build(&self, params: &ClientParams) -> Result<Transport> {
        let tls = self.tls_config(&params.cert_file, &params.key_file, &params.ca_bundle)?;
        self.build_with(tls, params.timeout)
    }

    fn build_with(&self, tls: rustls::ClientConfig, timeout: Duration) -> Result<Transport> {
        let http = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Tls(e.to_string()))?;
        Ok(Transport { http })
    }

    pub fn tls_config(
        &self,
        cert_file: &Path,
        key_file: &Path,
        ca_bundle: &Path,
    ) -> Result<rustls::ClientConfig> {
        let cert_chain = load_cert_chain(cert_file)?;
        let key = PrivateKeyDer::from_pem_file(key_file)
            .map_err(|e| ClientError::certificate_load(key_file, e))?;
        let roots = load_roots(ca_bundle)?;

        let provider = CryptoProvider {
            cipher_suites: self.policy.cipher_suites.clone(),
            ..default_provider()
        };

        rustls::ClientConfig::builder_with_provider(Arc::new(provider))
            .with_protocol_versions(self.policy.versions)
            .map_err(|e| ClientError::Tls(e.to_string()))?
            .with_root_certificates(roots)
            .with_client_auth_cert(cert_chain, key)
            .map_err(|e| {
                ClientError::Tls(format!(
                    "key pair '{}'/'{}': {}",
                    cert_file.display(),
                    key_file.display(),
                    e
                ))
            })
    }
}

fn load_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let chain = CertificateDer::pem_file_iter(path)
        .map_err(|e| ClientError::certificate_load(path, e))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ClientError::certificate_load(path, e))?;
    if chain.is_empty() {
        return Err(ClientError::certificate_load(path, "no certificates found"));
    }
    Ok(chain)
}

fn load_roots(path: &Path) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    let (added, _ignored) = roots.add_parsable_certificates(load_cert_chain(path)?);
    if added == 0 {
        return Err(ClientError::certificate_load(
            path,
            "no usable CA certificates",
        ));
    }
    Ok(roots)
}
