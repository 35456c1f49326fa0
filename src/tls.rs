//! TLS termination settings.
//!
//! Loads certificate material into a rustls server config and builds the
//! acceptor the HTTP balancer wraps its listener with.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls_pemfile::{certs, private_key};
use thiserror::Error;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::rustls::{RootCertStore, ServerConfig};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

/// Errors raised while loading TLS material.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to load certificates from {path}: {message}")]
    CertificateLoad { path: String, message: String },

    #[error("failed to load private key from {path}: {message}")]
    PrivateKeyLoad { path: String, message: String },

    #[error("invalid client CA bundle: {0}")]
    ClientCa(String),

    #[error("invalid TLS configuration: {0}")]
    Config(#[from] tokio_rustls::rustls::Error),
}

/// Server-side TLS settings for a balancer listener.
#[derive(Clone)]
pub struct TlsSettings {
    config: Arc<ServerConfig>,
}

impl std::fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSettings")
            .field("alpn", &self.config.alpn_protocols)
            .finish()
    }
}

impl TlsSettings {
    /// Load a PEM certificate chain and private key, optionally requiring
    /// client certificates signed by the CAs in `client_ca_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read, holds no usable entry, or
    /// rustls rejects the key.
    pub fn from_pem_files(
        cert_path: &Path,
        key_path: &Path,
        client_ca_path: Option<&Path>,
    ) -> Result<Self, TlsError> {
        info!(cert = %cert_path.display(), key = %key_path.display(), "loading TLS material");

        let chain = load_certificates(cert_path)?;
        if chain.is_empty() {
            return Err(TlsError::CertificateLoad {
                path: cert_path.display().to_string(),
                message: "no certificates found in file".to_string(),
            });
        }
        let key = load_private_key(key_path)?;

        let builder = ServerConfig::builder();
        let config = match client_ca_path {
            Some(ca_path) => {
                let mut roots = RootCertStore::empty();
                for ca in load_certificates(ca_path)? {
                    roots
                        .add(ca)
                        .map_err(|e| TlsError::ClientCa(e.to_string()))?;
                }
                let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                    .build()
                    .map_err(|e| TlsError::ClientCa(e.to_string()))?;
                builder
                    .with_client_cert_verifier(verifier)
                    .with_single_cert(chain, key)?
            }
            None => builder.with_no_client_auth().with_single_cert(chain, key)?,
        };

        Ok(Self::from_server_config(config))
    }

    /// Build settings from an in-memory chain and key, no client auth.
    pub fn from_der(
        chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> Result<Self, TlsError> {
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(chain, key)?;
        Ok(Self::from_server_config(config))
    }

    /// Use a caller-built rustls config.
    ///
    /// ALPN is pinned to `http/1.1`; backends are only spoken to over HTTP/1.
    pub fn from_server_config(mut config: ServerConfig) -> Self {
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Self {
            config: Arc::new(config),
        }
    }

    pub(crate) fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(Arc::clone(&self.config))
    }
}

fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::CertificateLoad {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut reader = BufReader::new(file);
    let chain = certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::CertificateLoad {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

    debug!(path = %path.display(), count = chain.len(), "certificates loaded");
    Ok(chain)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::PrivateKeyLoad {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut reader = BufReader::new(file);
    private_key(&mut reader)
        .map_err(|e| TlsError::PrivateKeyLoad {
            path: path.display().to_string(),
            message: e.to_string(),
        })?
        .ok_or_else(|| TlsError::PrivateKeyLoad {
            path: path.display().to_string(),
            message: "no private key found in file".to_string(),
        })
}
