//! Configuration data types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: json or pretty
    #[serde(default)]
    pub log_format: LogFormat,

    /// Address to listen on, as host:port
    pub listen: String,

    /// Protocol: tcp or http
    #[serde(default)]
    pub protocol: Protocol,

    /// Backend node addresses, in round-robin order
    #[serde(default)]
    pub nodes: Vec<String>,

    /// TLS termination settings (http only)
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

/// Protocol type.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Http,
}

/// PEM files for TLS termination.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Certificate chain, leaf first
    pub cert_path: PathBuf,

    /// Private key (PKCS#8, PKCS#1 or SEC1)
    pub key_path: PathBuf,

    /// CA bundle for verifying client certificates. Clients must present
    /// a certificate when set.
    #[serde(default)]
    pub client_ca_path: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}
