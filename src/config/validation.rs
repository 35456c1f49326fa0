//! Configuration validation.

use crate::config::{Config, Protocol};
use std::collections::HashSet;

/// Validate the configuration.
///
/// Checks for:
/// - A non-empty listen address
/// - No empty node addresses
/// - TLS only on the http protocol
///
/// Duplicate nodes are accepted (the registry collapses them) but logged.
///
/// # Returns
///
/// `Ok(())` if valid, or an error message describing every problem found.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut errors = Vec::new();

    if config.listen.trim().is_empty() {
        errors.push("listen address cannot be empty".to_string());
    } else if !config.listen.contains(':') {
        errors.push(format!(
            "listen address '{}' must be of the form host:port",
            config.listen
        ));
    }

    let mut seen = HashSet::new();
    for (i, node) in config.nodes.iter().enumerate() {
        if node.trim().is_empty() {
            errors.push(format!("node #{} has an empty address", i + 1));
        } else if !seen.insert(node.as_str()) {
            tracing::warn!(node = %node, "duplicate node in configuration, ignoring repeat");
        }
    }

    if config.tls.is_some() && config.protocol != Protocol::Http {
        errors.push("tls is only supported with protocol: http".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}
