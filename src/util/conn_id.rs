//! Connection identifiers for log correlation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counter behind [`ConnId::next`].
static CONN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identifier attached to every log line of one accepted connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnId(String);

impl ConnId {
    /// Next counter-based id, `conn-{hex}`. Unique within the process.
    pub fn next() -> Self {
        let n = CONN_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn-{:012x}", n))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_next_is_unique_and_prefixed() {
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            let id = ConnId::next();
            assert!(id.as_str().starts_with("conn-"));
            assert!(ids.insert(id), "duplicate connection id");
        }
    }

    #[test]
    fn test_display_matches_as_str() {
        let id = ConnId::next();
        assert_eq!(format!("{}", id), id.as_str());
    }
}
