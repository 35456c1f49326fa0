//! Backend node registry.
//!
//! Holds the set of backend addresses a balancer may forward to. The set
//! keeps insertion order and suppresses duplicates so that round-robin
//! selection walks the nodes in a stable order.

use parking_lot::Mutex;
use std::collections::HashSet;

/// Address of a backend node, as `host:port`.
///
/// Treated as an opaque string: two addresses are the same node only if the
/// strings are equal. Resolution happens when the node is dialed.
pub type NodeAddr = String;

/// Concurrency-safe, de-duplicated, insertion-ordered set of backend nodes.
#[derive(Debug, Default)]
pub struct NodeList {
    inner: Mutex<Nodes>,
}

#[derive(Debug, Default)]
struct Nodes {
    /// Membership index.
    present: HashSet<NodeAddr>,
    /// Nodes in insertion order.
    order: Vec<NodeAddr>,
}

impl Nodes {
    fn insert(&mut self, node: NodeAddr) -> bool {
        if self.present.contains(&node) {
            return false;
        }
        self.present.insert(node.clone());
        self.order.push(node);
        true
    }
}

impl NodeList {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the nodes in insertion order.
    pub fn get(&self) -> Vec<NodeAddr> {
        self.inner.lock().order.clone()
    }

    /// Replace the whole registry.
    ///
    /// The new order is the order of `nodes`; repeated addresses keep their
    /// first position.
    pub fn set<I>(&self, nodes: I)
    where
        I: IntoIterator<Item = NodeAddr>,
    {
        let mut fresh = Nodes::default();
        for node in nodes {
            fresh.insert(node);
        }
        *self.inner.lock() = fresh;
    }

    /// Append a node unless it is already registered.
    ///
    /// Returns `true` if the node was added.
    pub fn add(&self, node: NodeAddr) -> bool {
        self.inner.lock().insert(node)
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    /// Whether no node is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn addrs(list: &[&str]) -> Vec<NodeAddr> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_new_registry_is_empty() {
        let nodes = NodeList::new();
        assert!(nodes.is_empty());
        assert!(nodes.get().is_empty());
    }

    #[test]
    fn test_add_keeps_insertion_order() {
        let nodes = NodeList::new();
        nodes.add("10.0.0.2:80".to_string());
        nodes.add("10.0.0.1:80".to_string());
        nodes.add("10.0.0.3:80".to_string());

        assert_eq!(nodes.get(), addrs(&["10.0.0.2:80", "10.0.0.1:80", "10.0.0.3:80"]));
    }

    #[test]
    fn test_add_duplicate_is_noop() {
        let nodes = NodeList::new();
        assert!(nodes.add("10.0.0.1:80".to_string()));
        assert!(nodes.add("10.0.0.2:80".to_string()));
        assert!(!nodes.add("10.0.0.1:80".to_string()));

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes.get(), addrs(&["10.0.0.1:80", "10.0.0.2:80"]));
    }

    #[test]
    fn test_set_collapses_duplicates_to_first_occurrence() {
        let nodes = NodeList::new();
        nodes.set(addrs(&["b:1", "a:1", "b:1", "c:1", "a:1"]));

        assert_eq!(nodes.get(), addrs(&["b:1", "a:1", "c:1"]));
    }

    #[test]
    fn test_set_replaces_previous_content() {
        let nodes = NodeList::new();
        nodes.add("old:1".to_string());
        nodes.set(addrs(&["new:1", "new:2"]));

        assert_eq!(nodes.get(), addrs(&["new:1", "new:2"]));

        // An address dropped by set can be added again
        assert!(nodes.add("old:1".to_string()));
    }

    #[test]
    fn test_set_is_idempotent() {
        let nodes = NodeList::new();
        nodes.set(addrs(&["a:1", "b:1"]));
        let first = nodes.get();
        nodes.set(addrs(&["a:1", "b:1"]));
        assert_eq!(nodes.get(), first);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let nodes = NodeList::new();
        nodes.add("a:1".to_string());
        let snapshot = nodes.get();
        nodes.add("b:1".to_string());

        assert_eq!(snapshot, addrs(&["a:1"]));
    }

    #[test]
    fn test_concurrent_adds() {
        let nodes = Arc::new(NodeList::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let nodes = Arc::clone(&nodes);
                thread::spawn(move || {
                    for i in 0..50 {
                        // Every thread adds the same 50 addresses
                        nodes.add(format!("127.0.0.1:{}", 9000 + i));
                        let _ = nodes.get();
                        if t == 0 && i == 25 {
                            nodes.set(Vec::new());
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = nodes.get();
        let unique: HashSet<_> = snapshot.iter().collect();
        assert_eq!(unique.len(), snapshot.len());
    }
}
