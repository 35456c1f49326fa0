//! Round-robin load balancing algorithm.

use super::{BalanceStrategy, Peer};
use crate::backend::NodeAddr;
use parking_lot::Mutex;

/// Pick the node following `last` in `nodes`.
///
/// Starts over at the head of the list when `last` is unset, is the final
/// node, or is no longer registered. `last` is updated to the selection.
pub fn round_robin(nodes: &[NodeAddr], last: &mut Option<NodeAddr>) -> Option<NodeAddr> {
    match nodes.len() {
        0 => return None,
        1 => return Some(nodes[0].clone()),
        _ => {}
    }

    let next = last
        .as_ref()
        .and_then(|prev| nodes.iter().position(|n| n == prev))
        .map(|i| i + 1)
        .filter(|&i| i < nodes.len())
        .unwrap_or(0);

    let selected = nodes[next].clone();
    *last = Some(selected.clone());
    Some(selected)
}

/// Round-robin load balancer.
///
/// Remembers the last selected address rather than an index, so the cycle
/// survives nodes being added or removed between selections.
#[derive(Debug, Default)]
pub struct RoundRobin {
    last: Mutex<Option<NodeAddr>>,
}

impl RoundRobin {
    /// Create a new round-robin load balancer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl BalanceStrategy for RoundRobin {
    fn select(&self, nodes: &[NodeAddr], _peer: &Peer<'_>) -> Option<NodeAddr> {
        let mut last = self.last.lock();
        round_robin(nodes, &mut last)
    }
}
