//! Backend node registry and load balancing strategies.

pub mod algorithms;
mod nodes;

pub use algorithms::{BalanceStrategy, Peer, RoundRobin};
pub use nodes::{NodeAddr, NodeList};
