//! glb - an embeddable TCP and HTTP(S) load balancer
//!
//! This crate provides two balancers behind one [`Balancer`] contract:
//! - [`TcpBalancer`] splices raw TCP connections onto backend nodes
//! - [`HttpBalancer`] reverse-proxies HTTP/1.x requests, relays WebSocket
//!   upgrades, and can terminate TLS
//!
//! Backend nodes are registered at runtime with `set_nodes` / `add_node` and
//! picked per connection (TCP) or per request (HTTP) by a pluggable
//! [`BalanceStrategy`], round-robin by default.

pub mod backend;
pub mod balancer;
pub mod config;
mod frontend;
pub mod proxy;
pub mod tls;
pub mod util;

pub use backend::{BalanceStrategy, NodeAddr, NodeList, Peer, RoundRobin};
pub use balancer::{Balancer, BalancerError, Ready};
pub use config::Config;
pub use proxy::{HttpBalancer, TcpBalancer};
pub use tls::{TlsError, TlsSettings};
