//! Protocol engines: raw TCP forwarding and HTTP reverse proxying.

mod http_proxy;
mod splice;
mod tcp_proxy;
mod upgrade;

pub use http_proxy::{HttpBalancer, HttpProxyError};
pub use splice::{copy_and_close, splice};
pub use tcp_proxy::{connect_to_backend, TcpBalancer, TcpProxyError};
pub use upgrade::is_upgrade_request;
