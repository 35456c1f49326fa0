//! Load balancing strategies.

mod round_robin;

pub use round_robin::{round_robin, RoundRobin};

use super::NodeAddr;
use hyper::header::HeaderMap;
use hyper::{Method, Uri};
use std::net::SocketAddr;

/// The traffic a node is being selected for.
#[derive(Debug, Clone, Copy)]
pub enum Peer<'a> {
    /// A raw TCP connection, balanced once per connection.
    Tcp { client: SocketAddr },

    /// One HTTP request, upgrade requests included. The head is seen as the
    /// client sent it, before any forwarding headers are applied.
    Http {
        client: SocketAddr,
        method: &'a Method,
        uri: &'a Uri,
        headers: &'a HeaderMap,
    },
}

impl<'a> Peer<'a> {
    /// Address of the connecting client.
    pub fn client(&self) -> SocketAddr {
        match self {
            Peer::Tcp { client } | Peer::Http { client, .. } => *client,
        }
    }

    /// Request headers, for HTTP traffic.
    pub fn headers(&self) -> Option<&'a HeaderMap> {
        match self {
            Peer::Tcp { .. } => None,
            Peer::Http { headers, .. } => Some(*headers),
        }
    }

    /// Request `Host`, falling back to the authority of an absolute-form
    /// target. `None` for TCP traffic.
    pub fn host(&self) -> Option<&'a str> {
        match self {
            Peer::Tcp { .. } => None,
            Peer::Http { uri, headers, .. } => headers
                .get(hyper::header::HOST)
                .and_then(|v| v.to_str().ok())
                .or_else(|| uri.host()),
        }
    }
}

/// Trait for load balancing strategies.
///
/// A strategy is handed the node snapshot that was current when the
/// connection or request arrived and picks one of them. Implementations are
/// called concurrently from every connection task of a balancer, so any
/// selection state must be synchronized internally.
pub trait BalanceStrategy: Send + Sync {
    /// Select the backend node for the next connection or request.
    ///
    /// # Arguments
    ///
    /// * `nodes` - Registered nodes, in registry order
    /// * `peer` - The connection or request being balanced
    ///
    /// # Returns
    ///
    /// The selected node, or `None` if no node is available.
    fn select(&self, nodes: &[NodeAddr], peer: &Peer<'_>) -> Option<NodeAddr>;
}

impl<F> BalanceStrategy for F
where
    F: Fn(&[NodeAddr], &Peer<'_>) -> Option<NodeAddr> + Send + Sync,
{
    fn select(&self, nodes: &[NodeAddr], peer: &Peer<'_>) -> Option<NodeAddr> {
        self(nodes, peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;
    use std::sync::Arc;

    fn tcp_peer() -> Peer<'static> {
        Peer::Tcp {
            client: "127.0.0.1:40000".parse().unwrap(),
        }
    }

    #[test]
    fn test_closure_strategy() {
        let last: Arc<dyn BalanceStrategy> =
            Arc::new(|nodes: &[NodeAddr], _peer: &Peer<'_>| nodes.last().cloned());

        let nodes = vec!["a:1".to_string(), "b:1".to_string()];
        assert_eq!(last.select(&nodes, &tcp_peer()).as_deref(), Some("b:1"));
        assert_eq!(last.select(&[], &tcp_peer()), None);
    }

    #[test]
    fn test_closure_strategy_routes_on_host() {
        let by_host: Arc<dyn BalanceStrategy> =
            Arc::new(|nodes: &[NodeAddr], peer: &Peer<'_>| match peer.host() {
                Some("api.example.com") => nodes.get(1).cloned(),
                _ => nodes.first().cloned(),
            });
        let nodes = vec!["web:80".to_string(), "api:80".to_string()];

        let method = Method::GET;
        let uri: Uri = "/v1/items".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(hyper::header::HOST, HeaderValue::from_static("api.example.com"));
        let api = Peer::Http {
            client: "10.0.0.7:5000".parse().unwrap(),
            method: &method,
            uri: &uri,
            headers: &headers,
        };
        assert_eq!(by_host.select(&nodes, &api).as_deref(), Some("api:80"));

        headers.insert(hyper::header::HOST, HeaderValue::from_static("www.example.com"));
        let web = Peer::Http {
            client: "10.0.0.7:5000".parse().unwrap(),
            method: &method,
            uri: &uri,
            headers: &headers,
        };
        assert_eq!(by_host.select(&nodes, &web).as_deref(), Some("web:80"));

        assert_eq!(by_host.select(&nodes, &tcp_peer()).as_deref(), Some("web:80"));
    }

    #[test]
    fn test_peer_accessors() {
        let tcp = tcp_peer();
        assert_eq!(tcp.client().port(), 40000);
        assert!(tcp.headers().is_none());
        assert!(tcp.host().is_none());

        let method = Method::GET;
        let uri: Uri = "http://absolute.example.com/x".parse().unwrap();
        let headers = HeaderMap::new();
        let http = Peer::Http {
            client: "10.0.0.7:5000".parse().unwrap(),
            method: &method,
            uri: &uri,
            headers: &headers,
        };
        assert_eq!(http.client().port(), 5000);
        assert!(http.headers().is_some_and(|h| h.is_empty()));
        assert_eq!(http.host(), Some("absolute.example.com"));
    }
}
