//! TCP balancer.
//!
//! Forwards each accepted connection to one backend node as an opaque
//! byte stream.

use crate::backend::{BalanceStrategy, NodeAddr, Peer};
use crate::balancer::{Balancer, BalancerCore, BalancerError, Ready};
use crate::frontend::FrontendListener;
use crate::proxy::splice;
use crate::util::ConnId;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, info, instrument, warn};

/// TCP proxy error.
#[derive(Debug, thiserror::Error)]
pub enum TcpProxyError {
    #[error("no backend available")]
    NoBackendAvailable,

    #[error("failed to connect to backend {0}: {1}")]
    BackendConnectError(NodeAddr, io::Error),
}

/// Layer 4 balancer splicing raw TCP connections onto backend nodes.
pub struct TcpBalancer {
    core: Arc<BalancerCore>,
}

impl TcpBalancer {
    /// Create a balancer for `listen` (host:port).
    ///
    /// `strategy` defaults to [`RoundRobin`](crate::backend::RoundRobin).
    pub fn new(listen: impl Into<String>, strategy: Option<Arc<dyn BalanceStrategy>>) -> Self {
        Self {
            core: Arc::new(BalancerCore::new(listen, strategy)),
        }
    }

    /// Current backend nodes.
    pub fn nodes(&self) -> Vec<NodeAddr> {
        self.core.nodes().to_vec()
    }
}

impl Balancer for TcpBalancer {
    fn set_nodes(&self, nodes: Vec<NodeAddr>) {
        self.core.set_nodes(nodes);
    }

    fn add_node(&self, node: NodeAddr) {
        self.core.add_node(node);
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.core.local_addr()
    }

    async fn serve(&self, ready: Option<Ready>) -> Result<(), BalancerError> {
        let listener = FrontendListener::bind(Arc::clone(&self.core), ready).await?;

        let core = Arc::clone(&self.core);
        listener
            .run(move |stream, client_addr| {
                let core = Arc::clone(&core);
                let conn_id = ConnId::next();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, client_addr, &core, &conn_id).await {
                        warn!(
                            conn = %conn_id,
                            client = %client_addr,
                            error = %e,
                            "TCP connection dropped"
                        );
                    }
                });
            })
            .await;

        Ok(())
    }

    fn close(&self) -> Result<(), BalancerError> {
        self.core.close()
    }
}

/// Connect to a backend node.
#[instrument(skip_all, fields(backend = %addr))]
pub async fn connect_to_backend(addr: &str) -> Result<TcpStream, TcpProxyError> {
    debug!("connecting to backend");

    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| TcpProxyError::BackendConnectError(addr.to_string(), e))?;

    if let Err(e) = stream.set_nodelay(true) {
        warn!(error = %e, "failed to set TCP_NODELAY on backend connection");
    }
    Ok(stream)
}

/// Pick a node for `client_stream` and start splicing.
///
/// On error the inbound stream has already been dropped, which closes it.
async fn handle_connection(
    client_stream: TcpStream,
    client_addr: SocketAddr,
    core: &BalancerCore,
    conn_id: &ConnId,
) -> Result<(), TcpProxyError> {
    let backend_addr = core
        .select(&Peer::Tcp {
            client: client_addr,
        })
        .ok_or(TcpProxyError::NoBackendAvailable)?;

    let backend_stream = connect_to_backend(&backend_addr).await?;

    info!(
        conn = %conn_id,
        client = %client_addr,
        backend = %backend_addr,
        "TCP proxy session starting"
    );

    splice(client_stream, backend_stream);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_connect_to_backend_success() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        assert!(connect_to_backend(&addr.to_string()).await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_to_backend_refused() {
        // Bind then drop to get a port nothing listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        match connect_to_backend(&addr.to_string()).await {
            Err(TcpProxyError::BackendConnectError(node, _)) => assert_eq!(node, addr.to_string()),
            other => panic!("expected connect error, got: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_no_backend_closes_connection() {
        let lb = Arc::new(TcpBalancer::new("127.0.0.1:0", None));
        let (tx, rx) = oneshot::channel();
        let server = {
            let lb = Arc::clone(&lb);
            tokio::spawn(async move { lb.serve(Some(tx)).await })
        };
        let addr = rx.await.unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let _ = client.write_all(b"anyone?").await;
        let mut buf = Vec::new();
        let n = client.read_to_end(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);

        lb.close().unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_serve_twice_is_rejected() {
        let lb = Arc::new(TcpBalancer::new("127.0.0.1:0", None));
        let (tx, rx) = oneshot::channel();
        let server = {
            let lb = Arc::clone(&lb);
            tokio::spawn(async move { lb.serve(Some(tx)).await })
        };
        rx.await.unwrap();

        assert!(matches!(lb.serve(None).await, Err(BalancerError::AlreadyServing)));

        lb.close().unwrap();
        server.await.unwrap().unwrap();
        assert!(matches!(lb.close(), Err(BalancerError::NotListening)));
    }
}
