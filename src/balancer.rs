//! The contract shared by the TCP and HTTP balancers.
//!
//! Both balancers own a [`BalancerCore`]: the node registry, the lock-free
//! snapshot handlers read from, the selection strategy and the listener
//! lifecycle state. Only the per-connection handling differs.

use crate::backend::{BalanceStrategy, NodeAddr, NodeList, Peer, RoundRobin};
use crate::util::ShutdownSignal;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// One-shot readiness notification, sent the bound address once the
/// listener is up.
///
/// Dropped without a value when binding fails, so a waiting receiver always
/// wakes up.
pub type Ready = oneshot::Sender<SocketAddr>;

/// Errors reported by a balancer's lifecycle operations.
#[derive(Debug, Error)]
pub enum BalancerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("balancer is already serving")]
    AlreadyServing,

    #[error("balancer is not listening")]
    NotListening,
}

/// A load balancer forwarding inbound traffic to a set of backend nodes.
pub trait Balancer: Send + Sync {
    /// Replace the backend node set.
    fn set_nodes(&self, nodes: Vec<NodeAddr>);

    /// Add one backend node; no-op if already registered.
    fn add_node(&self, node: NodeAddr);

    /// Address the listener is bound to. `None` until `serve` has bound, and
    /// again once it has returned.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Bind the listen address and run the accept loop until [`close`].
    ///
    /// `ready` receives the bound address before the first accept.
    /// Returns `Ok(())` once closed, or an error if the balancer could not
    /// start.
    ///
    /// [`close`]: Balancer::close
    fn serve(&self, ready: Option<Ready>) -> impl Future<Output = Result<(), BalancerError>> + Send;

    /// Stop accepting new connections. In-flight connections are left to
    /// finish on their own.
    fn close(&self) -> Result<(), BalancerError>;
}

/// State shared by a balancer and all of its connection tasks.
pub(crate) struct BalancerCore {
    listen: String,
    registry: NodeList,
    /// Copy of the registry, swapped on every mutation.
    snapshot: ArcSwap<Vec<NodeAddr>>,
    /// Serializes registry mutation with the snapshot swap.
    update: Mutex<()>,
    strategy: Arc<dyn BalanceStrategy>,
    bound: Mutex<Option<SocketAddr>>,
    listening: AtomicBool,
    shutdown: ShutdownSignal,
}

impl BalancerCore {
    pub(crate) fn new(listen: impl Into<String>, strategy: Option<Arc<dyn BalanceStrategy>>) -> Self {
        Self {
            listen: listen.into(),
            registry: NodeList::new(),
            snapshot: ArcSwap::from_pointee(Vec::new()),
            update: Mutex::new(()),
            strategy: strategy.unwrap_or_else(|| Arc::new(RoundRobin::new())),
            bound: Mutex::new(None),
            listening: AtomicBool::new(false),
            shutdown: ShutdownSignal::new(),
        }
    }

    pub(crate) fn listen(&self) -> &str {
        &self.listen
    }

    pub(crate) fn set_nodes(&self, nodes: Vec<NodeAddr>) {
        let _guard = self.update.lock();
        self.registry.set(nodes);
        self.refresh();
    }

    pub(crate) fn add_node(&self, node: NodeAddr) {
        let _guard = self.update.lock();
        if self.registry.add(node) {
            self.refresh();
        }
    }

    fn refresh(&self) {
        let nodes = self.registry.get();
        info!(listen = %self.listen, nodes = ?nodes, "backend nodes updated");
        self.snapshot.store(Arc::new(nodes));
    }

    /// Nodes as of the last mutation.
    pub(crate) fn nodes(&self) -> Arc<Vec<NodeAddr>> {
        self.snapshot.load_full()
    }

    /// Ask the strategy for the node to use for one connection or request.
    pub(crate) fn select(&self, peer: &Peer<'_>) -> Option<NodeAddr> {
        let nodes = self.snapshot.load();
        let selected = self.strategy.select(&nodes, peer);
        if let Some(node) = &selected {
            debug!(node = %node, "selected backend node");
        }
        selected
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.lock()
    }

    /// Claim the listener slot before binding.
    pub(crate) fn start(&self) -> Result<(), BalancerError> {
        if self.listening.swap(true, Ordering::SeqCst) {
            return Err(BalancerError::AlreadyServing);
        }
        self.shutdown.reset();
        Ok(())
    }

    pub(crate) fn bound(&self, addr: SocketAddr) {
        *self.bound.lock() = Some(addr);
    }

    /// Release the listener slot once the accept loop has ended or bind failed.
    pub(crate) fn stopped(&self) {
        *self.bound.lock() = None;
        self.listening.store(false, Ordering::SeqCst);
    }

    pub(crate) fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    pub(crate) fn close(&self) -> Result<(), BalancerError> {
        if !self.listening.load(Ordering::SeqCst) {
            return Err(BalancerError::NotListening);
        }
        info!(listen = %self.listen, "closing listener");
        self.shutdown.shutdown();
        Ok(())
    }
}
