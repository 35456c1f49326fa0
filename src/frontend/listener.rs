//! Frontend listener implementation.

use crate::balancer::{BalancerCore, BalancerError, Ready};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, instrument, warn};

/// Pause after a failed accept, so a persistent error such as fd
/// exhaustion does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Bound listener of one balancer.
pub(crate) struct FrontendListener {
    core: Arc<BalancerCore>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl FrontendListener {
    /// Bind the balancer's listen address and signal `ready`.
    pub(crate) async fn bind(
        core: Arc<BalancerCore>,
        ready: Option<Ready>,
    ) -> Result<Self, BalancerError> {
        core.start()?;

        let bound = async {
            let listener = TcpListener::bind(core.listen()).await?;
            let local_addr = listener.local_addr()?;
            Ok::<_, std::io::Error>((listener, local_addr))
        }
        .await;

        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                core.stopped();
                return Err(BalancerError::Bind {
                    addr: core.listen().to_string(),
                    source,
                });
            }
        };

        core.bound(local_addr);
        info!(listen = %core.listen(), addr = %local_addr, "frontend listener bound");

        if let Some(ready) = ready {
            // The caller may have stopped waiting; serving goes on regardless
            let _ = ready.send(local_addr);
        }

        Ok(Self {
            core,
            listener,
            local_addr,
        })
    }

    /// Accept connections until the balancer is closed.
    ///
    /// `handle` must not block: it is expected to spawn the connection task.
    #[instrument(skip_all, fields(addr = %self.local_addr))]
    pub(crate) async fn run<F>(self, mut handle: F)
    where
        F: FnMut(TcpStream, SocketAddr),
    {
        info!("frontend listener starting");
        let shutdown = self.core.shutdown_signal().clone();

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                warn!(error = %e, "failed to set TCP_NODELAY on client connection");
                            }
                            handle(stream, addr);
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        }
                    }
                }

                _ = shutdown.wait() => {
                    info!("frontend listener shutting down");
                    break;
                }
            }
        }

        // Dropping the listener closes the socket
        drop(self.listener);
        self.core.stopped();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_bind_reports_address() {
        let core = Arc::new(BalancerCore::new("127.0.0.1:0", None));
        let (tx, rx) = oneshot::channel();

        let listener = FrontendListener::bind(Arc::clone(&core), Some(tx)).await.unwrap();
        let addr = rx.await.unwrap();

        assert_eq!(addr, listener.local_addr);
        assert_eq!(core.local_addr(), Some(addr));
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_failure_drops_ready() {
        let core = Arc::new(BalancerCore::new("not-an-address", None));
        let (tx, rx) = oneshot::channel();

        let result = FrontendListener::bind(Arc::clone(&core), Some(tx)).await;
        assert!(matches!(result, Err(BalancerError::Bind { .. })));
        assert!(rx.await.is_err());

        // The slot is released so a later serve may retry
        assert!(matches!(core.close(), Err(BalancerError::NotListening)));
    }

    #[tokio::test]
    async fn test_run_exits_on_close() {
        let core = Arc::new(BalancerCore::new("127.0.0.1:0", None));
        let listener = FrontendListener::bind(Arc::clone(&core), None).await.unwrap();
        let addr = listener.local_addr;

        let accepted = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);
        let task = tokio::spawn(listener.run(move |_stream, _peer| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }));

        let _client = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(accepted.load(std::sync::atomic::Ordering::SeqCst), 1);

        core.close().unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("accept loop should stop")
            .unwrap();

        assert!(core.local_addr().is_none());
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
