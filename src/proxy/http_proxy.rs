//! HTTP balancer.
//!
//! Serves HTTP/1.1 on the listener (optionally behind TLS) and forwards every
//! request to a backend node picked for that request. Upgrade requests are
//! handed to [`proxy_upgrade`](super::upgrade::proxy_upgrade).

use crate::backend::{BalanceStrategy, NodeAddr, Peer};
use crate::balancer::{Balancer, BalancerCore, BalancerError, Ready};
use crate::frontend::FrontendListener;
use crate::proxy::upgrade::{is_upgrade_request, proxy_upgrade};
use crate::tls::TlsSettings;
use crate::util::ConnId;
use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, instrument, warn};

/// Response body returned to clients.
pub(crate) type ProxyBody = BoxBody<Bytes, hyper::Error>;

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Headers that describe a single hop and are never forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("proxy-connection"),
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
];

/// HTTP proxy error.
#[derive(Debug, thiserror::Error)]
pub enum HttpProxyError {
    #[error("TLS handshake failed: {0}")]
    TlsHandshake(std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),
}

/// Context shared by every request of one client connection.
#[derive(Clone)]
pub(crate) struct ProxyContext {
    pub core: Arc<BalancerCore>,
    pub client_addr: SocketAddr,
    pub conn_id: ConnId,
    /// Whether the client connection was TLS-terminated here.
    pub tls: bool,
}

/// Layer 7 balancer reverse-proxying HTTP/1.x requests onto backend nodes.
pub struct HttpBalancer {
    core: Arc<BalancerCore>,
    tls: Option<TlsSettings>,
}

impl HttpBalancer {
    /// Create a balancer for `listen` (host:port).
    ///
    /// With `tls` set, the listener terminates TLS and backends receive
    /// `X-Forwarded-Proto: https`. `strategy` defaults to
    /// [`RoundRobin`](crate::backend::RoundRobin).
    pub fn new(
        listen: impl Into<String>,
        tls: Option<TlsSettings>,
        strategy: Option<Arc<dyn BalanceStrategy>>,
    ) -> Self {
        Self {
            core: Arc::new(BalancerCore::new(listen, strategy)),
            tls,
        }
    }

    /// Current backend nodes.
    pub fn nodes(&self) -> Vec<NodeAddr> {
        self.core.nodes().to_vec()
    }
}

impl Balancer for HttpBalancer {
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
        let acceptor = self.tls.as_ref().map(TlsSettings::acceptor);
        let listener = FrontendListener::bind(Arc::clone(&self.core), ready).await?;

        let core = Arc::clone(&self.core);
        listener
            .run(move |stream, client_addr| {
                let ctx = ProxyContext {
                    core: Arc::clone(&core),
                    client_addr,
                    conn_id: ConnId::next(),
                    tls: acceptor.is_some(),
                };
                let acceptor = acceptor.clone();

                tokio::spawn(async move {
                    let conn_id = ctx.conn_id.clone();
                    let start = Instant::now();

                    match handle_connection(stream, acceptor, ctx).await {
                        Ok(()) => debug!(
                            conn = %conn_id,
                            client = %client_addr,
                            duration_ms = start.elapsed().as_millis(),
                            "HTTP connection completed"
                        ),
                        Err(e) => warn!(
                            conn = %conn_id,
                            client = %client_addr,
                            error = %e,
                            "HTTP connection failed"
                        ),
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

/// Terminate TLS if configured, then serve HTTP/1.1 on the connection.
async fn handle_connection(
    stream: TcpStream,
    acceptor: Option<TlsAcceptor>,
    ctx: ProxyContext,
) -> Result<(), HttpProxyError> {
    match acceptor {
        Some(acceptor) => {
            let tls_stream = acceptor
                .accept(stream)
                .await
                .map_err(HttpProxyError::TlsHandshake)?;
            serve_http(tls_stream, ctx).await
        }
        None => serve_http(stream, ctx).await,
    }
}

async fn serve_http<S>(stream: S, ctx: ProxyContext) -> Result<(), HttpProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req| handle_request(req, ctx.clone()));

    http1::Builder::new()
        .keep_alive(true)
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades()
        .await?;
    Ok(())
}

/// Route one request to the upgrade or the reverse-proxy path.
async fn handle_request(
    req: Request<Incoming>,
    ctx: ProxyContext,
) -> Result<Response<ProxyBody>, Infallible> {
    if is_upgrade_request(req.headers()) {
        return Ok(proxy_upgrade(req, ctx).await);
    }
    Ok(proxy_request(req, ctx).await)
}

/// Proxy a single HTTP request to a backend node.
#[instrument(skip_all, fields(
    conn = %ctx.conn_id,
    method = %req.method(),
    uri = %req.uri(),
    client = %ctx.client_addr
))]
pub(crate) async fn proxy_request(mut req: Request<Incoming>, ctx: ProxyContext) -> Response<ProxyBody> {
    let start_time = Instant::now();

    let Some(backend_addr) = ctx.core.select(&request_peer(&req, &ctx)) else {
        warn!("no backend available");
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "No backend available");
    };

    remove_hop_by_hop_headers(req.headers_mut());
    prepare_outbound(&mut req, &backend_addr, &ctx);

    let backend_stream = match TcpStream::connect(backend_addr.as_str()).await {
        Ok(stream) => {
            let _ = stream.set_nodelay(true);
            stream
        }
        Err(e) => {
            error!(backend = %backend_addr, error = %e, "failed to connect to backend");
            return error_response(StatusCode::BAD_GATEWAY, "Failed to connect to backend");
        }
    };

    let (mut sender, conn) =
        match hyper::client::conn::http1::handshake(TokioIo::new(backend_stream)).await {
            Ok(result) => result,
            Err(e) => {
                error!(backend = %backend_addr, error = %e, "backend handshake failed");
                return error_response(StatusCode::BAD_GATEWAY, "Backend handshake failed");
            }
        };

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "backend connection error");
        }
    });

    let backend_response = match sender.send_request(req).await {
        Ok(resp) => resp,
        Err(e) => {
            error!(backend = %backend_addr, error = %e, "failed to send request to backend");
            return error_response(StatusCode::BAD_GATEWAY, "Failed to send request to backend");
        }
    };

    let (mut parts, body) = backend_response.into_parts();
    remove_hop_by_hop_headers(&mut parts.headers);

    info!(
        backend = %backend_addr,
        status = parts.status.as_u16(),
        duration_ms = start_time.elapsed().as_millis(),
        "proxied request completed"
    );

    Response::from_parts(parts, body.boxed())
}

/// Selection context for one request of the connection in `ctx`.
pub(crate) fn request_peer<'a, B>(req: &'a Request<B>, ctx: &ProxyContext) -> Peer<'a> {
    Peer::Http {
        client: ctx.client_addr,
        method: req.method(),
        uri: req.uri(),
        headers: req.headers(),
    }
}

/// Point `req` at `backend_addr` and add the forwarding headers.
///
/// The request line is rewritten to origin form; the scheme is always plain
/// `http` since backends are dialed over TCP. The client's `Host` header is
/// kept so backends can do virtual hosting.
pub(crate) fn prepare_outbound<B>(req: &mut Request<B>, backend_addr: &str, ctx: &ProxyContext) {
    let origin_form = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .parse::<Uri>()
        .unwrap_or_else(|_| Uri::from_static("/"));
    *req.uri_mut() = origin_form;

    let headers = req.headers_mut();

    if !headers.contains_key(header::HOST) {
        if let Ok(value) = HeaderValue::from_str(backend_addr) {
            headers.insert(header::HOST, value);
        }
    }

    let client_ip = ctx.client_addr.ip().to_string();
    let forwarded_for = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{}, {}", prior, client_ip),
        None => client_ip,
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    if ctx.tls {
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("https"));
    }
}

/// Strip hop-by-hop headers, including any named in `Connection`.
pub(crate) fn remove_hop_by_hop_headers(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    headers.remove(header::UPGRADE);
}

/// Create a plain-text error response.
pub(crate) fn error_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    let body = Full::new(Bytes::from(format!("{}: {}\n", status, message)))
        .map_err(|never| match never {})
        .boxed();

    let mut response = Response::new(body);
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
