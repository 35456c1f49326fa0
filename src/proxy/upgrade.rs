//! WebSocket (protocol upgrade) proxying.
//!
//! The upgrade request is replayed to the backend over a fresh TCP
//! connection. The backend's answer is relayed to the client; on
//! `101 Switching Protocols` both connections are taken over from the HTTP
//! layer and spliced as raw byte streams.

use super::http_proxy::{
    error_response, prepare_outbound, remove_hop_by_hop_headers, request_peer, ProxyBody,
    ProxyContext,
};
use super::splice;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::{self, HeaderMap};
use hyper::upgrade::OnUpgrade;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::{debug, info, instrument, warn};

/// Whether the request asks to switch to the WebSocket protocol.
///
/// `Connection` may carry several comma-separated tokens; both header values
/// are matched case-insensitively.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    let upgrade_websocket = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"));

    connection_upgrade && upgrade_websocket
}

/// Proxy a WebSocket upgrade request.
#[instrument(skip_all, fields(
    conn = %ctx.conn_id,
    uri = %req.uri(),
    client = %ctx.client_addr
))]
pub(crate) async fn proxy_upgrade(mut req: Request<Incoming>, ctx: ProxyContext) -> Response<ProxyBody> {
    let Some(client_upgrade) = req.extensions_mut().remove::<OnUpgrade>() else {
        warn!("connection does not support upgrades");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "websocket: server doesn't support connection upgrades",
        );
    };

    let Some(backend_addr) = ctx.core.select(&request_peer(&req, &ctx)) else {
        warn!("no backend available");
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "No backend available");
    };

    // Dialed before the client connection is taken over, so a failure can
    // still be answered with a regular response
    let backend_stream = match TcpStream::connect(backend_addr.as_str()).await {
        Ok(stream) => {
            let _ = stream.set_nodelay(true);
            stream
        }
        Err(e) => {
            warn!(backend = %backend_addr, error = %e, "websocket: could not connect to backend");
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "websocket: could not connect to backend",
            );
        }
    };

    prepare_outbound(&mut req, &backend_addr, &ctx);

    let (mut sender, conn) =
        match hyper::client::conn::http1::handshake(TokioIo::new(backend_stream)).await {
            Ok(result) => result,
            Err(e) => {
                warn!(backend = %backend_addr, error = %e, "websocket: backend handshake failed");
                return error_response(StatusCode::BAD_GATEWAY, "websocket: backend handshake failed");
            }
        };

    tokio::spawn(async move {
        if let Err(e) = conn.with_upgrades().await {
            debug!(error = %e, "websocket backend connection error");
        }
    });

    // Writes the request line and headers as received, Connection and
    // Upgrade included
    let mut backend_response = match sender.send_request(req).await {
        Ok(resp) => resp,
        Err(e) => {
            warn!(
                backend = %backend_addr,
                error = %e,
                "websocket: could not forward request to backend"
            );
            return error_response(
                StatusCode::BAD_GATEWAY,
                "websocket: could not forward request to backend",
            );
        }
    };

    if backend_response.status() != StatusCode::SWITCHING_PROTOCOLS {
        info!(
            backend = %backend_addr,
            status = backend_response.status().as_u16(),
            "backend declined websocket upgrade"
        );
        remove_hop_by_hop_headers(backend_response.headers_mut());
        return backend_response.map(|body| body.boxed());
    }

    let backend_upgrade = hyper::upgrade::on(&mut backend_response);
    let conn_id = ctx.conn_id.clone();
    let relay_backend = backend_addr.clone();

    tokio::spawn(async move {
        match tokio::try_join!(client_upgrade, backend_upgrade) {
            Ok((client, backend)) => {
                info!(conn = %conn_id, backend = %relay_backend, "websocket relay starting");
                splice(TokioIo::new(client), TokioIo::new(backend));
            }
            Err(e) => {
                warn!(conn = %conn_id, backend = %relay_backend, error = %e, "websocket upgrade failed");
            }
        }
    });

    backend_response.map(|body| body.boxed())
}
