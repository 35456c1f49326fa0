//! Bidirectional byte splice between two established streams.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Relay bytes between `client` and `backend` until both directions end.
///
/// Spawns one task per direction. Each task copies until its source hits
/// end-of-stream or fails, then shuts down its destination. The tasks do not
/// wait for each other; the streams are released once both have finished.
pub fn splice<C, B>(client: C, backend: B)
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (backend_read, backend_write) = tokio::io::split(backend);

    tokio::spawn(copy_and_close(client_read, backend_write, "client->backend"));
    tokio::spawn(copy_and_close(backend_read, client_write, "backend->client"));
}

/// Copy `reader` into `writer`, then shut `writer` down.
///
/// Returns the number of bytes copied, or 0 if the copy failed.
pub async fn copy_and_close<R, W>(mut reader: R, mut writer: W, direction: &'static str) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let copied = match tokio::io::copy(&mut reader, &mut writer).await {
        Ok(n) => n,
        Err(e) => {
            debug!(direction, error = %e, "splice direction failed");
            0
        }
    };

    let _ = writer.shutdown().await;
    debug!(direction, bytes = copied, "splice direction finished");
    copied
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};

    #[tokio::test]
    async fn test_copy_and_close_shuts_down_destination() {
        let (mut src_tx, src_rx) = duplex(64);
        let (dst_tx, mut dst_rx) = duplex(64);

        src_tx.write_all(b"hello").await.unwrap();
        drop(src_tx);

        let copied = copy_and_close(src_rx, dst_tx, "test").await;
        assert_eq!(copied, 5);

        let mut out = Vec::new();
        dst_rx.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn test_splice_relays_both_directions() {
        let (mut client, client_side) = duplex(1024);
        let (backend_side, mut backend) = duplex(1024);

        splice(client_side, backend_side);

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        backend.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        backend.write_all(b"pong").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        // Closing the backend ends the backend->client direction only
        drop(backend);
        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(1), client.read_to_end(&mut rest))
            .await
            .expect("client should see end of stream")
            .unwrap();
        assert!(rest.is_empty());
    }
}
