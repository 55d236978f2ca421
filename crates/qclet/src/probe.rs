//! Worker readiness probe.
//!
//! A probe is a bare WebSocket handshake against the worker address: if the
//! handshake completes within the deadline, the worker is accepting
//! connections. No inference payload is sent, and the transient connection
//! is released on every path.

use std::time::Duration;

use tokio_tungstenite::connect_async;

use crate::config::WorkerAddress;

/// Returns true only on a fully successful handshake within `deadline`.
///
/// Refused connections, timeouts, and protocol failures all report false;
/// callers treat the answer as a point-in-time observation, never a cached
/// status.
pub async fn probe_ready(address: &WorkerAddress, deadline: Duration) -> bool {
    let url = address.url();

    match tokio::time::timeout(deadline, connect_async(url.as_str())).await {
        Ok(Ok((mut ws, _))) => {
            // Release the socket before reporting ready; repeated polling
            // must not accumulate half-open connections on the worker.
            let _ = ws.close(None).await;
            true
        }
        Ok(Err(e)) => {
            tracing::trace!(%url, error = %e, "Readiness probe failed");
            false
        }
        Err(_) => {
            tracing::trace!(%url, ?deadline, "Readiness probe timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures::StreamExt;
    use tokio::net::TcpListener;

    async fn local_address() -> (TcpListener, WorkerAddress) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let address = WorkerAddress {
            scheme: "ws".to_string(),
            host: "127.0.0.1".to_string(),
            port,
        };
        (listener, address)
    }

    #[tokio::test]
    async fn answering_worker_probes_ready() {
        let (listener, address) = local_address().await;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            // Drain until the probe closes its side.
            while let Some(Ok(_)) = ws.next().await {}
        });

        assert!(probe_ready(&address, Duration::from_secs(2)).await);
        server.abort();
    }

    #[tokio::test]
    async fn refused_connection_is_not_ready() {
        let (listener, address) = local_address().await;
        drop(listener);

        assert!(!probe_ready(&address, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn stalled_handshake_times_out() {
        // Accepts TCP but never completes the WebSocket upgrade.
        let (listener, address) = local_address().await;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(stream);
        });

        assert!(!probe_ready(&address, Duration::from_millis(200)).await);
        server.abort();
    }
}
