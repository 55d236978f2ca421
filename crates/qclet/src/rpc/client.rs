//! One-shot inference RPC client.
//!
//! Protocol per request: open a fresh connection, send exactly one request
//! frame, await exactly one response frame, close. No reuse, no
//! pipelining - the worker processes one message per connection, and
//! inference dominates latency, so per-request connection overhead is
//! acceptable.
//!
//! Every exit path - success, timeout, malformed frame, worker error -
//! releases the connection. Leaked half-open connections would eventually
//! exhaust the worker's accept capacity.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

use super::protocol::{Analysis, InferenceRequest, ReplyError, decode_reply};
use crate::config::WorkerAddress;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection and deadline knobs for one inference exchange.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connection attempts before giving up.
    pub connect_attempts: u32,
    /// Fixed pause between attempts.
    pub connect_backoff: Duration,
    /// Deadline for a single connection attempt.
    pub connect_timeout: Duration,
    /// Overall deadline for the response. Generous - the first call after
    /// worker start pays model warm-up.
    pub response_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 6,
            connect_backoff: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(60),
        }
    }
}

impl ClientConfig {
    pub fn with_connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts;
        self
    }

    pub fn with_connect_backoff(mut self, backoff: Duration) -> Self {
        self.connect_backoff = backoff;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }
}

/// Inference call failures, normalized for the host.
#[derive(Debug, thiserror::Error)]
pub enum InferError {
    #[error("model server unreachable after {attempts} attempts: {last_error}")]
    Unreachable { attempts: u32, last_error: String },
    #[error("no response from model server within {0:?}")]
    Timeout(Duration),
    #[error("connection closed before a response arrived")]
    ConnectionClosed,
    #[error("malformed model server response: {0}")]
    MalformedResponse(String),
    #[error("model server reported an error: {0}")]
    WorkerReported(String),
}

/// Run one inference exchange against the worker.
///
/// Independent of whether the supervisor spawned the worker or found it
/// already running; concurrent calls share nothing but the address.
pub async fn infer(
    address: &WorkerAddress,
    request: &InferenceRequest,
    config: &ClientConfig,
) -> Result<Analysis, InferError> {
    let request_id = Uuid::new_v4();
    tracing::debug!(%request_id, image_path = %request.image_path, "Starting inference call");

    let mut ws = connect_with_retry(address, config, request_id).await?;
    let result = exchange(&mut ws, request, config, request_id).await;

    // One-shot: nothing further is expected on this connection in any
    // outcome, including timeout with the worker still mid-processing.
    let _ = ws.close(None).await;

    match &result {
        Ok(analysis) => {
            tracing::info!(
                %request_id,
                prediction = %analysis.prediction,
                confidence = %analysis.confidence_level,
                "Inference succeeded"
            );
        }
        Err(e) => {
            tracing::warn!(%request_id, error = %e, "Inference failed");
        }
    }
    result
}

async fn connect_with_retry(
    address: &WorkerAddress,
    config: &ClientConfig,
    request_id: Uuid,
) -> Result<WsStream, InferError> {
    let url = address.url();
    let mut last_error = String::from("no connection attempts configured");

    for attempt in 1..=config.connect_attempts {
        match tokio::time::timeout(config.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((ws, _))) => {
                tracing::trace!(%request_id, attempt, "Connected to model server");
                return Ok(ws);
            }
            Ok(Err(e)) => {
                tracing::debug!(%request_id, attempt, error = %e, "Connect attempt failed");
                last_error = e.to_string();
            }
            Err(_) => {
                tracing::debug!(%request_id, attempt, "Connect attempt timed out");
                last_error = format!("connect timed out after {:?}", config.connect_timeout);
            }
        }

        if attempt < config.connect_attempts {
            tokio::time::sleep(config.connect_backoff).await;
        }
    }

    Err(InferError::Unreachable {
        attempts: config.connect_attempts,
        last_error,
    })
}

async fn exchange(
    ws: &mut WsStream,
    request: &InferenceRequest,
    config: &ClientConfig,
    request_id: Uuid,
) -> Result<Analysis, InferError> {
    // Request goes out immediately on open.
    if let Err(e) = ws.send(Message::Text(request.to_frame())).await {
        tracing::debug!(%request_id, error = %e, "Failed to send request frame");
        return Err(InferError::ConnectionClosed);
    }

    let frame = match tokio::time::timeout(config.response_timeout, await_reply(ws)).await {
        Ok(reply) => reply?,
        Err(_) => return Err(InferError::Timeout(config.response_timeout)),
    };

    match decode_reply(&frame) {
        Ok(analysis) => Ok(analysis),
        Err(ReplyError::Worker(message)) => Err(InferError::WorkerReported(message)),
        Err(ReplyError::Malformed(message)) => Err(InferError::MalformedResponse(message)),
    }
}

/// Wait for the single data frame that is the response.
///
/// Control frames are skipped. A close frame, stream end, or transport
/// error before any data frame means the worker went away - distinct from
/// a timeout.
async fn await_reply(ws: &mut WsStream) -> Result<String, InferError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text),
            Some(Ok(Message::Binary(bytes))) => {
                return String::from_utf8(bytes)
                    .map_err(|e| InferError::MalformedResponse(e.to_string()));
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
            Some(Ok(Message::Close(_))) | None => return Err(InferError::ConnectionClosed),
            Some(Err(e)) => {
                tracing::debug!(error = %e, "Transport error awaiting response");
                return Err(InferError::ConnectionClosed);
            }
        }
    }
}
