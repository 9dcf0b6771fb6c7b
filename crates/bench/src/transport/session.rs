use std::time::Duration;

use async_trait::async_trait;
use backoff::{ExponentialBackoff, backoff::Backoff};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{net::TcpStream, time::timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};
use url::Url;

use super::{JsonRpcRequest, JsonRpcResponse, Method};
use crate::{CallError, ProtocolError, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on the close handshake when tearing a connection down.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// A duplex JSON-RPC channel to one node.
///
/// Implementations carry no correlation state of their own; ids come from
/// [`Method`], and [`super::RpcClient`] matches responses to requests.
#[async_trait]
pub trait Transport: Send {
    /// Writes one request frame.
    async fn send(&mut self, method: Method, params: Value) -> Result<(), TransportError>;

    /// Waits for the next response frame, bounded by the idle deadline.
    async fn receive(&mut self) -> Result<JsonRpcResponse, CallError>;

    /// Drops the current connection and dials the same endpoint again.
    async fn reconnect(&mut self) -> Result<(), TransportError>;

    /// Closes the connection. Further sends fail until [`Self::reconnect`].
    async fn close(&mut self);
}

/// Deadlines and reconnect pacing for a [`WsSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Read/write/dial deadline.
    pub idle_timeout: Duration,
    /// First delay between dial attempts on reconnect.
    pub reconnect_initial: Duration,
    /// Longest delay between dial attempts.
    pub reconnect_max_interval: Duration,
    /// Total time spent dialing before a reconnect gives up.
    pub reconnect_max_elapsed: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(120),
            reconnect_initial: Duration::from_millis(500),
            reconnect_max_interval: Duration::from_secs(5),
            reconnect_max_elapsed: Duration::from_secs(30),
        }
    }
}

impl SessionOptions {
    /// Sets the idle deadline.
    pub const fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Sets the total reconnect budget.
    pub const fn with_reconnect_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.reconnect_max_elapsed = max_elapsed;
        self
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.reconnect_initial,
            max_interval: self.reconnect_max_interval,
            max_elapsed_time: Some(self.reconnect_max_elapsed),
            ..Default::default()
        }
    }
}

/// A websocket [`Transport`].
#[derive(Debug)]
pub struct WsSession {
    endpoint: Url,
    options: SessionOptions,
    stream: Option<WsStream>,
}

impl WsSession {
    /// Dials `endpoint` once.
    pub async fn connect(endpoint: Url, options: SessionOptions) -> Result<Self, TransportError> {
        let stream = dial(&endpoint, options.idle_timeout).await?;
        info!(endpoint = %endpoint, "websocket session established");
        Ok(Self { endpoint, options, stream: Some(stream) })
    }

    /// Endpoint this session dials.
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Whether a connection is currently held.
    pub const fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn stream(&mut self) -> Result<&mut WsStream, TransportError> {
        self.stream.as_mut().ok_or(TransportError::Disconnected)
    }
}

#[async_trait]
impl Transport for WsSession {
    async fn send(&mut self, method: Method, params: Value) -> Result<(), TransportError> {
        let request = JsonRpcRequest::new(method, params);
        let payload = serde_json::to_string(&request).map_err(TransportError::Encode)?;
        trace!(%method, payload = payload.as_str(), "sending request");

        let idle = self.options.idle_timeout;
        let stream = self.stream()?;
        timeout(idle, stream.send(Message::Text(payload.into())))
            .await
            .map_err(|_| TransportError::Timeout(idle))?
            .map_err(|e| TransportError::Write(Box::new(e)))
    }

    async fn receive(&mut self) -> Result<JsonRpcResponse, CallError> {
        let idle = self.options.idle_timeout;
        loop {
            let stream = self.stream()?;
            let frame = timeout(idle, stream.next()).await.map_err(|_| TransportError::Timeout(idle))?;

            let payload = match frame {
                None => {
                    self.stream = None;
                    return Err(TransportError::Closed.into());
                }
                Some(Err(e)) => return Err(TransportError::Read(Box::new(e)).into()),
                Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
                Some(Ok(Message::Binary(data))) => data.to_vec(),
                Some(Ok(Message::Close(frame))) => {
                    debug!(endpoint = %self.endpoint, ?frame, "received close frame");
                    self.stream = None;
                    return Err(TransportError::Closed.into());
                }
                // tungstenite queues the pong for ping frames on its own.
                Some(Ok(_)) => continue,
            };

            trace!(size = payload.len(), "received frame");
            return serde_json::from_slice(&payload)
                .map_err(|e| CallError::Protocol(ProtocolError::Malformed(e)));
        }
    }

    async fn reconnect(&mut self) -> Result<(), TransportError> {
        self.close().await;

        let mut backoff = self.options.backoff();
        loop {
            match dial(&self.endpoint, self.options.idle_timeout).await {
                Ok(stream) => {
                    info!(endpoint = %self.endpoint, "websocket session re-established");
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(error) => match backoff.next_backoff() {
                    Some(delay) => {
                        warn!(
                            endpoint = %self.endpoint,
                            error = %error,
                            delay_ms = delay.as_millis() as u64,
                            "reconnect failed, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(error),
                },
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(error) = timeout(CLOSE_TIMEOUT, stream.close(None)).await.unwrap_or(Ok(())) {
                debug!(endpoint = %self.endpoint, error = %error, "close handshake failed");
            }
        }
    }
}

async fn dial(endpoint: &Url, deadline: Duration) -> Result<WsStream, TransportError> {
    let connect = connect_async(endpoint.as_str());
    let (stream, _) = timeout(deadline, connect)
        .await
        .map_err(|_| TransportError::Timeout(deadline))?
        .map_err(|e| TransportError::Connect { endpoint: endpoint.to_string(), source: Box::new(e) })?;
    Ok(stream)
}
