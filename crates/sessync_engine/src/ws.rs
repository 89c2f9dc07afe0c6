//! WebSocket push transport.

use crate::error::{SyncError, SyncResult};
use crate::transport::{PushConnection, PushTransport};
use async_trait::async_trait;
use futures_util::StreamExt;
use sessync_protocol::RawFrame;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

/// Opens WebSocket connections to the provider's push endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    /// Creates a transport for `url` (`ws://` or `wss://`).
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Returns the endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PushTransport for WebSocketTransport {
    async fn connect(&self) -> SyncResult<Box<dyn PushConnection>> {
        let (stream, response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| SyncError::transport_retryable(format!("websocket connect: {e}")))?;
        debug!(url = %self.url, status = %response.status(), "websocket connected");
        Ok(Box::new(WebSocketConnection {
            inner: stream,
            closed: false,
        }))
    }
}

/// An open WebSocket connection.
pub struct WebSocketConnection {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

#[async_trait]
impl PushConnection for WebSocketConnection {
    async fn recv(&mut self) -> Option<SyncResult<RawFrame>> {
        if self.closed {
            return None;
        }
        loop {
            let message = match self.inner.next().await? {
                Ok(message) => message,
                Err(e) => {
                    self.closed = true;
                    return Some(Err(SyncError::transport_retryable(e.to_string())));
                }
            };
            match message {
                Message::Text(text) => return Some(Ok(RawFrame::Text(text.to_string()))),
                Message::Binary(bytes) => return Some(Ok(RawFrame::Binary(bytes.to_vec()))),
                Message::Close(frame) => {
                    trace!(?frame, "websocket close frame");
                    self.closed = true;
                    return None;
                }
                // tungstenite answers pings itself
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.inner.close(None).await;
        }
    }
}
