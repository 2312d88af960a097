//! WebSocket transport implementation.
//!
//! This module provides a standalone WebSocket listener using tokio-tungstenite.
//! Sockets are handed out before the WebSocket handshake; [`Socket::accept`]
//! performs it.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::{
    accept_async_with_config,
    tungstenite::{protocol::WebSocketConfig as ProtocolConfig, Error as WsError, Message},
    WebSocketStream,
};
use tracing::{debug, error, info};

use crate::traits::{Socket, TransportError};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_message_size: 64 * 1024, // 64 KB
        }
    }
}

/// WebSocket transport.
pub struct WebSocketTransport {
    listener: TcpListener,
    config: WebSocketConfig,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn new(config: WebSocketConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(TransportError::Io)?;

        info!("WebSocket transport listening on {}", config.bind_addr);

        Ok(Self { listener, config })
    }

    /// Create a new WebSocket transport with default config.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        Self::new(WebSocketConfig {
            bind_addr: addr,
            ..Default::default()
        })
        .await
    }

    /// Get the local address this transport is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// Wait for the next TCP connection.
    ///
    /// The returned socket has not completed the WebSocket handshake yet.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting the TCP connection fails.
    pub async fn incoming(&self) -> Result<WebSocketSocket, TransportError> {
        let (stream, addr) = self.listener.accept().await.map_err(TransportError::Io)?;

        debug!("Accepted TCP connection from {}", addr);

        Ok(WebSocketSocket::new(
            stream,
            addr,
            self.config.max_message_size,
        ))
    }
}

/// A WebSocket connection over a raw TCP stream.
pub struct WebSocketSocket {
    pending: Mutex<Option<TcpStream>>,
    sink: Mutex<Option<WsSink>>,
    stream: Mutex<Option<WsStream>>,
    remote_addr: SocketAddr,
    max_message_size: usize,
}

impl WebSocketSocket {
    fn new(stream: TcpStream, remote_addr: SocketAddr, max_message_size: usize) -> Self {
        Self {
            pending: Mutex::new(Some(stream)),
            sink: Mutex::new(None),
            stream: Mutex::new(None),
            remote_addr,
            max_message_size,
        }
    }
}

#[async_trait]
impl Socket for WebSocketSocket {
    async fn accept(&self) -> Result<(), TransportError> {
        let Some(tcp) = self.pending.lock().await.take() else {
            return Err(TransportError::Handshake("Socket already accepted".into()));
        };

        let mut config = ProtocolConfig::default();
        config.max_message_size = Some(self.max_message_size);

        let ws_stream = accept_async_with_config(tcp, Some(config))
            .await
            .map_err(|e| {
                error!("WebSocket handshake failed: {}", e);
                TransportError::Handshake(e.to_string())
            })?;

        debug!("WebSocket handshake completed with {}", self.remote_addr);

        let (sink, stream) = ws_stream.split();
        *self.sink.lock().await = Some(sink);
        *self.stream.lock().await = Some(stream);
        Ok(())
    }

    async fn receive_text(&self) -> Result<String, TransportError> {
        let mut guard = self.stream.lock().await;
        let stream = guard
            .as_mut()
            .ok_or_else(|| TransportError::Other("Socket not accepted".into()))?;

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Binary(data))) => {
                    return String::from_utf8(data)
                        .map_err(|e| TransportError::ReceiveFailed(e.to_string()));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                    // tungstenite queues pong replies on its own
                }
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame");
                    return Err(TransportError::ConnectionClosed);
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    debug!("WebSocket stream ended");
                    return Err(TransportError::ConnectionClosed);
                }
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            }
        }
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| TransportError::Other("Socket not accepted".into()))?;

        sink.send(Message::Text(text.to_owned()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut guard = self.sink.lock().await;
        match guard.as_mut() {
            Some(sink) => sink
                .close()
                .await
                .map_err(|e| TransportError::Other(format!("Failed to close: {e}"))),
            None => Ok(()),
        }
    }

    fn remote_addr(&self) -> Option<String> {
        Some(self.remote_addr.to_string())
    }
}
