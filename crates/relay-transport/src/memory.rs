//! In-memory socket pair.
//!
//! [`MemorySocket`] is the server half and implements [`Socket`];
//! [`MemoryClient`] is the peer that drives it. Dropping or closing the
//! client is seen by the server half as a disconnect.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, Mutex};
use tracing::trace;

use crate::traits::{Socket, TransportError};

/// Server half of an in-memory socket pair.
pub struct MemorySocket {
    incoming: Mutex<mpsc::UnboundedReceiver<String>>,
    outgoing: mpsc::UnboundedSender<String>,
    accepted: AtomicBool,
    closed: AtomicBool,
}

/// Client half of an in-memory socket pair.
pub struct MemoryClient {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl MemorySocket {
    /// Create a connected socket/client pair.
    #[must_use]
    pub fn pair() -> (MemorySocket, MemoryClient) {
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();

        let socket = MemorySocket {
            incoming: Mutex::new(server_rx),
            outgoing: server_tx,
            accepted: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        };
        let client = MemoryClient {
            tx: Some(client_tx),
            rx: client_rx,
        };

        (socket, client)
    }

    /// Whether `accept` has completed.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.accepted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Socket for MemorySocket {
    async fn accept(&self) -> Result<(), TransportError> {
        if self.outgoing.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }
        if self.accepted.swap(true, Ordering::SeqCst) {
            return Err(TransportError::Handshake("Socket already accepted".into()));
        }
        Ok(())
    }

    async fn receive_text(&self) -> Result<String, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        let mut incoming = self.incoming.lock().await;
        incoming.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if !self.is_accepted() {
            return Err(TransportError::Other("Socket not accepted".into()));
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        trace!(len = text.len(), "Memory socket send");
        self.outgoing
            .send(text.to_owned())
            .map_err(|_| TransportError::SendFailed("Peer dropped".into()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }
}

impl MemoryClient {
    /// Send a text frame to the server half.
    ///
    /// Returns `false` if the server half is gone or this client was closed.
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.tx
            .as_ref()
            .is_some_and(|tx| tx.send(text.into()).is_ok())
    }

    /// Receive the next frame sent by the server half.
    ///
    /// Returns `None` once the server half has been dropped.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Receive a frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// Stop sending. The server half observes a disconnect once it has
    /// drained the frames already sent.
    pub fn close(&mut self) {
        self.tx = None;
    }
}
