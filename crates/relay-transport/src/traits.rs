//! Transport abstraction traits for Relay.
//!
//! These traits define the interface that all transport implementations must provide,
//! allowing the pub/sub core to be transport-agnostic.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Transport errors.
///
/// Every variant is treated by the session loop as a disconnect.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The opening handshake failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// A bidirectional text-frame socket.
///
/// All methods take `&self` so one socket can be read by its session loop
/// while other tasks send to it. Implementations keep the read and write
/// halves behind separate locks.
#[async_trait]
pub trait Socket: Send + Sync {
    /// Complete the transport handshake.
    ///
    /// Must be called once before any other operation.
    async fn accept(&self) -> Result<(), TransportError>;

    /// Receive the next text frame.
    ///
    /// Returns [`TransportError::ConnectionClosed`] once the peer has gone away.
    async fn receive_text(&self) -> Result<String, TransportError>;

    /// Send a text frame.
    async fn send_text(&self, text: &str) -> Result<(), TransportError>;

    /// Close the socket gracefully.
    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Get the remote address of the socket, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}

/// Shared handle to a socket.
///
/// The handle's allocation is the socket's identity.
pub type SocketRef = Arc<dyn Socket>;

/// Check whether two handles refer to the same socket.
///
/// Compares allocation addresses only, so two distinct sockets with
/// identical state are never equal.
#[must_use]
pub fn same_socket(a: &SocketRef, b: &SocketRef) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}
