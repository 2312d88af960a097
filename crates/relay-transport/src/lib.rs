//! # relay-transport
//!
//! Socket abstraction for the Relay pub/sub server.
//!
//! The pub/sub core never touches WebSocket types directly. It drives
//! connections through the [`Socket`] trait, which every transport adapter
//! implements:
//!
//! - **axum** - sockets handed over by an axum `WebSocketUpgrade`
//! - **WebSocket** - a standalone tokio-tungstenite listener
//! - **memory** - an in-process socket pair for tests and embedding
//!
//! ```rust,ignore
//! use relay_transport::Socket;
//!
//! async fn echo(socket: &dyn Socket) {
//!     socket.accept().await?;
//!     while let Ok(text) = socket.receive_text().await {
//!         socket.send_text(&text).await?;
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "axum")]
pub mod axum;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{MemoryClient, MemorySocket};
pub use traits::{same_socket, Socket, SocketRef, TransportError};

#[cfg(feature = "axum")]
pub use self::axum::AxumSocket;

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketSocket, WebSocketTransport};
