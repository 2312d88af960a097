//! Live client connections.
//!
//! A connection is identified by its socket handle, never by a generated id.

use relay_transport::{same_socket, SocketRef};
use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, SystemTime};

/// A channel identifier.
pub type ChannelId = String;

/// One live client session.
#[derive(Clone)]
pub struct Connection {
    socket: SocketRef,
    subscriptions: HashSet<ChannelId>,
    created_at: SystemTime,
}

impl Connection {
    /// Create a connection with no subscriptions, stamped with the current time.
    #[must_use]
    pub fn new(socket: SocketRef) -> Self {
        Self {
            socket,
            subscriptions: HashSet::new(),
            created_at: SystemTime::now(),
        }
    }

    /// The underlying socket.
    #[must_use]
    pub fn socket(&self) -> &SocketRef {
        &self.socket
    }

    /// Whether this connection wraps `socket`.
    #[must_use]
    pub fn is_socket(&self, socket: &SocketRef) -> bool {
        same_socket(&self.socket, socket)
    }

    /// Channels this connection is subscribed to.
    #[must_use]
    pub fn subscriptions(&self) -> &HashSet<ChannelId> {
        &self.subscriptions
    }

    /// Check if the connection is subscribed to `channel`.
    #[must_use]
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.subscriptions.contains(channel)
    }

    /// When the connection was accepted.
    #[must_use]
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Time since the connection was accepted.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed().unwrap_or_default()
    }

    /// Remote address of the socket, if known.
    #[must_use]
    pub fn remote_addr(&self) -> Option<String> {
        self.socket.remote_addr()
    }

    /// Returns `true` if the channel was newly added.
    pub(crate) fn subscribe(&mut self, channel: &str) -> bool {
        self.subscriptions.insert(channel.to_string())
    }

    /// Returns `true` if the channel was present.
    pub(crate) fn unsubscribe(&mut self, channel: &str) -> bool {
        self.subscriptions.remove(channel)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("remote_addr", &self.remote_addr())
            .field("subscriptions", &self.subscriptions)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}
