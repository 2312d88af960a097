//! Connection registry.
//!
//! An insertion-ordered list of live connections behind a mutex. The lock
//! is never held across an `.await`; callers that need to do I/O take a
//! snapshot first.

use crate::connection::Connection;
use relay_transport::SocketRef;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The set of live connections.
#[derive(Debug, Default)]
pub struct Registry {
    connections: Mutex<Vec<Connection>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a connection.
    ///
    /// Returns `false`, leaving the registry untouched, if its socket is
    /// already registered.
    pub fn insert(&self, connection: Connection) -> bool {
        let mut connections = self.lock();
        if connections.iter().any(|c| c.is_socket(connection.socket())) {
            return false;
        }
        connections.push(connection);
        true
    }

    /// Remove and return the connection for `socket`.
    pub fn remove(&self, socket: &SocketRef) -> Option<Connection> {
        let mut connections = self.lock();
        let index = connections.iter().position(|c| c.is_socket(socket))?;
        Some(connections.remove(index))
    }

    /// Position of the connection for `socket` in insertion order.
    #[must_use]
    pub fn position(&self, socket: &SocketRef) -> Option<usize> {
        self.lock().iter().position(|c| c.is_socket(socket))
    }

    /// Check if `socket` is registered.
    #[must_use]
    pub fn contains(&self, socket: &SocketRef) -> bool {
        self.position(socket).is_some()
    }

    /// A copy of the connection for `socket`.
    #[must_use]
    pub fn get(&self, socket: &SocketRef) -> Option<Connection> {
        self.lock().iter().find(|c| c.is_socket(socket)).cloned()
    }

    /// Apply `f` to the connection for `socket` under the lock.
    pub fn update<R>(&self, socket: &SocketRef, f: impl FnOnce(&mut Connection) -> R) -> Option<R> {
        self.lock().iter_mut().find(|c| c.is_socket(socket)).map(f)
    }

    /// Sockets of every connection subscribed to `channel`, in insertion order.
    #[must_use]
    pub fn subscribers(&self, channel: &str) -> Vec<SocketRef> {
        self.lock()
            .iter()
            .filter(|c| c.is_subscribed(channel))
            .map(|c| Arc::clone(c.socket()))
            .collect()
    }

    /// A copy of every connection, in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Connection> {
        self.lock().clone()
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if there are no live connections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
