//! The pub/sub hub.
//!
//! The hub owns the connection registry and the event hooks, tracks each
//! connection's subscriptions and fans text frames out to subscribers.

use crate::connection::{ChannelId, Connection};
use crate::events::{self, BoxError, EventDispatcher, EventError, Handler};
use crate::registry::Registry;
use relay_protocol::{codec, Envelope, ProtocolError};
use relay_transport::{SocketRef, TransportError};
use std::collections::HashSet;
use std::future::Future;
use thiserror::Error;
use tracing::{debug, error, trace, warn};

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The socket is not in the registry.
    #[error("Socket is not registered")]
    UnknownSocket,

    /// The socket is already in the registry.
    #[error("Socket is already registered")]
    AlreadyConnected,

    /// Not subscribed to channel.
    #[error("Not subscribed to {0}")]
    NotSubscribed(ChannelId),

    /// The socket handshake failed.
    #[error("Accept failed: {0}")]
    Accept(#[source] TransportError),

    /// An event handler failed.
    #[error(transparent)]
    Event(#[from] EventError),

    /// An envelope could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl HubError {
    /// Whether this error means the caller broke the hub's usage contract.
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, HubError::UnknownSocket | HubError::AlreadyConnected)
    }
}

/// A recipient that could not be sent to during a broadcast.
#[derive(Debug)]
pub struct BroadcastFailure {
    /// Remote address of the recipient, if known.
    pub remote_addr: Option<String>,
    /// The send error.
    pub error: TransportError,
}

/// Outcome of a broadcast.
#[derive(Debug, Default)]
pub struct Broadcast {
    /// Number of subscribers the message was delivered to.
    pub delivered: usize,
    /// Subscribers whose send failed. They are neither retried nor removed.
    pub failed: Vec<BroadcastFailure>,
}

impl Broadcast {
    /// Whether every subscriber received the message.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Hub statistics.
#[derive(Debug, Clone)]
pub struct HubStats {
    /// Number of live connections.
    pub connection_count: usize,
    /// Sum of subscriptions over all connections.
    pub total_subscriptions: usize,
    /// Number of distinct channels with at least one subscriber.
    pub channel_count: usize,
}

/// The central pub/sub hub.
///
/// Shared between session loops behind an `Arc`. Registry operations are
/// atomic with respect to each other; broadcasts work on a snapshot.
#[derive(Debug, Default)]
pub struct Hub {
    registry: Registry,
    events: EventDispatcher<Connection>,
}

impl Hub {
    /// Create a hub with no connections and no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async handler for a hub event.
    ///
    /// See [`events::CONNECT`] and [`events::DISCONNECT`].
    pub fn on<F, Fut>(&self, event: &str, handler: F) -> Handler<Connection>
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.events.on(event, handler)
    }

    /// The hub's event dispatcher.
    #[must_use]
    pub fn events(&self) -> &EventDispatcher<Connection> {
        &self.events
    }

    /// Accept `socket` and add it to the registry, then fire `connect`.
    ///
    /// Handlers observe a registry that already contains the connection.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Accept`] if the handshake fails, in which case
    /// nothing is registered. Returns [`HubError::Event`] if a `connect`
    /// handler fails; the connection stays registered and the caller is
    /// expected to [`disconnect`](Self::disconnect) it.
    pub async fn connect(&self, socket: SocketRef) -> Result<Connection, HubError> {
        socket.accept().await.map_err(HubError::Accept)?;

        let connection = Connection::new(socket);
        if !self.registry.insert(connection.clone()) {
            error!("Connect called twice for the same socket");
            return Err(HubError::AlreadyConnected);
        }

        debug!(
            remote = ?connection.remote_addr(),
            connections = self.registry.len(),
            "Connected"
        );

        self.events.emit(events::CONNECT, connection.clone()).await?;
        Ok(connection)
    }

    /// Remove `socket` from the registry, then fire `disconnect`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::UnknownSocket`] if the socket was never connected
    /// or was already removed, and [`HubError::Event`] if a `disconnect`
    /// handler fails after the removal.
    pub async fn disconnect(&self, socket: &SocketRef) -> Result<Connection, HubError> {
        let Some(connection) = self.registry.remove(socket) else {
            error!("Disconnect called for a socket that is not registered");
            return Err(HubError::UnknownSocket);
        };

        debug!(
            remote = ?connection.remote_addr(),
            subscriptions = connection.subscriptions().len(),
            connections = self.registry.len(),
            "Disconnected"
        );

        self.events
            .emit(events::DISCONNECT, connection.clone())
            .await?;
        Ok(connection)
    }

    /// Subscribe the connection for `socket` to `channel`.
    ///
    /// Subscribing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::UnknownSocket`] if the socket is not registered.
    pub fn subscribe(&self, channel: &str, socket: &SocketRef) -> Result<(), HubError> {
        let added = self
            .registry
            .update(socket, |c| c.subscribe(channel))
            .ok_or(HubError::UnknownSocket)?;

        if added {
            debug!(channel = %channel, "Subscribed");
        } else {
            trace!(channel = %channel, "Already subscribed");
        }
        Ok(())
    }

    /// Unsubscribe the connection for `socket` from `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotSubscribed`] if the connection is not
    /// subscribed to `channel`, or [`HubError::UnknownSocket`] if the socket
    /// is not registered.
    pub fn unsubscribe(&self, channel: &str, socket: &SocketRef) -> Result<(), HubError> {
        let removed = self
            .registry
            .update(socket, |c| c.unsubscribe(channel))
            .ok_or(HubError::UnknownSocket)?;

        if !removed {
            return Err(HubError::NotSubscribed(channel.to_string()));
        }

        debug!(channel = %channel, "Unsubscribed");
        Ok(())
    }

    /// Send `message` as a text frame to every subscriber of `channel`.
    ///
    /// Subscribers are snapshotted before the first send, so connections
    /// coming or going mid-broadcast do not affect who is sent to. Sends
    /// happen one at a time in registry order; a failed send is recorded and
    /// the broadcast carries on.
    pub async fn broadcast(&self, channel: &str, message: &str) -> Broadcast {
        let recipients = self.registry.subscribers(channel);
        let mut outcome = Broadcast::default();

        for socket in recipients {
            match socket.send_text(message).await {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    warn!(channel = %channel, error = %e, "Broadcast send failed");
                    outcome.failed.push(BroadcastFailure {
                        remote_addr: socket.remote_addr(),
                        error: e,
                    });
                }
            }
        }

        trace!(
            channel = %channel,
            recipients = outcome.delivered,
            failed = outcome.failed.len(),
            "Broadcast"
        );
        outcome
    }

    /// Encode `envelope` and broadcast it to the subscribers of its channel.
    ///
    /// Envelopes without a channel reach nobody.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope cannot be encoded.
    pub async fn broadcast_envelope(&self, envelope: &Envelope) -> Result<Broadcast, HubError> {
        let Some(channel) = envelope.channel() else {
            return Ok(Broadcast::default());
        };
        let text = codec::encode(envelope)?;
        Ok(self.broadcast(channel, &text).await)
    }

    /// A copy of the connection for `socket`.
    #[must_use]
    pub fn connection(&self, socket: &SocketRef) -> Option<Connection> {
        self.registry.get(socket)
    }

    /// Position of `socket` in the registry, in connection order.
    #[must_use]
    pub fn lookup(&self, socket: &SocketRef) -> Option<usize> {
        self.registry.position(socket)
    }

    /// A copy of every live connection, in connection order.
    #[must_use]
    pub fn connections(&self) -> Vec<Connection> {
        self.registry.snapshot()
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        let connections = self.registry.snapshot();
        let channels: HashSet<&ChannelId> =
            connections.iter().flat_map(Connection::subscriptions).collect();

        HubStats {
            connection_count: connections.len(),
            total_subscriptions: connections.iter().map(|c| c.subscriptions().len()).sum(),
            channel_count: channels.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_transport::{MemoryClient, MemorySocket, Socket};
    use std::sync::{Arc, Mutex, Weak};

    fn socket() -> (SocketRef, MemoryClient) {
        let (socket, client) = MemorySocket::pair();
        (Arc::new(socket), client)
    }

    async fn connected(hub: &Hub) -> (SocketRef, MemoryClient) {
        let (socket, client) = socket();
        hub.connect(Arc::clone(&socket)).await.unwrap();
        (socket, client)
    }

    #[tokio::test]
    async fn test_hub_membership_tracks_open_sockets() {
        let hub = Hub::new();

        let (a, _ca) = connected(&hub).await;
        let (b, _cb) = connected(&hub).await;
        let (c, _cc) = connected(&hub).await;
        assert_eq!(hub.connection_count(), 3);

        hub.disconnect(&b).await.unwrap();
        assert_eq!(hub.lookup(&a), Some(0));
        assert_eq!(hub.lookup(&b), None);
        assert_eq!(hub.lookup(&c), Some(1));

        let (d, _cd) = connected(&hub).await;
        hub.disconnect(&a).await.unwrap();
        hub.disconnect(&c).await.unwrap();

        let remaining = hub.connections();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].is_socket(&d));
    }

    #[tokio::test]
    async fn test_connect_failed_accept_registers_nothing() {
        let hub = Hub::new();
        let (socket, client) = socket();
        drop(client);

        assert!(matches!(
            hub.connect(Arc::clone(&socket)).await,
            Err(HubError::Accept(_))
        ));
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_unknown_socket() {
        let hub = Hub::new();
        let (socket, _client) = socket();

        let err = hub.disconnect(&socket).await.unwrap_err();
        assert!(matches!(err, HubError::UnknownSocket));
        assert!(err.is_contract_violation());
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let hub = Hub::new();
        let (socket, _client) = connected(&hub).await;

        hub.subscribe("news", &socket).unwrap();
        hub.subscribe("news", &socket).unwrap();

        let connection = hub.connection(&socket).unwrap();
        assert_eq!(connection.subscriptions().len(), 1);
        assert!(connection.is_subscribed("news"));
    }

    #[tokio::test]
    async fn test_unsubscribe_not_subscribed() {
        let hub = Hub::new();
        let (socket, _client) = connected(&hub).await;
        hub.subscribe("news", &socket).unwrap();

        match hub.unsubscribe("sports", &socket) {
            Err(HubError::NotSubscribed(channel)) => assert_eq!(channel, "sports"),
            other => panic!("Expected NotSubscribed, got {other:?}"),
        }

        let connection = hub.connection(&socket).unwrap();
        assert_eq!(connection.subscriptions().len(), 1);
        assert!(connection.is_subscribed("news"));

        hub.unsubscribe("news", &socket).unwrap();
        assert!(hub.connection(&socket).unwrap().subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_unknown_socket() {
        let hub = Hub::new();
        let (socket, _client) = socket();

        assert!(matches!(
            hub.subscribe("news", &socket),
            Err(HubError::UnknownSocket)
        ));
        assert!(matches!(
            hub.unsubscribe("news", &socket),
            Err(HubError::UnknownSocket)
        ));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_only_subscribers() {
        let hub = Hub::new();
        let (a, mut ca) = connected(&hub).await;
        let (_b, mut cb) = connected(&hub).await;
        let (c, mut cc) = connected(&hub).await;

        hub.subscribe("news", &a).unwrap();
        hub.subscribe("news", &c).unwrap();
        hub.subscribe("sports", &c).unwrap();

        let outcome = hub.broadcast("news", "headline").await;
        assert_eq!(outcome.delivered, 2);
        assert!(outcome.is_complete());

        assert_eq!(ca.try_recv().as_deref(), Some("headline"));
        assert_eq!(cb.try_recv(), None);
        assert_eq!(cc.try_recv().as_deref(), Some("headline"));
        assert_eq!(cc.try_recv(), None);

        assert_eq!(hub.broadcast("weather", "rain").await.delivered, 0);
    }

    #[tokio::test]
    async fn test_broadcast_continues_past_failed_send() {
        let hub = Hub::new();
        let (a, ca) = connected(&hub).await;
        let (b, mut cb) = connected(&hub).await;
        hub.subscribe("news", &a).unwrap();
        hub.subscribe("news", &b).unwrap();

        drop(ca);

        let outcome = hub.broadcast("news", "headline").await;
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.failed.len(), 1);
        assert!(matches!(
            outcome.failed[0].error,
            TransportError::SendFailed(_)
        ));
        assert_eq!(cb.try_recv().as_deref(), Some("headline"));

        // Failed recipients stay registered until their own session ends.
        assert_eq!(hub.connection_count(), 2);
    }

    /// Disconnects another socket from the hub on its first send.
    struct DisconnectingSocket {
        inner: MemorySocket,
        hub: Weak<Hub>,
        victim: Mutex<Option<SocketRef>>,
    }

    #[async_trait]
    impl Socket for DisconnectingSocket {
        async fn accept(&self) -> Result<(), TransportError> {
            self.inner.accept().await
        }

        async fn receive_text(&self) -> Result<String, TransportError> {
            self.inner.receive_text().await
        }

        async fn send_text(&self, text: &str) -> Result<(), TransportError> {
            let victim = self.victim.lock().unwrap().take();
            if let (Some(victim), Some(hub)) = (victim, self.hub.upgrade()) {
                hub.disconnect(&victim).await.unwrap();
            }
            self.inner.send_text(text).await
        }
    }

    #[tokio::test]
    async fn test_disconnect_mid_broadcast_uses_snapshot() {
        let hub = Arc::new(Hub::new());
        let (inner, mut first_client) = MemorySocket::pair();
        let first = Arc::new(DisconnectingSocket {
            inner,
            hub: Arc::downgrade(&hub),
            victim: Mutex::new(None),
        });
        let first_ref: SocketRef = first.clone();
        hub.connect(Arc::clone(&first_ref)).await.unwrap();

        let (victim, mut victim_client) = connected(&hub).await;
        let (last, mut last_client) = connected(&hub).await;
        for socket in [&first_ref, &victim, &last] {
            hub.subscribe("news", socket).unwrap();
        }
        *first.victim.lock().unwrap() = Some(Arc::clone(&victim));

        let outcome = hub.broadcast("news", "headline").await;

        assert_eq!(outcome.delivered, 3);
        assert_eq!(hub.connection_count(), 2);
        assert_eq!(hub.lookup(&victim), None);
        assert_eq!(first_client.try_recv().as_deref(), Some("headline"));
        assert_eq!(victim_client.try_recv().as_deref(), Some("headline"));
        assert_eq!(last_client.try_recv().as_deref(), Some("headline"));
    }

    #[tokio::test]
    async fn test_events_fire_once_in_order_with_connection() {
        let hub = Arc::new(Hub::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&hub);
        let connect_log = Arc::clone(&log);
        hub.on(events::CONNECT, move |connection: Connection| {
            let log = Arc::clone(&connect_log);
            let hub = weak.upgrade();
            async move {
                let registered = hub
                    .map(|hub| hub.lookup(connection.socket()).is_some())
                    .unwrap_or(false);
                log.lock().unwrap().push(("connect", registered));
                Ok(())
            }
        });

        let weak = Arc::downgrade(&hub);
        let disconnect_log = Arc::clone(&log);
        hub.on(events::DISCONNECT, move |connection: Connection| {
            let log = Arc::clone(&disconnect_log);
            let hub = weak.upgrade();
            async move {
                let registered = hub
                    .map(|hub| hub.lookup(connection.socket()).is_some())
                    .unwrap_or(true);
                log.lock().unwrap().push(("disconnect", registered));
                Ok(())
            }
        });

        let (socket, _client) = connected(&hub).await;
        hub.subscribe("news", &socket).unwrap();
        let removed = hub.disconnect(&socket).await.unwrap();

        assert!(removed.is_socket(&socket));
        assert!(removed.is_subscribed("news"));
        assert_eq!(
            *log.lock().unwrap(),
            vec![("connect", true), ("disconnect", false)]
        );
    }

    #[tokio::test]
    async fn test_connect_handler_failure_leaves_connection_registered() {
        let hub = Hub::new();
        hub.on(events::CONNECT, |_| async { Err("rejected".into()) });

        let (socket, _client) = socket();
        let err = hub.connect(Arc::clone(&socket)).await.unwrap_err();
        assert!(matches!(err, HubError::Event(_)));
        assert_eq!(hub.lookup(&socket), Some(0));

        hub.disconnect(&socket).await.unwrap();
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_envelope() {
        let hub = Hub::new();
        let (socket, mut client) = connected(&hub).await;
        hub.subscribe("news", &socket).unwrap();

        let outcome = hub
            .broadcast_envelope(&Envelope::publish("news", "x"))
            .await
            .unwrap();
        assert_eq!(outcome.delivered, 1);
        assert_eq!(
            client.try_recv().as_deref(),
            Some(r#"{"type":"publish","channel":"news","payload":"x"}"#)
        );

        let outcome = hub
            .broadcast_envelope(&Envelope::error("nobody"))
            .await
            .unwrap();
        assert_eq!(outcome.delivered, 0);
    }

    #[tokio::test]
    async fn test_hub_stats() {
        let hub = Hub::new();
        let (a, _ca) = connected(&hub).await;
        let (b, _cb) = connected(&hub).await;

        hub.subscribe("channel-1", &a).unwrap();
        hub.subscribe("channel-2", &a).unwrap();
        hub.subscribe("channel-1", &b).unwrap();

        let stats = hub.stats();
        assert_eq!(stats.connection_count, 2);
        assert_eq!(stats.total_subscriptions, 3);
        assert_eq!(stats.channel_count, 2);
    }
}
