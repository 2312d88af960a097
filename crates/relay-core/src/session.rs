//! Per-connection session loop.
//!
//! accept → `connect` → read/decode/dispatch until the transport goes away
//! → remove from the registry → `disconnect`.

use crate::hub::{Hub, HubError};
use relay_protocol::{codec, Envelope, ProtocolError};
use relay_transport::SocketRef;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Session behaviour switches.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Route `publish` envelopes to the channel's subscribers instead of
    /// answering with an error.
    pub publish_enabled: bool,
}

/// What happened during one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Whether the socket was accepted and registered.
    pub accepted: bool,
    /// Text frames received from the client.
    pub frames_received: u64,
    /// Frames sent to the client in reply, including error envelopes.
    pub replies_sent: u64,
    /// Protocol error envelopes sent to the client, by cause.
    pub protocol_errors: ProtocolErrorCounts,
    /// Recipients reached by publishes from this client.
    pub published_to: u64,
    /// `connect` / `disconnect` handler failures.
    pub handler_errors: u64,
}

/// Error envelopes sent to one client, split by cause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtocolErrorCounts {
    /// Frames that were not JSON.
    pub invalid_json: u64,
    /// JSON frames that were not a valid envelope.
    pub invalid_payload: u64,
    /// Unsubscribes from channels the client was not subscribed to.
    pub not_subscribed: u64,
    /// Publishes while publishing is disabled.
    pub publish_unavailable: u64,
}

impl ProtocolErrorCounts {
    /// Sum over all causes.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.invalid_json + self.invalid_payload + self.not_subscribed + self.publish_unavailable
    }

    /// Counts labelled with their metric `kind`.
    #[must_use]
    pub fn by_kind(&self) -> [(&'static str, u64); 4] {
        [
            ("invalid_json", self.invalid_json),
            ("invalid_payload", self.invalid_payload),
            ("not_subscribed", self.not_subscribed),
            ("publish_unavailable", self.publish_unavailable),
        ]
    }

    fn record_decode(&mut self, err: &ProtocolError) {
        match err {
            ProtocolError::InvalidJson(_) => self.invalid_json += 1,
            ProtocolError::InvalidPayload(_) | ProtocolError::Encode(_) => {
                self.invalid_payload += 1;
            }
        }
    }
}

/// Run one client session to completion.
///
/// Returns once the transport reports a disconnect, after the connection
/// has been removed from the hub.
pub async fn run_session(hub: &Hub, socket: SocketRef, config: &SessionConfig) -> SessionSummary {
    let mut summary = SessionSummary::default();

    match hub.connect(Arc::clone(&socket)).await {
        Ok(_) => summary.accepted = true,
        Err(HubError::Accept(e)) => {
            debug!(error = %e, "Socket handshake failed");
            return summary;
        }
        Err(e) => {
            summary.accepted = !matches!(e, HubError::AlreadyConnected);
            if matches!(e, HubError::Event(_)) {
                summary.handler_errors += 1;
            }
            error!(error = %e, "Connect failed, closing session");
            if summary.accepted {
                finish(hub, &socket, &mut summary).await;
            }
            return summary;
        }
    }

    loop {
        let text = match socket.receive_text().await {
            Ok(text) => text,
            Err(e) => {
                debug!(error = %e, "Receive ended");
                break;
            }
        };
        summary.frames_received += 1;
        trace!(len = text.len(), "Frame received");

        let reply = match handle_frame(hub, &socket, &text, config, &mut summary).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %e, "Session state is inconsistent, closing");
                break;
            }
        };

        if let Some(envelope) = reply {
            let text = match codec::encode(&envelope) {
                Ok(text) => text,
                Err(e) => {
                    error!(error = %e, "Failed to encode reply");
                    continue;
                }
            };
            if let Err(e) = socket.send_text(&text).await {
                debug!(error = %e, "Reply send failed");
                break;
            }
            summary.replies_sent += 1;
        }
    }

    finish(hub, &socket, &mut summary).await;
    summary
}

/// Handle one frame, returning the reply to send, if any.
async fn handle_frame(
    hub: &Hub,
    socket: &SocketRef,
    text: &str,
    config: &SessionConfig,
    summary: &mut SessionSummary,
) -> Result<Option<Envelope>, HubError> {
    let envelope = match codec::decode(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(kind = e.kind(), error = %e, "Rejected frame");
            summary.protocol_errors.record_decode(&e);
            return Ok(Some(e.to_envelope()));
        }
    };

    match envelope {
        Envelope::Subscribe { channel } => {
            hub.subscribe(&channel, socket)?;
            Ok(None)
        }

        Envelope::Unsubscribe { channel } => match hub.unsubscribe(&channel, socket) {
            Ok(()) => Ok(None),
            Err(HubError::NotSubscribed(channel)) => {
                summary.protocol_errors.not_subscribed += 1;
                Ok(Some(Envelope::not_subscribed(&channel)))
            }
            Err(e) => Err(e),
        },

        Envelope::Publish { channel, payload } if config.publish_enabled => {
            let envelope = Envelope::Publish { channel, payload };
            let outcome = hub.broadcast_envelope(&envelope).await?;
            summary.published_to += outcome.delivered as u64;
            Ok(None)
        }

        Envelope::Publish { channel, .. } => {
            debug!(channel = %channel, "Publish rejected, publishing is disabled");
            summary.protocol_errors.publish_unavailable += 1;
            Ok(Some(Envelope::publish_unavailable()))
        }

        Envelope::Error { message } => {
            debug!(message = %message, "Ignoring error envelope from client");
            Ok(None)
        }
    }
}

/// Remove the connection and close its socket.
async fn finish(hub: &Hub, socket: &SocketRef, summary: &mut SessionSummary) {
    match hub.disconnect(socket).await {
        Ok(_) => {}
        Err(e @ HubError::Event(_)) => {
            summary.handler_errors += 1;
            error!(error = %e, "Disconnect handler failed");
        }
        Err(e) => error!(error = %e, "Disconnect failed"),
    }

    if let Err(e) = socket.close().await {
        trace!(error = %e, "Close after disconnect failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::events;
    use relay_transport::{MemoryClient, MemorySocket};
    use std::sync::Mutex;
    use tokio::task::JoinHandle;

    fn spawn_session(
        hub: &Arc<Hub>,
        config: SessionConfig,
    ) -> (SocketRef, MemoryClient, JoinHandle<SessionSummary>) {
        let (socket, client) = MemorySocket::pair();
        let socket: SocketRef = Arc::new(socket);
        let hub = Arc::clone(hub);
        let session_socket = Arc::clone(&socket);
        let handle =
            tokio::spawn(async move { run_session(&hub, session_socket, &config).await });
        (socket, client, handle)
    }

    async fn wait_for_connections(hub: &Hub, count: usize) {
        while hub.connection_count() != count {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_subscribe_then_publish_yields_one_error() {
        let hub = Arc::new(Hub::new());
        let (_socket, mut client, handle) = spawn_session(&hub, SessionConfig::default());

        client.send(r#"{"type":"subscribe","channel":"news"}"#);
        client.send(r#"{"type":"publish","channel":"news","payload":"x"}"#);

        assert_eq!(
            client.recv().await.as_deref(),
            Some(r#"{"type":"error","message":"Publish not yet implemented"}"#)
        );

        client.close();
        let summary = handle.await.unwrap();
        assert_eq!(client.try_recv(), None);
        assert_eq!(summary.frames_received, 2);
        assert_eq!(summary.replies_sent, 1);
    }

    #[tokio::test]
    async fn test_invalid_frames_get_error_replies() {
        let hub = Arc::new(Hub::new());
        let (_socket, mut client, handle) = spawn_session(&hub, SessionConfig::default());

        client.send("definitely not json");
        assert_eq!(
            client.recv().await.as_deref(),
            Some(r#"{"type":"error","message":"Invalid JSON"}"#)
        );

        client.send(r#"{"type":"bogus"}"#);
        assert_eq!(
            client.recv().await.as_deref(),
            Some(r#"{"type":"error","message":"Invalid payload"}"#)
        );

        client.send(r#"{"type":"subscribe"}"#);
        assert_eq!(
            client.recv().await.as_deref(),
            Some(r#"{"type":"error","message":"Invalid payload"}"#)
        );

        assert_eq!(hub.connection_count(), 1);

        client.close();
        let summary = handle.await.unwrap();
        assert_eq!(
            summary.protocol_errors,
            ProtocolErrorCounts {
                invalid_json: 1,
                invalid_payload: 2,
                ..ProtocolErrorCounts::default()
            }
        );
        assert_eq!(summary.protocol_errors.total(), 3);
    }

    #[tokio::test]
    async fn test_array_frame_is_rejected_not_subscribed() {
        let hub = Arc::new(Hub::new());
        let (socket, mut client, handle) = spawn_session(&hub, SessionConfig::default());

        client.send(r#"["subscribe","news"]"#);
        assert_eq!(
            client.recv().await.as_deref(),
            Some(r#"{"type":"error","message":"Invalid payload"}"#)
        );

        let connection = hub.connection(&socket).unwrap();
        assert!(!connection.is_subscribed("news"));
        assert!(connection.subscriptions().is_empty());

        client.close();
        let summary = handle.await.unwrap();
        assert_eq!(summary.protocol_errors.invalid_payload, 1);
    }

    #[tokio::test]
    async fn test_error_counts_by_kind() {
        let hub = Arc::new(Hub::new());
        let (_socket, mut client, handle) = spawn_session(&hub, SessionConfig::default());

        client.send(r#"{"type":"unsubscribe","channel":"news"}"#);
        client.recv().await.unwrap();
        client.send(r#"{"type":"publish","channel":"news","payload":1}"#);
        client.recv().await.unwrap();
        client.send(r#"{"type":"publish","channel":"news","payload":2}"#);
        client.recv().await.unwrap();

        client.close();
        let summary = handle.await.unwrap();
        assert_eq!(
            summary.protocol_errors.by_kind(),
            [
                ("invalid_json", 0),
                ("invalid_payload", 0),
                ("not_subscribed", 1),
                ("publish_unavailable", 2),
            ]
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_without_subscription() {
        let hub = Arc::new(Hub::new());
        let (socket, mut client, handle) = spawn_session(&hub, SessionConfig::default());

        client.send(r#"{"type":"subscribe","channel":"news"}"#);
        client.send(r#"{"type":"unsubscribe","channel":"sports"}"#);
        assert_eq!(
            client.recv().await.as_deref(),
            Some(r#"{"type":"error","message":"Not subscribed to sports"}"#)
        );

        let connection = hub.connection(&socket).unwrap();
        assert!(connection.is_subscribed("news"));
        assert_eq!(connection.subscriptions().len(), 1);

        client.close();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_reaches_session_subscribers() {
        let hub = Arc::new(Hub::new());
        let (_a, mut ca, ha) = spawn_session(&hub, SessionConfig::default());
        let (_b, mut cb, hb) = spawn_session(&hub, SessionConfig::default());

        ca.send(r#"{"type":"subscribe","channel":"news"}"#);
        // A reply proves the subscribe ahead of it has been processed.
        ca.send(r#"{"type":"publish","channel":"news","payload":null}"#);
        ca.recv().await.unwrap();
        wait_for_connections(&hub, 2).await;

        let outcome = hub.broadcast("news", "breaking").await;
        assert_eq!(outcome.delivered, 1);
        assert_eq!(ca.recv().await.as_deref(), Some("breaking"));
        assert_eq!(cb.try_recv(), None);

        ca.close();
        cb.close();
        ha.await.unwrap();
        hb.await.unwrap();
    }

    #[tokio::test]
    async fn test_inbound_error_envelope_is_ignored() {
        let hub = Arc::new(Hub::new());
        let (_socket, mut client, handle) = spawn_session(&hub, SessionConfig::default());

        client.send(r#"{"type":"error","message":"client says hi"}"#);
        client.send("[");
        assert_eq!(
            client.recv().await.as_deref(),
            Some(r#"{"type":"error","message":"Invalid JSON"}"#)
        );

        client.close();
        let summary = handle.await.unwrap();
        assert_eq!(summary.replies_sent, 1);
    }

    #[tokio::test]
    async fn test_publish_enabled_broadcasts() {
        let hub = Arc::new(Hub::new());
        let config = SessionConfig {
            publish_enabled: true,
        };
        let (_a, mut ca, ha) = spawn_session(&hub, config.clone());
        let (_b, mut cb, hb) = spawn_session(&hub, config);

        cb.send(r#"{"type":"subscribe","channel":"news"}"#);
        // Unsubscribing from an unknown channel forces a reply, so the
        // subscribe ahead of it is known to be applied.
        cb.send(r#"{"type":"unsubscribe","channel":"none"}"#);
        cb.recv().await.unwrap();

        ca.send(r#"{"type":"publish","channel":"news","payload":{"n":1}}"#);
        let delivered = cb.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&delivered).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"type": "publish", "channel": "news", "payload": {"n": 1}})
        );

        ca.close();
        cb.close();
        let summary = ha.await.unwrap();
        hb.await.unwrap();
        assert_eq!(summary.published_to, 1);
        assert_eq!(ca.try_recv(), None);
    }

    #[tokio::test]
    async fn test_disconnect_cleans_up_and_fires_events() {
        let hub = Arc::new(Hub::new());
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        for event in [events::CONNECT, events::DISCONNECT] {
            let log = Arc::clone(&log);
            hub.on(event, move |_: Connection| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().unwrap().push(event);
                    Ok(())
                }
            });
        }

        let (socket, mut client, handle) = spawn_session(&hub, SessionConfig::default());
        client.send(r#"{"type":"subscribe","channel":"news"}"#);
        client.close();

        let summary = handle.await.unwrap();
        assert!(summary.accepted);
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(hub.lookup(&socket), None);
        assert_eq!(*log.lock().unwrap(), vec![events::CONNECT, events::DISCONNECT]);
    }

    #[tokio::test]
    async fn test_connect_handler_failure_tears_down() {
        let hub = Arc::new(Hub::new());
        hub.on(events::CONNECT, |_| async { Err("no thanks".into()) });

        let (_socket, _client, handle) = spawn_session(&hub, SessionConfig::default());

        let summary = handle.await.unwrap();
        assert!(summary.accepted);
        assert_eq!(summary.frames_received, 0);
        assert_eq!(summary.handler_errors, 1);
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_accept_ends_session() {
        let hub = Arc::new(Hub::new());
        let (socket, client) = MemorySocket::pair();
        drop(client);

        let summary = run_session(&hub, Arc::new(socket), &SessionConfig::default()).await;
        assert!(!summary.accepted);
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_reply_send_failure_disconnects() {
        let hub = Arc::new(Hub::new());
        let (_socket, client, handle) = spawn_session(&hub, SessionConfig::default());
        wait_for_connections(&hub, 1).await;

        // The frame stays queued after the client is gone, but its reply
        // has nowhere to go.
        client.send("oops");
        drop(client);

        let summary = handle.await.unwrap();
        assert_eq!(summary.frames_received, 1);
        assert_eq!(summary.replies_sent, 0);
        assert_eq!(hub.connection_count(), 0);
    }
}
