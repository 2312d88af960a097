//! axum WebSocket adapter.
//!
//! axum performs the HTTP upgrade before handing the socket over, so
//! [`Socket::accept`] has nothing left to do here.

use ::axum::extract::ws::{Message, WebSocket};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::traits::{Socket, TransportError};

/// A socket backed by an upgraded axum WebSocket.
pub struct AxumSocket {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    stream: Mutex<SplitStream<WebSocket>>,
    remote_addr: Option<SocketAddr>,
}

impl AxumSocket {
    /// Wrap an upgraded WebSocket.
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            remote_addr: None,
        }
    }

    /// Record the peer address, when the server knows it.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }
}

#[async_trait]
impl Socket for AxumSocket {
    async fn accept(&self) -> Result<(), TransportError> {
        trace!("axum socket already upgraded");
        Ok(())
    }

    async fn receive_text(&self) -> Result<String, TransportError> {
        let mut stream = self.stream.lock().await;

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Binary(data))) => {
                    return String::from_utf8(data)
                        .map_err(|e| TransportError::ReceiveFailed(e.to_string()));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    // axum answers pings itself
                }
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame");
                    return Err(TransportError::ConnectionClosed);
                }
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                None => return Err(TransportError::ConnectionClosed),
            }
        }
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text.to_owned()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        sink.close()
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {e}")))
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }
}

#[cfg(all(test, feature = "websocket"))]
mod tests {
    use super::*;
    use ::axum::{extract::ws::WebSocketUpgrade, response::Response, routing::get, Router};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::{
        connect_async, tungstenite::Message as ClientMessage, MaybeTlsStream, WebSocketStream,
    };

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    /// Answer every frame with what the adapter made of it.
    async fn describe_frames(socket: WebSocket) {
        let socket = AxumSocket::new(socket);
        loop {
            let reply = match socket.receive_text().await {
                Ok(text) => format!("text:{text}"),
                Err(TransportError::ReceiveFailed(_)) => "receive_failed".to_owned(),
                Err(_) => break,
            };
            if socket.send_text(&reply).await.is_err() {
                break;
            }
        }
    }

    async fn upgrade(ws: WebSocketUpgrade) -> Response {
        ws.on_upgrade(describe_frames)
    }

    async fn start() -> Client {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/", get(upgrade));
        tokio::spawn(async move { ::axum::serve(listener, app).await });

        let (client, _) = connect_async(format!("ws://{addr}/")).await.unwrap();
        client
    }

    async fn next_text(client: &mut Client) -> String {
        loop {
            match client.next().await {
                Some(Ok(ClientMessage::Text(text))) => return text,
                Some(Ok(_)) => continue,
                other => panic!("Expected text frame, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_text_frames() {
        let mut client = start().await;

        client.send(ClientMessage::Text("hello".into())).await.unwrap();
        assert_eq!(next_text(&mut client).await, "text:hello");
    }

    #[tokio::test]
    async fn test_binary_frames_decode_as_utf8() {
        let mut client = start().await;

        client
            .send(ClientMessage::Binary(br#"{"type":"subscribe"}"#.to_vec()))
            .await
            .unwrap();
        assert_eq!(next_text(&mut client).await, r#"text:{"type":"subscribe"}"#);

        client
            .send(ClientMessage::Binary(vec![0xff, 0xfe, 0x00]))
            .await
            .unwrap();
        assert_eq!(next_text(&mut client).await, "receive_failed");
    }

    #[tokio::test]
    async fn test_close_frame_ends_receive() {
        let mut client = start().await;

        client.send(ClientMessage::Text("a".into())).await.unwrap();
        assert_eq!(next_text(&mut client).await, "text:a");

        client.close(None).await.unwrap();
        // The server loop stops replying once it sees the close.
        while let Some(Ok(message)) = client.next().await {
            assert!(!matches!(message, ClientMessage::Text(_)));
        }
    }
}
