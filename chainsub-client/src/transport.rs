//! Socket transport boundary
//!
//! The manager never touches sockets directly. It asks a [`Transport`] to
//! open, close and write, and reacts to [`SocketEvent`]s the transport
//! delivers on a channel.
//!
//! [`WsTransport`] is the tokio-tungstenite implementation: each socket is
//! split, the write half kept behind a mutex and the read half drained by a
//! dedicated task that turns frames into events.

use async_trait::async_trait;
use chainsub_core::{ConnectionId, Error, Payload, Result};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Inbound socket lifecycle and data events
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    /// Socket is open and writable
    Open { connection_id: ConnectionId },
    /// Socket closed
    Close {
        connection_id: ConnectionId,
        origin_url: String,
    },
    /// Socket failed
    Error {
        connection_id: ConnectionId,
        message: String,
    },
    /// Inbound frame
    Message {
        connection_id: ConnectionId,
        payload: Payload,
    },
}

/// Opens, closes and writes sockets
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a socket to `url`
    async fn open_socket(&self, url: &str) -> Result<ConnectionId>;

    /// Close a socket; closing an unknown or already closed socket is a no-op
    async fn close_socket(&self, connection_id: &ConnectionId) -> Result<()>;

    /// Write one text frame
    async fn send_message(&self, connection_id: &ConnectionId, text: String) -> Result<()>;
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

struct Socket {
    sink: Arc<Mutex<WsSink>>,
    reader: JoinHandle<()>,
}

/// WebSocket transport over tokio-tungstenite
pub struct WsTransport {
    sockets: Arc<Mutex<HashMap<ConnectionId, Socket>>>,
    events: mpsc::UnboundedSender<SocketEvent>,
    next_id: AtomicU64,
}

impl WsTransport {
    /// Create a transport and the receiver its events are delivered on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SocketEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            sockets: Arc::new(Mutex::new(HashMap::new())),
            events,
            next_id: AtomicU64::new(1),
        };
        (transport, rx)
    }

    /// Number of sockets currently open
    pub async fn open_count(&self) -> usize {
        self.sockets.lock().await.len()
    }

    async fn read_loop(
        connection_id: ConnectionId,
        url: String,
        mut stream: futures::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
        sockets: Arc<Mutex<HashMap<ConnectionId, Socket>>>,
        events: mpsc::UnboundedSender<SocketEvent>,
    ) {
        while let Some(message) = stream.next().await {
            let payload = match message {
                Ok(Message::Text(text)) => Payload::Text(text),
                Ok(Message::Binary(bytes)) => Payload::Binary(bytes),
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(connection_id = %connection_id, error = %e, "WebSocket read failed");
                    sockets.lock().await.remove(&connection_id);
                    let _ = events.send(SocketEvent::Error {
                        connection_id,
                        message: e.to_string(),
                    });
                    return;
                }
            };
            let _ = events.send(SocketEvent::Message {
                connection_id: connection_id.clone(),
                payload,
            });
        }

        // Only report closes the caller did not ask for
        if sockets.lock().await.remove(&connection_id).is_some() {
            tracing::info!(connection_id = %connection_id, url = %url, "Connection closed by server");
            let _ = events.send(SocketEvent::Close {
                connection_id,
                origin_url: url,
            });
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    #[tracing::instrument(skip(self))]
    async fn open_socket(&self, url: &str) -> Result<ConnectionId> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;

        let connection_id =
            ConnectionId::from(format!("ws-{}", self.next_id.fetch_add(1, Ordering::SeqCst)));
        let (sink, stream) = ws_stream.split();

        let mut sockets = self.sockets.lock().await;
        let reader = tokio::spawn(Self::read_loop(
            connection_id.clone(),
            url.to_string(),
            stream,
            Arc::clone(&self.sockets),
            self.events.clone(),
        ));
        sockets.insert(
            connection_id.clone(),
            Socket {
                sink: Arc::new(Mutex::new(sink)),
                reader,
            },
        );
        drop(sockets);

        tracing::debug!(connection_id = %connection_id, "Socket open");
        let _ = self.events.send(SocketEvent::Open {
            connection_id: connection_id.clone(),
        });
        Ok(connection_id)
    }

    async fn close_socket(&self, connection_id: &ConnectionId) -> Result<()> {
        let Some(socket) = self.sockets.lock().await.remove(connection_id) else {
            return Ok(());
        };

        socket.reader.abort();
        let mut sink = socket.sink.lock().await;
        if let Err(e) = sink.send(Message::Close(None)).await {
            tracing::debug!(connection_id = %connection_id, error = %e, "Close frame not delivered");
        }
        let _ = sink.close().await;
        Ok(())
    }

    async fn send_message(&self, connection_id: &ConnectionId, text: String) -> Result<()> {
        let sink = self
            .sockets
            .lock()
            .await
            .get(connection_id)
            .map(|socket| Arc::clone(&socket.sink))
            .ok_or_else(|| Error::UnknownConnection(connection_id.clone()))?;

        let result = sink.lock().await.send(Message::Text(text)).await;
        result.map_err(|e| Error::WebSocket(e.to_string()))
    }
}
