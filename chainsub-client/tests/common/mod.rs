//! Common test utilities for chainsub-client integration tests
//!
//! Provides a recording in-memory transport, a programmable status client,
//! a mock WebSocket server and helpers for building inbound frames.

#![allow(dead_code)]

use async_trait::async_trait;
use chainsub_client::{Host, HostBuilder, SignatureStatus, SignatureStatusClient, SocketEvent, Transport};
use chainsub_core::{
    ConnectionId, Error, ManagerConfig, Network, NetworkConfig, Payload, ReconnectConfig, Result,
};
use chainsub_store::SledRecordStore;
use futures_util::{SinkExt, StreamExt};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Default)]
struct MockState {
    next_id: u64,
    open: HashSet<ConnectionId>,
    open_attempts: Vec<(String, Instant)>,
    closed: Vec<ConnectionId>,
    sent: Vec<(ConnectionId, String)>,
    fail_next: u32,
    fail_always: bool,
    refused_urls: HashSet<String>,
}

/// In-memory transport that records everything asked of it
///
/// Successful opens emit `SocketEvent::Open` on the event channel, like a
/// real socket would.
pub struct MockTransport {
    state: Mutex<MockState>,
    events: mpsc::UnboundedSender<SocketEvent>,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SocketEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            state: Mutex::new(MockState::default()),
            events,
        });
        (transport, rx)
    }

    /// Refuse the next `n` opens
    pub fn fail_next_opens(&self, n: u32) {
        self.state.lock().unwrap().fail_next = n;
    }

    /// Refuse every open from now on
    pub fn fail_all_opens(&self, fail: bool) {
        self.state.lock().unwrap().fail_always = fail;
    }

    /// Refuse every open against `url`
    pub fn refuse_url(&self, url: &str) {
        self.state.lock().unwrap().refused_urls.insert(url.to_string());
    }

    pub fn open_attempts(&self) -> Vec<Instant> {
        self.state.lock().unwrap().open_attempts.iter().map(|(_, at)| *at).collect()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().open.len()
    }

    pub fn closed(&self) -> Vec<ConnectionId> {
        self.state.lock().unwrap().closed.clone()
    }

    /// Frames sent so far, parsed as JSON
    pub fn sent_frames(&self) -> Vec<serde_json::Value> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(|(_, text)| serde_json::from_str(text).unwrap())
            .collect()
    }

    /// Frames sent on one connection, parsed as JSON
    pub fn sent_on(&self, connection_id: &ConnectionId) -> Vec<serde_json::Value> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|(id, _)| id == connection_id)
            .map(|(_, text)| serde_json::from_str(text).unwrap())
            .collect()
    }

    pub fn clear_sent(&self) {
        self.state.lock().unwrap().sent.clear();
    }

    /// Simulate the server dropping a socket
    pub fn drop_socket(&self, connection_id: &ConnectionId) {
        self.state.lock().unwrap().open.remove(connection_id);
        let _ = self.events.send(SocketEvent::Close {
            connection_id: connection_id.clone(),
            origin_url: "ws://mock".to_string(),
        });
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open_socket(&self, url: &str) -> Result<ConnectionId> {
        let connection_id = {
            let mut state = self.state.lock().unwrap();
            state.open_attempts.push((url.to_string(), Instant::now()));
            if state.fail_always || state.refused_urls.contains(url) {
                return Err(Error::WebSocket("connection refused".to_string()));
            }
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(Error::WebSocket("connection refused".to_string()));
            }
            state.next_id += 1;
            let connection_id = ConnectionId::from(format!("conn-{}", state.next_id));
            state.open.insert(connection_id.clone());
            connection_id
        };

        let _ = self.events.send(SocketEvent::Open {
            connection_id: connection_id.clone(),
        });
        Ok(connection_id)
    }

    async fn close_socket(&self, connection_id: &ConnectionId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.open.remove(connection_id) {
            state.closed.push(connection_id.clone());
        }
        Ok(())
    }

    async fn send_message(&self, connection_id: &ConnectionId, text: String) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.open.contains(connection_id) {
            return Err(Error::UnknownConnection(connection_id.clone()));
        }
        state.sent.push((connection_id.clone(), text));
        Ok(())
    }
}

/// Status client answering from a fixed table
#[derive(Default)]
pub struct StubStatusClient {
    statuses: Mutex<HashMap<String, SignatureStatus>>,
    calls: AtomicUsize,
}

impl StubStatusClient {
    pub fn set(&self, signature: &str, status: SignatureStatus) {
        self.statuses.lock().unwrap().insert(signature.to_string(), status);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignatureStatusClient for StubStatusClient {
    async fn signature_status(&self, _network: &Network, signature: &str) -> Result<Option<SignatureStatus>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.statuses.lock().unwrap().get(signature).cloned())
    }
}

/// Configuration with one active mock network per name
pub fn config(networks: &[&str], attempts: u32, delay: Duration) -> ManagerConfig {
    networks
        .iter()
        .fold(ManagerConfig::new("chainsub-test"), |config, name| {
            config.with_network(NetworkConfig::new(*name, format!("ws://mock/{}", name)))
        })
        .with_reconnect(ReconnectConfig::new(attempts, delay))
}

/// A host over a temporary store and the given transport; events are not pumped
pub async fn host(
    config: ManagerConfig,
    transport: Arc<MockTransport>,
    status_client: Option<Arc<StubStatusClient>>,
) -> Host {
    let mut builder = HostBuilder::new(config)
        .with_store(Arc::new(SledRecordStore::temporary().unwrap()))
        .with_transport(transport);
    if let Some(client) = status_client {
        builder = builder.with_status_client(client);
    }
    builder.build().await.unwrap()
}

/// Feed every queued transport event to the host
pub async fn drain(host: &Host, events: &mut mpsc::UnboundedReceiver<SocketEvent>) {
    while let Ok(event) = events.try_recv() {
        host.handle_socket_event(event).await;
    }
}

/// Wait until the network has a registered connection
pub async fn wait_for_connection(host: &Host, network: &Network) -> ConnectionId {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(id) = host.connections().connection_id(network).await.unwrap() {
            return id;
        }
        assert!(Instant::now() < deadline, "no connection for {}", network);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Deliver one inbound text frame
pub async fn inbound(host: &Host, connection_id: &ConnectionId, frame: serde_json::Value) {
    host.handle_socket_event(SocketEvent::Message {
        connection_id: connection_id.clone(),
        payload: Payload::Text(frame.to_string()),
    })
    .await;
}

pub fn confirmation(request_id: u64, rpc_subscription_id: u64) -> serde_json::Value {
    serde_json::json!({"jsonrpc": "2.0", "id": request_id, "result": rpc_subscription_id})
}

pub fn notification(method: &str, subscription: u64, result: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": {"subscription": subscription, "result": result}
    })
}

pub fn error_response(id: Option<u64>, code: i32, message: &str) -> serde_json::Value {
    let mut frame = serde_json::json!({
        "jsonrpc": "2.0",
        "error": {"code": code, "message": message}
    });
    if let Some(id) = id {
        frame["id"] = serde_json::json!(id);
    }
    frame
}

/// Mock JSON-RPC node over a real WebSocket
///
/// Answers every `*Subscribe` call with a confirmation carrying
/// `rpc_subscription_id`, followed by one notification whose result is
/// `{"n": 1}`. Every received text frame is forwarded to the test.
pub struct MockNode {
    addr: SocketAddr,
    received: mpsc::UnboundedReceiver<String>,
}

impl MockNode {
    pub async fn start(rpc_subscription_id: u64, notification_method: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, received) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let Ok(ws) = accept_async(stream).await else { return };
                    let (mut write, mut read) = ws.split();
                    while let Some(Ok(message)) = read.next().await {
                        let Message::Text(text) = message else { continue };
                        let _ = tx.send(text.clone());

                        let request: serde_json::Value = serde_json::from_str(&text).unwrap();
                        let is_subscribe = request["method"]
                            .as_str()
                            .is_some_and(|m| m.ends_with("Subscribe"));
                        if !is_subscribe {
                            continue;
                        }
                        let reply = confirmation(request["id"].as_u64().unwrap(), rpc_subscription_id);
                        let push = notification(notification_method, rpc_subscription_id, serde_json::json!({"n": 1}));
                        let _ = write.send(Message::Text(reply.to_string())).await;
                        let _ = write.send(Message::Text(push.to_string())).await;
                    }
                });
            }
        });

        Self { addr, received }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Next frame the node received, if one arrives within five seconds
    pub async fn next_received(&mut self) -> Option<serde_json::Value> {
        tokio::time::timeout(Duration::from_secs(5), self.received.recv())
            .await
            .ok()
            .flatten()
            .map(|text| serde_json::from_str(&text).unwrap())
    }
}
