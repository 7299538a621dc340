//! Host wiring: lifecycle triggers, the socket event pump and the consumer API
//!
//! The hosting process may be torn down between invocations. Its lifecycle
//! triggers (`start`, `install`, `update`) all mean the same thing here:
//! whatever sockets and server-side subscriptions existed are gone, so the
//! persisted state describing them is reset and every active network is
//! connected afresh.

use crate::connection::{ConnectionEvent, ConnectionManager, SetupReport};
use crate::notification::{HandlerId, Notification, NotificationRegistry};
use crate::signature::{MonitorRequest, SignatureMonitor};
use crate::subscription::{SubscribeCallbacks, SubscribeRequest, SubscriptionManager};
use crate::transport::SocketEvent;
use chainsub_core::{Network, Result, SubscriptionId};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::sync::mpsc;

/// Process lifecycle trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleEvent {
    Start,
    Install,
    Update,
}

/// Everything a hosting process needs
#[derive(Clone)]
pub struct Host {
    connections: ConnectionManager,
    subscriptions: SubscriptionManager,
    signatures: SignatureMonitor,
}

impl Host {
    pub fn new(
        connections: ConnectionManager,
        subscriptions: SubscriptionManager,
        signatures: SignatureMonitor,
    ) -> Self {
        Self {
            connections,
            subscriptions,
            signatures,
        }
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn signatures(&self) -> &SignatureMonitor {
        &self.signatures
    }

    pub fn registry(&self) -> &NotificationRegistry {
        self.subscriptions.registry()
    }

    /// Reset persisted state and connect every active network
    #[tracing::instrument(skip(self))]
    pub async fn handle_lifecycle(&self, event: LifecycleEvent) -> Result<SetupReport> {
        let subscriptions = self.subscriptions.clear_all().await?;
        self.signatures.clear().await;
        let connections = self.connections.clear_records().await?;
        tracing::info!(subscriptions, connections, "Stale state cleared");

        Ok(self.connections.setup_all_connections().await)
    }

    /// Route one transport event
    pub async fn handle_socket_event(&self, event: SocketEvent) {
        match event {
            SocketEvent::Open { connection_id } => {
                self.connections
                    .handle_connection_event(&connection_id, ConnectionEvent::Connect)
                    .await;
            }
            SocketEvent::Close {
                connection_id,
                origin_url,
            } => {
                tracing::debug!(connection_id = %connection_id, url = %origin_url, "Socket closed");
                self.connections
                    .handle_connection_event(&connection_id, ConnectionEvent::Disconnect)
                    .await;
            }
            SocketEvent::Error {
                connection_id,
                message,
            } => {
                self.connections
                    .handle_connection_event(&connection_id, ConnectionEvent::Error(message))
                    .await;
            }
            SocketEvent::Message {
                connection_id,
                payload,
            } => {
                self.subscriptions.on_message(&connection_id, payload).await;
            }
        }
    }

    /// Drain transport events in order until the channel closes
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<SocketEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_socket_event(event).await;
        }
        tracing::info!("Socket event stream ended");
    }

    pub async fn subscribe(&self, request: SubscribeRequest) -> Result<SubscriptionId> {
        self.subscriptions.subscribe(request).await
    }

    pub async fn subscribe_with(
        &self,
        request: SubscribeRequest,
        callbacks: SubscribeCallbacks,
    ) -> Result<SubscriptionId> {
        self.subscriptions.subscribe_with(request, callbacks).await
    }

    pub async fn unsubscribe(&self, id: &SubscriptionId) -> Result<()> {
        self.subscriptions.unsubscribe(id).await
    }

    pub async fn register_notification_handler<F, Fut>(
        &self,
        method: impl Into<String>,
        network: Network,
        handler: F,
    ) -> HandlerId
    where
        F: Fn(Notification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.registry().register(method, network, handler).await
    }

    /// Run `callback` every time `network`'s connection becomes usable
    pub async fn on_connection_recovery<F, Fut>(&self, network: Network, callback: F)
    where
        F: Fn(Network) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.connections.on_network_recovery(network, callback).await;
    }

    pub async fn monitor_signature(&self, request: MonitorRequest) -> Result<SubscriptionId> {
        self.signatures.monitor(request).await
    }
}
