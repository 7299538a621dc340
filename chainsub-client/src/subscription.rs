//! Subscription state machine and inbound frame routing
//!
//! ```text
//! (none) ──subscribe──► pending ──confirmation──► confirmed
//!                         │  ▲                        │
//!                 failure │  └──── recovery re-issue ─┤
//!                         ▼                           │ unsubscribe
//!                       (none) ◄──────────────────────┘
//! ```
//!
//! Every subscription is persisted as `pending` before its subscribe call
//! goes out, so a call lost to a dropped socket or a restarted process is
//! re-sent when the network's connection comes back. Server subscription
//! ids are only meaningful on the socket that issued them; notifications
//! are matched by `(connection, server id)`.

use crate::connection::ConnectionManager;
use crate::metrics::ManagerMetrics;
use crate::notification::{Notification, NotificationRegistry};
use chainsub_core::{
    codec, ConnectionId, Id, InboundFrame, JsonRpcErrorData, JsonRpcRequest, Network,
    Payload, Result, SubscriptionId,
};
use chainsub_store::{SubscriptionRecord, SubscriptionRepository};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;

/// Callback invoked when the server rejects a subscribe call
pub type FailureFn =
    Arc<dyn Fn(SubscriptionId, JsonRpcErrorData) -> BoxFuture<'static, ()> + Send + Sync>;

/// What to subscribe to
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeRequest {
    /// Subscribe method, e.g. `accountSubscribe`
    pub method: String,
    /// Matching unsubscribe method, e.g. `accountUnsubscribe`
    pub unsubscribe_method: String,
    pub params: Vec<serde_json::Value>,
    pub network: Network,
}

impl SubscribeRequest {
    pub fn new(
        method: impl Into<String>,
        unsubscribe_method: impl Into<String>,
        network: impl Into<Network>,
    ) -> Self {
        Self {
            method: method.into(),
            unsubscribe_method: unsubscribe_method.into(),
            params: Vec::new(),
            network: network.into(),
        }
    }

    pub fn with_params(mut self, params: Vec<serde_json::Value>) -> Self {
        self.params = params;
        self
    }
}

/// Optional per-subscription callbacks
#[derive(Clone, Default)]
pub struct SubscribeCallbacks {
    on_failure: Option<FailureFn>,
}

impl SubscribeCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once if the server rejects the subscribe call
    pub fn on_failure<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(SubscriptionId, JsonRpcErrorData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_failure = Some(Arc::new(move |id, error| Box::pin(callback(id, error))));
        self
    }
}

struct Inner {
    repository: SubscriptionRepository,
    connections: ConnectionManager,
    registry: NotificationRegistry,
    metrics: Option<Arc<ManagerMetrics>>,
    failure_callbacks: Mutex<HashMap<SubscriptionId, FailureFn>>,
    /// Connection each network's subscriptions were last replayed on. Held
    /// while a subscribe call is sent or deferred, and for a whole replay.
    replayed: Mutex<HashMap<Network, ConnectionId>>,
}

/// Creates, confirms, routes and re-issues subscriptions
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl SubscriptionManager {
    /// Create a manager and register its re-issue routine for connection recovery
    pub async fn new(
        repository: SubscriptionRepository,
        connections: ConnectionManager,
        registry: NotificationRegistry,
        metrics: Option<Arc<ManagerMetrics>>,
    ) -> Self {
        let inner = Arc::new(Inner {
            repository,
            connections,
            registry,
            metrics,
            failure_callbacks: Mutex::new(HashMap::new()),
            replayed: Mutex::new(HashMap::new()),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        inner
            .connections
            .on_connection_recovery(move |network| {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(inner) => SubscriptionManager { inner }.reissue_network(&network).await,
                        None => Ok(()),
                    }
                }
            })
            .await;

        Self { inner }
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.inner.connections
    }

    pub fn registry(&self) -> &NotificationRegistry {
        &self.inner.registry
    }

    /// Subscribe without callbacks
    pub async fn subscribe(&self, request: SubscribeRequest) -> Result<SubscriptionId> {
        self.subscribe_with(request, SubscribeCallbacks::default()).await
    }

    /// Persist a pending subscription and send its subscribe call
    ///
    /// Returns as soon as the record is saved. The call is only sent on a
    /// connection whose recovery replay has already run; otherwise it is
    /// left to that replay, and a background open is started if the network
    /// has no connection at all.
    #[tracing::instrument(skip(self, request, callbacks), fields(method = %request.method, network = %request.network))]
    pub async fn subscribe_with(
        &self,
        request: SubscribeRequest,
        callbacks: SubscribeCallbacks,
    ) -> Result<SubscriptionId> {
        let inner = &self.inner;
        inner.connections.ensure_known(&request.network).await?;

        let id = SubscriptionId::generate();
        let request_id = inner.repository.next_request_id().await?;

        let replayed = inner.replayed.lock().await;
        let connection_id = inner.connections.connection_id(&request.network).await?;
        let usable = connection_id
            .as_ref()
            .filter(|current| replayed.get(&request.network) == Some(*current))
            .cloned();

        let mut record = SubscriptionRecord::pending(
            id.clone(),
            request_id,
            request.method,
            request.unsubscribe_method,
            request.params,
            request.network,
        );
        record.connection_id = connection_id.clone();

        if let Some(on_failure) = callbacks.on_failure {
            inner.failure_callbacks.lock().await.insert(id.clone(), on_failure);
        }
        if let Err(e) = inner.repository.save(&record).await {
            inner.failure_callbacks.lock().await.remove(&id);
            return Err(e);
        }
        if let Some(metrics) = &inner.metrics {
            metrics.record_subscription(&record.method);
        }

        match (usable, connection_id) {
            (Some(connection_id), _) => {
                if let Err(e) = self.send_subscribe(&connection_id, &record).await {
                    tracing::warn!(
                        subscription_id = %id,
                        error = %e,
                        "Subscribe call not sent, waiting for recovery"
                    );
                } else {
                    tracing::debug!(subscription_id = %id, request_id, "Subscribe call sent");
                }
            }
            (None, Some(connection_id)) => {
                tracing::debug!(
                    subscription_id = %id,
                    connection_id = %connection_id,
                    "Connection not replayed yet, subscribe call deferred"
                );
            }
            (None, None) => {
                tracing::debug!(subscription_id = %id, "No connection yet, subscribe call deferred");
                inner.connections.open_in_background(&record.network);
            }
        }
        drop(replayed);

        Ok(id)
    }

    /// End a subscription
    ///
    /// Unknown ids are ignored. The unsubscribe call is only sent when the
    /// subscription was confirmed on the connection that is still open; the
    /// record is deleted either way and a send failure is returned.
    #[tracing::instrument(skip(self), fields(subscription_id = %id))]
    pub async fn unsubscribe(&self, id: &SubscriptionId) -> Result<()> {
        self.inner.failure_callbacks.lock().await.remove(id);

        let Some(record) = self.inner.repository.get(id).await? else {
            tracing::info!("Unsubscribe for unknown subscription ignored");
            return Ok(());
        };

        let outcome = self.send_unsubscribe(&record).await;
        self.inner.repository.delete(id).await?;

        if let Err(e) = &outcome {
            tracing::warn!(error = %e, "Unsubscribe call failed");
        }
        outcome
    }

    /// Drop a subscription without sending anything
    pub async fn forget(&self, id: &SubscriptionId) -> Result<Option<SubscriptionRecord>> {
        self.inner.failure_callbacks.lock().await.remove(id);
        self.inner.repository.delete(id).await
    }

    pub async fn get(&self, id: &SubscriptionId) -> Result<Option<SubscriptionRecord>> {
        self.inner.repository.get(id).await
    }

    pub async fn list(&self) -> Result<Vec<SubscriptionRecord>> {
        self.inner.repository.list().await
    }

    /// Drop every subscription record
    pub async fn clear_all(&self) -> Result<usize> {
        self.inner.failure_callbacks.lock().await.clear();
        self.inner.replayed.lock().await.clear();
        self.inner.repository.clear().await
    }

    /// Route one inbound frame
    ///
    /// Never fails: frames that match nothing are logged and dropped.
    pub async fn on_message(&self, connection_id: &ConnectionId, payload: Payload) {
        let frame = match codec::decode(&payload) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(connection_id = %connection_id, error = %e, "Dropping undecodable frame");
                self.record_dropped("undecodable");
                return;
            }
        };

        let network = match self.inner.connections.network_of(connection_id).await {
            Ok(Some(network)) => network,
            Ok(None) => {
                tracing::warn!(connection_id = %connection_id, "Dropping frame from untracked connection");
                self.record_dropped("untracked_connection");
                return;
            }
            Err(e) => {
                tracing::error!(connection_id = %connection_id, error = %e, "Connection lookup failed");
                return;
            }
        };

        let outcome = match frame {
            InboundFrame::Notification {
                method,
                subscription,
                result,
            } => {
                self.route_notification(connection_id, &network, method, subscription, result)
                    .await
            }
            InboundFrame::Confirmation {
                request_id,
                rpc_subscription_id,
            } => {
                self.route_confirmation(connection_id, request_id, rpc_subscription_id)
                    .await
            }
            InboundFrame::Failure { id, error } => self.route_failure(&network, id, error).await,
            InboundFrame::Response { id, result } => {
                tracing::debug!(connection_id = %connection_id, id = %id, result = %result, "Response ignored");
                Ok(())
            }
        };

        if let Err(e) = outcome {
            tracing::error!(connection_id = %connection_id, error = %e, "Failed to process frame");
        }
    }

    /// Re-send every subscription of a network on its current connection
    ///
    /// Pending and confirmed records alike go back to `pending` under a
    /// fresh request id. Afterwards new subscriptions on this connection are
    /// sent directly.
    #[tracing::instrument(skip(self), fields(network = %network))]
    pub async fn reissue_network(&self, network: &Network) -> Result<()> {
        let inner = &self.inner;
        let mut replayed = inner.replayed.lock().await;
        let Some(connection_id) = inner.connections.connection_id(network).await? else {
            replayed.remove(network);
            tracing::warn!("No connection to re-issue subscriptions on");
            return Ok(());
        };

        let mut reissued = 0u64;
        let mut last_error = None;
        for record in inner.repository.list_by_network(network).await? {
            let request_id = inner.repository.next_request_id().await?;
            let target = connection_id.clone();
            let updated = inner
                .repository
                .update(&record.id, move |r| {
                    r.reissue(request_id, Some(target.clone()));
                    true
                })
                .await?;
            let Some(updated) = updated else {
                continue;
            };

            match self.send_subscribe(&connection_id, &updated).await {
                Ok(()) => reissued += 1,
                Err(e) => {
                    tracing::warn!(subscription_id = %updated.id, error = %e, "Re-issue failed");
                    last_error = Some(e);
                }
            }
        }

        replayed.insert(network.clone(), connection_id);
        if let Some(metrics) = &inner.metrics {
            metrics.record_reissued(network.as_str(), reissued);
        }
        tracing::info!(count = reissued, "Subscriptions re-issued");
        last_error.map_or(Ok(()), Err)
    }

    async fn send_subscribe(&self, connection_id: &ConnectionId, record: &SubscriptionRecord) -> Result<()> {
        let request = JsonRpcRequest::new(record.method.clone(), record.params.clone(), record.request_id);
        let frame = codec::encode_request(&request)?;
        self.inner.connections.send_message(connection_id, frame).await
    }

    async fn send_unsubscribe(&self, record: &SubscriptionRecord) -> Result<()> {
        let Some(rpc_subscription_id) = record.rpc_subscription_id.filter(|_| record.is_confirmed())
        else {
            return Ok(());
        };

        let current = self.inner.connections.connection_id(&record.network).await?;
        let connection_id = match current {
            Some(current) if record.connection_id.as_ref() == Some(&current) => current,
            _ => {
                tracing::debug!("Connection gone, unsubscribe call skipped");
                return Ok(());
            }
        };

        let request_id = self.inner.repository.next_request_id().await?;
        let request = JsonRpcRequest::new(
            record.unsubscribe_method.clone(),
            vec![serde_json::json!(rpc_subscription_id)],
            request_id,
        );
        let frame = codec::encode_request(&request)?;
        self.inner.connections.send_message(&connection_id, frame).await
    }

    async fn route_notification(
        &self,
        connection_id: &ConnectionId,
        network: &Network,
        notification_method: String,
        rpc_subscription_id: u64,
        result: serde_json::Value,
    ) -> Result<()> {
        let inner = &self.inner;
        let Some(record) = inner
            .repository
            .find_confirmed(connection_id, rpc_subscription_id)
            .await?
        else {
            if inner.repository.has_pending(network).await? {
                tracing::warn!(
                    network = %network,
                    rpc_subscription_id,
                    "Notification arrived while subscriptions are still pending, dropping"
                );
            } else {
                tracing::warn!(network = %network, rpc_subscription_id, "Notification for unknown subscription dropped");
            }
            self.record_dropped("unknown_subscription");
            return Ok(());
        };

        let notification = Notification {
            subscription_id: record.id.clone(),
            network: record.network.clone(),
            method: record.method.clone(),
            notification_method,
            key: record.key().map(str::to_string),
            result,
        };
        let report = inner.registry.dispatch(notification).await;
        if let Some(metrics) = &inner.metrics {
            metrics.record_notification(&record.method, report.delivered as u64, report.failed as u64);
        }
        Ok(())
    }

    async fn route_confirmation(
        &self,
        connection_id: &ConnectionId,
        request_id: u64,
        rpc_subscription_id: u64,
    ) -> Result<()> {
        let inner = &self.inner;
        let Some(record) = inner.repository.find_pending_by_request(request_id).await? else {
            tracing::warn!(request_id, rpc_subscription_id, "Confirmation for unknown request dropped");
            self.record_dropped("unknown_request");
            return Ok(());
        };

        match inner
            .repository
            .confirm(&record.id, request_id, rpc_subscription_id, connection_id)
            .await?
        {
            Some(confirmed) => {
                tracing::info!(
                    subscription_id = %confirmed.id,
                    rpc_subscription_id,
                    "Subscription confirmed"
                );
                if let Some(metrics) = &inner.metrics {
                    metrics.record_confirmation(&confirmed.method);
                }
            }
            None => {
                tracing::debug!(subscription_id = %record.id, request_id, "Subscription moved on before confirmation");
            }
        }
        Ok(())
    }

    async fn route_failure(&self, network: &Network, id: Option<Id>, error: JsonRpcErrorData) -> Result<()> {
        let Some(id) = id else {
            tracing::error!(network = %network, error = %error, "Connection-level error");
            return Ok(());
        };

        let pending = match id.as_u64() {
            Some(request_id) => self.inner.repository.find_pending_by_request(request_id).await?,
            None => None,
        };
        let Some(record) = pending else {
            tracing::error!(network = %network, id = %id, error = %error, "Error response for an unrelated call");
            return Ok(());
        };

        self.inner.repository.delete(&record.id).await?;
        tracing::warn!(
            subscription_id = %record.id,
            method = %record.method,
            error = %error,
            "Subscribe call rejected"
        );
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_subscription_failure(&record.method);
        }

        let callback = self.inner.failure_callbacks.lock().await.remove(&record.id);
        if let Some(callback) = callback {
            let task = tokio::spawn(callback(record.id.clone(), error));
            if let Err(e) = task.await {
                tracing::error!(subscription_id = %record.id, error = %e, "Failure callback panicked");
                if let Some(metrics) = &self.inner.metrics {
                    metrics.record_handler_failure("failure_callback");
                }
            }
        }
        Ok(())
    }

    fn record_dropped(&self, reason: &str) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_dropped_frame(reason);
        }
    }
}
