//! Transaction signature confirmation tracking
//!
//! A watch subscribes `signatureSubscribe` for one signature at a target
//! commitment and calls back once the node reports it. The node sends a
//! single notification per signature subscription and then drops it, so
//! the watch and its subscription record are forgotten after delivery.
//!
//! A notification sent while the socket was down is lost. Whenever a
//! network's connection recovers, every watched signature on it is checked
//! over HTTP (`getSignatureStatuses`); signatures that already reached
//! their commitment are delivered from that status and their watch ends.

use crate::metrics::ManagerMetrics;
use crate::notification::Notification;
use crate::subscription::{SubscribeCallbacks, SubscribeRequest, SubscriptionManager};
use async_trait::async_trait;
use chainsub_core::{Network, Result, SubscriptionId};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;

pub const SIGNATURE_SUBSCRIBE: &str = "signatureSubscribe";
pub const SIGNATURE_UNSUBSCRIBE: &str = "signatureUnsubscribe";

/// How settled a transaction is, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a `getSignatureStatuses` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureStatus {
    pub slot: u64,
    /// `None` once the block is rooted
    #[serde(default)]
    pub confirmations: Option<u64>,
    #[serde(default)]
    pub err: Option<serde_json::Value>,
    #[serde(default)]
    pub confirmation_status: Option<Commitment>,
}

impl SignatureStatus {
    /// Commitment this status represents
    ///
    /// Nodes that omit `confirmationStatus` report rooted transactions with
    /// `confirmations: null`.
    pub fn commitment(&self) -> Commitment {
        match (self.confirmation_status, self.confirmations) {
            (Some(status), _) => status,
            (None, None) => Commitment::Finalized,
            (None, Some(_)) => Commitment::Processed,
        }
    }

    pub fn has_reached(&self, target: Commitment) -> bool {
        self.commitment() >= target
    }
}

/// Looks up signature statuses outside the socket
#[async_trait]
pub trait SignatureStatusClient: Send + Sync {
    /// Current status of a signature, `None` if the node does not know it
    async fn signature_status(&self, network: &Network, signature: &str) -> Result<Option<SignatureStatus>>;
}

/// How a commitment was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReachedVia {
    Notification,
    Reconciliation,
}

/// Delivered to a watch's callback
#[derive(Debug, Clone, PartialEq)]
pub struct CommitmentReached {
    pub subscription_id: SubscriptionId,
    pub signature: String,
    pub network: Network,
    pub commitment: Commitment,
    pub via: ReachedVia,
    /// Notification result, or the serialized status when reconciled
    pub result: serde_json::Value,
}

/// Callback invoked once a watched signature reaches its commitment
pub type CommitmentFn = Arc<dyn Fn(CommitmentReached) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A signature to watch
#[derive(Clone)]
pub struct MonitorRequest {
    pub signature: String,
    pub commitment: Commitment,
    pub network: Network,
    on_commitment_reached: CommitmentFn,
}

impl MonitorRequest {
    pub fn new<F, Fut>(
        signature: impl Into<String>,
        commitment: Commitment,
        network: impl Into<Network>,
        on_commitment_reached: F,
    ) -> Self
    where
        F: Fn(CommitmentReached) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            signature: signature.into(),
            commitment,
            network: network.into(),
            on_commitment_reached: Arc::new(move |reached| Box::pin(on_commitment_reached(reached))),
        }
    }
}

struct Watch {
    signature: String,
    commitment: Commitment,
    network: Network,
    callback: CommitmentFn,
}

struct Inner {
    subscriptions: SubscriptionManager,
    status_client: Option<Arc<dyn SignatureStatusClient>>,
    metrics: Option<Arc<ManagerMetrics>>,
    watches: Mutex<HashMap<SubscriptionId, Watch>>,
    handled_networks: Mutex<HashSet<Network>>,
}

/// Watches transaction signatures until they reach a commitment
#[derive(Clone)]
pub struct SignatureMonitor {
    inner: Arc<Inner>,
}

impl SignatureMonitor {
    /// Create a monitor and register its reconciliation for connection recovery
    pub async fn new(
        subscriptions: SubscriptionManager,
        status_client: Option<Arc<dyn SignatureStatusClient>>,
        metrics: Option<Arc<ManagerMetrics>>,
    ) -> Self {
        let inner = Arc::new(Inner {
            subscriptions,
            status_client,
            metrics,
            watches: Mutex::new(HashMap::new()),
            handled_networks: Mutex::new(HashSet::new()),
        });

        let weak = Arc::downgrade(&inner);
        inner
            .subscriptions
            .connections()
            .on_connection_recovery(move |network| {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(inner) => SignatureMonitor { inner }.reconcile(&network).await,
                        None => Ok(()),
                    }
                }
            })
            .await;

        Self { inner }
    }

    /// Start watching a signature
    #[tracing::instrument(skip(self, request), fields(signature = %request.signature, network = %request.network))]
    pub async fn monitor(&self, request: MonitorRequest) -> Result<SubscriptionId> {
        self.ensure_handler(&request.network).await;

        let params = vec![
            serde_json::json!(request.signature),
            serde_json::json!({ "commitment": request.commitment.as_str() }),
        ];
        let subscribe = SubscribeRequest::new(SIGNATURE_SUBSCRIBE, SIGNATURE_UNSUBSCRIBE, request.network.clone())
            .with_params(params);

        let weak = Arc::downgrade(&self.inner);
        let callbacks = SubscribeCallbacks::new().on_failure(move |id, error| {
            let weak = weak.clone();
            async move {
                let Some(inner) = weak.upgrade() else { return };
                let removed = inner.watches.lock().await.remove(&id);
                if let Some(watch) = removed {
                    tracing::warn!(
                        signature = %watch.signature,
                        error = %error,
                        "Signature subscription rejected, watch dropped"
                    );
                }
            }
        });

        // Held across subscribe so a notification cannot race the insert
        let mut watches = self.inner.watches.lock().await;
        let id = self.inner.subscriptions.subscribe_with(subscribe, callbacks).await?;
        watches.insert(
            id.clone(),
            Watch {
                signature: request.signature,
                commitment: request.commitment,
                network: request.network,
                callback: request.on_commitment_reached,
            },
        );
        Ok(id)
    }

    /// Stop watching; returns whether the watch existed
    pub async fn cancel(&self, id: &SubscriptionId) -> Result<bool> {
        let removed = self.inner.watches.lock().await.remove(id);
        if removed.is_none() {
            return Ok(false);
        }
        self.inner.subscriptions.unsubscribe(id).await?;
        Ok(true)
    }

    pub async fn watch_count(&self) -> usize {
        self.inner.watches.lock().await.len()
    }

    /// Drop every watch without touching subscriptions
    pub async fn clear(&self) {
        self.inner.watches.lock().await.clear();
    }

    /// Check every watched signature on a network over HTTP
    #[tracing::instrument(skip(self), fields(network = %network))]
    pub async fn reconcile(&self, network: &Network) -> Result<()> {
        let Some(client) = &self.inner.status_client else {
            return Ok(());
        };

        let watched: Vec<(SubscriptionId, String, Commitment)> = self
            .inner
            .watches
            .lock()
            .await
            .iter()
            .filter(|(_, watch)| &watch.network == network)
            .map(|(id, watch)| (id.clone(), watch.signature.clone(), watch.commitment))
            .collect();

        for (id, signature, commitment) in watched {
            let status = match client.signature_status(network, &signature).await {
                Ok(Some(status)) => status,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(signature = %signature, error = %e, "Status lookup failed");
                    continue;
                }
            };
            if !status.has_reached(commitment) {
                tracing::debug!(signature = %signature, reached = %status.commitment(), "Not there yet");
                continue;
            }

            // Delivered by a notification in the meantime
            let Some(watch) = self.inner.watches.lock().await.remove(&id) else {
                continue;
            };
            if let Err(e) = self.inner.subscriptions.unsubscribe(&id).await {
                tracing::debug!(subscription_id = %id, error = %e, "Unsubscribe after reconciliation failed");
            }
            let result = serde_json::to_value(&status)?;
            self.deliver(id, watch, ReachedVia::Reconciliation, result).await;
        }
        Ok(())
    }

    async fn ensure_handler(&self, network: &Network) {
        if !self.inner.handled_networks.lock().await.insert(network.clone()) {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        self.inner
            .subscriptions
            .registry()
            .register(SIGNATURE_SUBSCRIBE, network.clone(), move |notification| {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(inner) => SignatureMonitor { inner }.on_notification(notification).await,
                        None => Ok(()),
                    }
                }
            })
            .await;
    }

    async fn on_notification(&self, notification: Notification) -> Result<()> {
        let id = notification.subscription_id;
        let Some(watch) = self.inner.watches.lock().await.remove(&id) else {
            tracing::debug!(subscription_id = %id, "Notification for a signature no longer watched");
            return Ok(());
        };

        self.inner.subscriptions.forget(&id).await?;
        self.deliver(id, watch, ReachedVia::Notification, notification.result)
            .await;
        Ok(())
    }

    async fn deliver(&self, id: SubscriptionId, watch: Watch, via: ReachedVia, result: serde_json::Value) {
        let reached = CommitmentReached {
            subscription_id: id,
            signature: watch.signature,
            network: watch.network,
            commitment: watch.commitment,
            via,
            result,
        };
        let signature = reached.signature.clone();
        tracing::info!(signature = %signature, commitment = %reached.commitment, via = ?via, "Commitment reached");

        let callback = watch.callback;
        let failure = match tokio::spawn(async move { callback(reached).await }).await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(e) => format!("callback panicked: {}", e),
        };
        tracing::error!(signature = %signature, error = %failure, "Commitment callback failed");
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_handler_failure("commitment_callback");
        }
    }
}
