//! Notification handler registry
//!
//! Handlers are registered per `(subscribe method, network)`. Every
//! confirmed subscription created with that method on that network routes
//! its notifications to all of them.
//!
//! Dispatch runs each handler as its own task and waits for all of them. A
//! handler that errors or panics is logged and counted; it never prevents
//! delivery to its siblings.
//!
//! The registry is in memory only. Handlers are code, so each component
//! registers its own on startup.
//!
//! # Examples
//!
//! ```rust,no_run
//! use chainsub_client::NotificationRegistry;
//! use chainsub_core::Network;
//!
//! # async fn example() {
//! let registry = NotificationRegistry::new();
//! registry
//!     .register("accountSubscribe", Network::from("mainnet"), |notification| async move {
//!         println!("{:?} changed: {}", notification.key, notification.result);
//!         Ok(())
//!     })
//!     .await;
//! # }
//! ```

use chainsub_core::{Network, Result, SubscriptionId};
use futures::future::{join_all, BoxFuture};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// One notification, resolved to the subscription it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Caller-visible id of the subscription
    pub subscription_id: SubscriptionId,
    pub network: Network,
    /// Subscribe method of the subscription, e.g. `accountSubscribe`
    pub method: String,
    /// Method on the notification frame, e.g. `accountNotification`
    pub notification_method: String,
    /// First subscribe param when it is a string (address, signature, ...)
    pub key: Option<String>,
    /// `params.result` of the notification frame
    pub result: serde_json::Value,
}

/// Type for notification handler functions
pub type HandlerFn = Arc<dyn Fn(Notification) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Handle returned by [`NotificationRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Outcome of one dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

type HandlerKey = (String, Network);

/// Registry of notification handlers
#[derive(Clone, Default)]
pub struct NotificationRegistry {
    handlers: Arc<RwLock<HashMap<HandlerKey, Vec<(HandlerId, HandlerFn)>>>>,
    next_id: Arc<AtomicU64>,
}

impl NotificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `(method, network)`
    pub async fn register<F, Fut>(
        &self,
        method: impl Into<String>,
        network: Network,
        handler: F,
    ) -> HandlerId
    where
        F: Fn(Notification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let handler: HandlerFn = Arc::new(move |notification| Box::pin(handler(notification)));
        self.handlers
            .write()
            .await
            .entry((method.into(), network))
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove a handler
    pub async fn unregister(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write().await;
        let mut removed = false;
        handlers.retain(|_, list| {
            let before = list.len();
            list.retain(|(handler_id, _)| *handler_id != id);
            removed |= list.len() != before;
            !list.is_empty()
        });
        removed
    }

    pub async fn handler_count(&self, method: &str, network: &Network) -> usize {
        self.handlers
            .read()
            .await
            .get(&(method.to_string(), network.clone()))
            .map_or(0, Vec::len)
    }

    /// Deliver a notification to every handler for its method and network
    pub async fn dispatch(&self, notification: Notification) -> DispatchReport {
        let handlers: Vec<HandlerFn> = self
            .handlers
            .read()
            .await
            .get(&(notification.method.clone(), notification.network.clone()))
            .map(|list| list.iter().map(|(_, handler)| Arc::clone(handler)).collect())
            .unwrap_or_default();

        if handlers.is_empty() {
            tracing::debug!(
                method = %notification.method,
                network = %notification.network,
                "No handler registered for notification"
            );
            return DispatchReport::default();
        }

        let tasks = handlers.into_iter().map(|handler| {
            let notification = notification.clone();
            tokio::spawn(async move { handler(notification).await })
        });

        let mut report = DispatchReport::default();
        for outcome in join_all(tasks).await {
            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    tracing::warn!(
                        subscription_id = %notification.subscription_id,
                        method = %notification.method,
                        error = %e,
                        "Notification handler failed"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        subscription_id = %notification.subscription_id,
                        method = %notification.method,
                        error = %e,
                        "Notification handler panicked"
                    );
                }
            }
        }
        report
    }
}
