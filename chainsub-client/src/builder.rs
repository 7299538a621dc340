//! Builder for a fully wired [`Host`]
//!
//! # Examples
//!
//! ```rust,no_run
//! use chainsub_client::{HostBuilder, LifecycleEvent};
//! use chainsub_core::{ManagerConfig, NetworkConfig, TelemetryConfig};
//!
//! # async fn example() -> chainsub_core::Result<()> {
//! let config = ManagerConfig::new("wallet-watcher").with_network(
//!     NetworkConfig::new("mainnet", "wss://api.mainnet-beta.solana.com")
//!         .with_http_url("https://api.mainnet-beta.solana.com"),
//! );
//!
//! let host = HostBuilder::new(config)
//!     .with_telemetry(TelemetryConfig::new("wallet-watcher"))
//!     .with_metrics()
//!     .build()
//!     .await?;
//!
//! host.handle_lifecycle(LifecycleEvent::Start).await?;
//! # Ok(())
//! # }
//! ```

use crate::connection::ConnectionManager;
use crate::lifecycle::Host;
use crate::metrics::ManagerMetrics;
use crate::notification::NotificationRegistry;
use crate::reconnect::ReconnectionStrategy;
use crate::rpc_http::HttpStatusClient;
use crate::signature::{SignatureMonitor, SignatureStatusClient};
use crate::subscription::SubscriptionManager;
use crate::transport::{SocketEvent, Transport, WsTransport};
use chainsub_core::{init_telemetry, Error, ManagerConfig, Result, TelemetryConfig};
use chainsub_store::{ConnectionRepository, RecordStore, SledRecordStore, SubscriptionRepository};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Builder for configuring a [`Host`]
pub struct HostBuilder {
    config: ManagerConfig,
    store: Option<Arc<dyn RecordStore>>,
    transport: Option<Arc<dyn Transport>>,
    events: Option<mpsc::UnboundedReceiver<SocketEvent>>,
    status_client: Option<Arc<dyn SignatureStatusClient>>,
    strategy: Option<Arc<dyn ReconnectionStrategy>>,
    telemetry: Option<TelemetryConfig>,
    metrics: bool,
}

impl HostBuilder {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            store: None,
            transport: None,
            events: None,
            status_client: None,
            strategy: None,
            telemetry: None,
            metrics: false,
        }
    }

    /// Use a specific record store instead of sled at `config.store_path`
    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a specific transport instead of [`WsTransport`]
    ///
    /// Its events are not pumped unless [`with_events`](Self::with_events)
    /// is also given; otherwise feed them to [`Host::handle_socket_event`].
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Pump these events into the host once built
    pub fn with_events(mut self, events: mpsc::UnboundedReceiver<SocketEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Use a specific status client for signature reconciliation
    pub fn with_status_client(mut self, client: Arc<dyn SignatureStatusClient>) -> Self {
        self.status_client = Some(client);
        self
    }

    pub fn with_reconnect_strategy(mut self, strategy: Arc<dyn ReconnectionStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Initialize tracing and OpenTelemetry export on build
    pub fn with_telemetry(mut self, config: TelemetryConfig) -> Self {
        self.telemetry = Some(config);
        self
    }

    /// Record OpenTelemetry metrics
    pub fn with_metrics(mut self) -> Self {
        self.metrics = true;
        self
    }

    /// Wire everything together
    ///
    /// With no transport given, a [`WsTransport`] is created and its event
    /// pump spawned.
    pub async fn build(self) -> Result<Host> {
        let config = self.config;
        config.validate()?;

        if let Some(telemetry) = self.telemetry {
            init_telemetry(telemetry)
                .map_err(|e| Error::Config(format!("Failed to initialize telemetry: {}", e)))?;
        }

        let store = match self.store {
            Some(store) => store,
            None => Arc::new(SledRecordStore::open(&config.store_path)?),
        };

        let (transport, events) = match self.transport {
            Some(transport) => (transport, self.events),
            None => {
                let (transport, events) = WsTransport::new();
                (Arc::new(transport) as Arc<dyn Transport>, Some(events))
            }
        };

        let metrics = self
            .metrics
            .then(|| Arc::new(ManagerMetrics::new(config.service_name.clone())));

        let mut connections =
            ConnectionManager::new(&config, ConnectionRepository::new(Arc::clone(&store)), transport);
        if let Some(strategy) = self.strategy {
            connections = connections.with_strategy(strategy);
        }
        if let Some(metrics) = &metrics {
            connections = connections.with_metrics(Arc::clone(metrics));
        }

        let subscriptions = SubscriptionManager::new(
            SubscriptionRepository::new(store),
            connections.clone(),
            NotificationRegistry::new(),
            metrics.clone(),
        )
        .await;

        let status_client = match self.status_client {
            Some(client) => Some(client),
            None if config.networks.iter().any(|n| n.http_url.is_some()) => {
                Some(Arc::new(HttpStatusClient::new(&config)?) as Arc<dyn SignatureStatusClient>)
            }
            None => None,
        };
        let signatures = SignatureMonitor::new(subscriptions.clone(), status_client, metrics).await;

        let host = Host::new(connections, subscriptions, signatures);
        if let Some(events) = events {
            tokio::spawn(host.clone().run(events));
        }

        tracing::info!(
            service = %config.service_name,
            networks = config.networks.len(),
            "Host ready"
        );
        Ok(host)
    }
}
