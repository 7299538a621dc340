//! Per-network connection lifecycle
//!
//! The [`ConnectionManager`] owns one socket per configured network. It
//! registers every open socket in the [`ConnectionRepository`], retries
//! failed opens on an exponential schedule and tells interested parties
//! when a connection becomes usable again.
//!
//! # Connection Lifecycle
//!
//! ```text
//! open_connection ──► opening ──► registered ──Open event──► recovery callbacks
//!                       │ ▲            │
//!              failure  │ │ delay      │ Close / Error event
//!                       ▼ │            ▼
//!                    backoff ◄──── record dropped
//!                       │
//!                       ▼ attempts exhausted
//!                    given up
//! ```
//!
//! # Single Flight
//!
//! Concurrent opens for one network share a single attempt: the first
//! caller starts it as a background task and every caller awaits the same
//! shared result.
//!
//! # Open Events
//!
//! A transport may report a socket open before `open_socket` has returned
//! to us. Socket registration and event routing share a guard; an open
//! event for a socket that is still being registered is parked and claimed
//! once its record is saved, so recovery always sees the record.

use crate::metrics::ManagerMetrics;
use crate::reconnect::{ExponentialBackoff, ReconnectionStrategy};
use crate::transport::Transport;
use chainsub_core::{ConnectionId, Error, ManagerConfig, Network, NetworkConfig, Result};
use chainsub_store::{ConnectionRecord, ConnectionRepository};
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Callback invoked with the network whose connection became usable
pub type RecoveryFn = Arc<dyn Fn(Network) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Socket lifecycle events, as seen by the connection manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connect,
    Disconnect,
    Error(String),
}

/// Outcome of [`ConnectionManager::setup_all_connections`]
#[derive(Debug, Default)]
pub struct SetupReport {
    /// Networks that got a new connection
    pub opened: Vec<Network>,
    /// Networks whose connection was closed because they are no longer active
    pub closed: Vec<Network>,
    /// Networks that could not be opened or closed
    pub failed: Vec<(Network, Error)>,
}

impl SetupReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenPolicy {
    /// Try right away, then back off
    Immediate,
    /// The connection just dropped; every attempt waits first
    AfterDisconnect,
}

type InflightOpen = Shared<BoxFuture<'static, Result<ConnectionId>>>;

#[derive(Default)]
struct Registration {
    opening: usize,
    early_opens: HashSet<ConnectionId>,
}

/// Manages one connection per network
#[derive(Clone)]
pub struct ConnectionManager {
    networks: Arc<RwLock<HashMap<Network, NetworkConfig>>>,
    repository: ConnectionRepository,
    transport: Arc<dyn Transport>,
    strategy: Arc<dyn ReconnectionStrategy>,
    metrics: Option<Arc<ManagerMetrics>>,
    inflight: Arc<Mutex<HashMap<Network, (u64, InflightOpen)>>>,
    next_flight: Arc<AtomicU64>,
    registration: Arc<Mutex<Registration>>,
    /// Bumped by every explicit close; an attempt started under an older
    /// generation gives up instead of registering its socket
    generations: Arc<Mutex<HashMap<Network, u64>>>,
    attempts: Arc<Mutex<HashMap<Network, u32>>>,
    recovery: Arc<RwLock<Vec<(Option<Network>, RecoveryFn)>>>,
}

impl ConnectionManager {
    /// Create a manager for the networks in `config`
    pub fn new(
        config: &ManagerConfig,
        repository: ConnectionRepository,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let networks = config
            .networks
            .iter()
            .map(|n| (n.network.clone(), n.clone()))
            .collect();

        Self {
            networks: Arc::new(RwLock::new(networks)),
            repository,
            transport,
            strategy: Arc::new(ExponentialBackoff::from_config(&config.reconnect)),
            metrics: None,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_flight: Arc::new(AtomicU64::new(1)),
            registration: Arc::new(Mutex::new(Registration::default())),
            generations: Arc::new(Mutex::new(HashMap::new())),
            attempts: Arc::new(Mutex::new(HashMap::new())),
            recovery: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Replace the backoff schedule
    pub fn with_strategy(mut self, strategy: Arc<dyn ReconnectionStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Attach metrics
    pub fn with_metrics(mut self, metrics: Arc<ManagerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Fail with `UnknownNetwork` unless the network is configured
    pub async fn ensure_known(&self, network: &Network) -> Result<()> {
        if self.networks.read().await.contains_key(network) {
            Ok(())
        } else {
            Err(Error::UnknownNetwork(network.clone()))
        }
    }

    /// Mark a network active or inactive
    ///
    /// Takes effect on the next [`setup_all_connections`](Self::setup_all_connections).
    pub async fn set_active(&self, network: &Network, active: bool) -> Result<()> {
        let mut networks = self.networks.write().await;
        let config = networks
            .get_mut(network)
            .ok_or_else(|| Error::UnknownNetwork(network.clone()))?;
        config.active = active;
        Ok(())
    }

    /// Connection currently registered for a network
    pub async fn connection_id(&self, network: &Network) -> Result<Option<ConnectionId>> {
        Ok(self
            .repository
            .get_by_network(network)
            .await?
            .map(|record| record.id))
    }

    /// Network a registered connection serves
    pub async fn network_of(&self, connection_id: &ConnectionId) -> Result<Option<Network>> {
        Ok(self
            .repository
            .get_by_id(connection_id)
            .await?
            .map(|record| record.network))
    }

    /// Write one text frame on a connection
    pub async fn send_message(&self, connection_id: &ConnectionId, text: String) -> Result<()> {
        self.transport.send_message(connection_id, text).await
    }

    /// Number of delayed attempts made since the network was last usable
    pub async fn reconnect_attempts(&self, network: &Network) -> u32 {
        self.attempts.lock().await.get(network).copied().unwrap_or(0)
    }

    /// Return the network's connection, opening one if needed
    ///
    /// Makes one immediate attempt followed by up to `max_reconnect_attempts`
    /// delayed retries. Concurrent callers for the same network share the
    /// attempt and its result.
    #[tracing::instrument(skip(self), fields(network = %network))]
    pub async fn open_connection(&self, network: &Network) -> Result<ConnectionId> {
        self.ensure_known(network).await?;
        if let Some(record) = self.repository.get_by_network(network).await? {
            return Ok(record.id);
        }
        self.join_or_start(network, OpenPolicy::Immediate).await
    }

    /// Start opening a connection without waiting for it
    pub fn open_in_background(&self, network: &Network) {
        let manager = self.clone();
        let network = network.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.open_connection(&network).await {
                tracing::warn!(network = %network, error = %e, "Background connection open failed");
            }
        });
    }

    /// Close the network's connection; closing twice is a no-op
    #[tracing::instrument(skip(self), fields(network = %network))]
    pub async fn close_connection(&self, network: &Network) -> Result<()> {
        *self.generations.lock().await.entry(network.clone()).or_insert(0) += 1;
        self.inflight.lock().await.remove(network);

        let record = {
            let _registration = self.registration.lock().await;
            self.repository.delete_by_network(network).await?
        };
        let Some(record) = record else {
            tracing::debug!("No connection to close");
            return Ok(());
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_connection_closed();
        }
        if let Err(e) = self.transport.close_socket(&record.id).await {
            tracing::debug!(connection_id = %record.id, error = %e, "Socket close failed");
        }
        tracing::info!(connection_id = %record.id, "Connection closed");
        Ok(())
    }

    /// Open every active network lacking a connection and close every
    /// connection whose network is no longer active
    ///
    /// Networks are handled concurrently; one failure never stops the rest.
    pub async fn setup_all_connections(&self) -> SetupReport {
        let mut report = SetupReport::default();

        let records = match self.repository.list().await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "Could not list connection records");
                Vec::new()
            }
        };
        let connected: HashSet<Network> = records.into_iter().map(|r| r.network).collect();

        let (to_open, to_close) = {
            let networks = self.networks.read().await;
            let to_open: Vec<Network> = networks
                .values()
                .filter(|n| n.active && !connected.contains(&n.network))
                .map(|n| n.network.clone())
                .collect();
            let to_close: Vec<Network> = connected
                .iter()
                .filter(|n| !networks.get(*n).is_some_and(|config| config.active))
                .cloned()
                .collect();
            (to_open, to_close)
        };

        let opens = join_all(to_open.into_iter().map(|network| {
            let manager = self.clone();
            async move {
                let result = manager.open_connection(&network).await;
                (network, result.map(|_| ()))
            }
        }));
        let closes = join_all(to_close.into_iter().map(|network| {
            let manager = self.clone();
            async move {
                let result = manager.close_connection(&network).await;
                (network, result)
            }
        }));
        let (opened, closed) = tokio::join!(opens, closes);

        for (network, result) in opened {
            match result {
                Ok(()) => report.opened.push(network),
                Err(e) => {
                    tracing::error!(network = %network, error = %e, "Failed to open connection");
                    report.failed.push((network, e));
                }
            }
        }
        for (network, result) in closed {
            match result {
                Ok(()) => report.closed.push(network),
                Err(e) => {
                    tracing::error!(network = %network, error = %e, "Failed to close connection");
                    report.failed.push((network, e));
                }
            }
        }

        tracing::info!(
            opened = report.opened.len(),
            closed = report.closed.len(),
            failed = report.failed.len(),
            "Connection setup complete"
        );
        report
    }

    /// Drop every connection record, closing any socket the transport still holds
    pub async fn clear_records(&self) -> Result<usize> {
        let _registration = self.registration.lock().await;
        for record in self.repository.list().await? {
            if let Err(e) = self.transport.close_socket(&record.id).await {
                tracing::debug!(connection_id = %record.id, error = %e, "Stale socket close failed");
            }
        }
        self.repository.clear().await
    }

    /// Register a callback for every network's recovery
    pub async fn on_connection_recovery<F, Fut>(&self, callback: F)
    where
        F: Fn(Network) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register_recovery(None, callback).await;
    }

    /// Register a callback for one network's recovery
    pub async fn on_network_recovery<F, Fut>(&self, network: Network, callback: F)
    where
        F: Fn(Network) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register_recovery(Some(network), callback).await;
    }

    async fn register_recovery<F, Fut>(&self, network: Option<Network>, callback: F)
    where
        F: Fn(Network) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let callback: RecoveryFn = Arc::new(move |network| Box::pin(callback(network)));
        self.recovery.write().await.push((network, callback));
    }

    /// Route a socket lifecycle event
    #[tracing::instrument(skip(self), fields(connection_id = %connection_id))]
    pub async fn handle_connection_event(&self, connection_id: &ConnectionId, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connect => {
                let record = {
                    let mut registration = self.registration.lock().await;
                    match self.repository.get_by_id(connection_id).await {
                        Ok(Some(record)) => record,
                        Ok(None) if registration.opening > 0 => {
                            tracing::debug!("Open event before registration, parking it");
                            registration.early_opens.insert(connection_id.clone());
                            return;
                        }
                        Ok(None) => {
                            tracing::warn!("Open event for unknown connection ignored");
                            return;
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Connection lookup failed");
                            return;
                        }
                    }
                };
                self.on_connected(&record.network).await;
            }
            ConnectionEvent::Disconnect | ConnectionEvent::Error(_) => {
                let removed = {
                    let _registration = self.registration.lock().await;
                    self.repository.delete_by_id(connection_id).await
                };
                let record = match removed {
                    Ok(Some(record)) => record,
                    Ok(None) => {
                        tracing::warn!(event = ?event, "Event for unknown connection ignored");
                        return;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to drop connection record");
                        return;
                    }
                };

                if let ConnectionEvent::Error(message) = &event {
                    tracing::warn!(network = %record.network, error = %message, "Connection failed");
                    if let Err(e) = self.transport.close_socket(connection_id).await {
                        tracing::debug!(error = %e, "Socket close failed");
                    }
                } else {
                    tracing::warn!(network = %record.network, "Connection lost");
                }

                if let Some(metrics) = &self.metrics {
                    metrics.record_connection_closed();
                }
                self.schedule_reconnect(record.network);
            }
        }
    }

    fn schedule_reconnect(&self, network: Network) {
        let manager = self.clone();
        tokio::spawn(async move {
            match manager.join_or_start(&network, OpenPolicy::AfterDisconnect).await {
                Ok(connection_id) => {
                    tracing::info!(network = %network, connection_id = %connection_id, "Reconnected");
                }
                Err(Error::ConnectionClosed) | Err(Error::NetworkInactive(_)) => {
                    tracing::debug!(network = %network, "Reconnect abandoned");
                }
                Err(e) => {
                    tracing::error!(network = %network, error = %e, "Giving up on reconnecting");
                }
            }
        });
    }

    async fn on_connected(&self, network: &Network) {
        self.attempts.lock().await.remove(network);
        if let Some(metrics) = &self.metrics {
            metrics.record_reconnection_success(network.as_str());
        }
        tracing::info!(network = %network, "Connection usable");
        self.fire_recovery(network).await;
    }

    async fn fire_recovery(&self, network: &Network) {
        let callbacks: Vec<RecoveryFn> = self
            .recovery
            .read()
            .await
            .iter()
            .filter(|(filter, _)| filter.as_ref().map_or(true, |n| n == network))
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        let tasks = callbacks.into_iter().map(|callback| {
            let network = network.clone();
            tokio::spawn(async move { callback(network).await })
        });

        for outcome in join_all(tasks).await {
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(e) => format!("callback panicked: {}", e),
            };
            tracing::error!(network = %network, error = %failure, "Recovery callback failed");
            if let Some(metrics) = &self.metrics {
                metrics.record_handler_failure("recovery");
            }
        }
    }

    async fn join_or_start(&self, network: &Network, policy: OpenPolicy) -> Result<ConnectionId> {
        let flight = {
            let mut inflight = self.inflight.lock().await;
            if let Some((_, flight)) = inflight.get(network) {
                flight.clone()
            } else {
                let token = self.next_flight.fetch_add(1, Ordering::SeqCst);
                let manager = self.clone();
                let owned = network.clone();
                let task = tokio::spawn(async move {
                    let result = manager.establish(&owned, policy).await;
                    let mut inflight = manager.inflight.lock().await;
                    if inflight.get(&owned).is_some_and(|(t, _)| *t == token) {
                        inflight.remove(&owned);
                    }
                    result
                });
                let flight = async move {
                    task.await
                        .unwrap_or_else(|e| Err(Error::Internal(format!("open task failed: {}", e))))
                }
                .boxed()
                .shared();
                inflight.insert(network.clone(), (token, flight.clone()));
                flight
            }
        };
        flight.await
    }

    async fn establish(&self, network: &Network, policy: OpenPolicy) -> Result<ConnectionId> {
        let generation = self.generation(network).await;
        let mut last_error = None;
        let mut made = 0u32;

        if policy == OpenPolicy::Immediate {
            let config = self.active_config(network).await?;
            if let Some(record) = self.repository.get_by_network(network).await? {
                return Ok(record.id);
            }
            made += 1;
            match self.try_open(&config, generation).await {
                Ok(connection_id) => return Ok(connection_id),
                Err(Error::ConnectionClosed) => return Err(Error::ConnectionClosed),
                Err(e) => {
                    tracing::warn!(network = %network, error = %e, "Connection attempt failed");
                    last_error = Some(e);
                }
            }
        }

        let mut attempt = 0u32;
        while let Some(delay) = self.strategy.next_delay(attempt) {
            attempt += 1;
            self.attempts.lock().await.insert(network.clone(), attempt);
            if let Some(metrics) = &self.metrics {
                metrics.record_reconnection_attempt(network.as_str());
            }
            tracing::info!(
                network = %network,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying connection"
            );
            tokio::time::sleep(delay).await;

            if self.generation(network).await != generation {
                return Err(Error::ConnectionClosed);
            }
            let config = self.active_config(network).await?;
            if let Some(record) = self.repository.get_by_network(network).await? {
                return Ok(record.id);
            }

            made += 1;
            match self.try_open(&config, generation).await {
                Ok(connection_id) => return Ok(connection_id),
                Err(Error::ConnectionClosed) => return Err(Error::ConnectionClosed),
                Err(e) => {
                    tracing::warn!(network = %network, attempt, error = %e, "Connection attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(Error::ReconnectExhausted {
            network: network.clone(),
            attempts: made,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempts allowed".to_string()),
        })
    }

    async fn try_open(&self, config: &NetworkConfig, generation: u64) -> Result<ConnectionId> {
        self.registration.lock().await.opening += 1;
        let opened = self.transport.open_socket(&config.ws_url).await;

        let mut registration = self.registration.lock().await;
        registration.opening -= 1;
        let claimed = match &opened {
            Ok(connection_id) => registration.early_opens.remove(connection_id),
            Err(_) => false,
        };
        if registration.opening == 0 {
            registration.early_opens.clear();
        }
        let connection_id = opened?;

        if self.generation(&config.network).await != generation {
            drop(registration);
            tracing::debug!(connection_id = %connection_id, "Connection closed while opening, discarding socket");
            self.discard_socket(&connection_id).await;
            return Err(Error::ConnectionClosed);
        }

        let record = ConnectionRecord::new(
            connection_id.clone(),
            config.network.clone(),
            config.ws_url.clone(),
        );
        if let Err(e) = self.repository.save(&record).await {
            drop(registration);
            self.discard_socket(&connection_id).await;
            return Err(e);
        }
        drop(registration);

        if let Some(metrics) = &self.metrics {
            metrics.record_connection_opened(config.network.as_str());
        }
        tracing::info!(network = %config.network, connection_id = %connection_id, "Connection registered");

        if claimed {
            let manager = self.clone();
            let network = config.network.clone();
            tokio::spawn(async move { manager.on_connected(&network).await });
        }
        Ok(connection_id)
    }

    async fn discard_socket(&self, connection_id: &ConnectionId) {
        if let Err(e) = self.transport.close_socket(connection_id).await {
            tracing::debug!(connection_id = %connection_id, error = %e, "Socket close failed");
        }
    }

    async fn active_config(&self, network: &Network) -> Result<NetworkConfig> {
        let networks = self.networks.read().await;
        let config = networks
            .get(network)
            .ok_or_else(|| Error::UnknownNetwork(network.clone()))?;
        if !config.active {
            return Err(Error::NetworkInactive(network.clone()));
        }
        Ok(config.clone())
    }

    async fn generation(&self, network: &Network) -> u64 {
        self.generations.lock().await.get(network).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chainsub_core::ReconnectConfig;
    use chainsub_store::SledRecordStore;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::time::Instant;

    #[derive(Default)]
    struct RefusingTransport {
        attempts: std::sync::Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl Transport for RefusingTransport {
        async fn open_socket(&self, _url: &str) -> Result<ConnectionId> {
            self.attempts.lock().unwrap().push(Instant::now());
            Err(Error::WebSocket("connection refused".into()))
        }

        async fn close_socket(&self, _connection_id: &ConnectionId) -> Result<()> {
            Ok(())
        }

        async fn send_message(&self, connection_id: &ConnectionId, _text: String) -> Result<()> {
            Err(Error::UnknownConnection(connection_id.clone()))
        }
    }

    #[derive(Default)]
    struct CountingTransport {
        opened: AtomicUsize,
        closed: std::sync::Mutex<Vec<ConnectionId>>,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn open_socket(&self, _url: &str) -> Result<ConnectionId> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let n = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(ConnectionId::from(format!("conn-{}", n)))
        }

        async fn close_socket(&self, connection_id: &ConnectionId) -> Result<()> {
            self.closed.lock().unwrap().push(connection_id.clone());
            Ok(())
        }

        async fn send_message(&self, _connection_id: &ConnectionId, _text: String) -> Result<()> {
            Ok(())
        }
    }

    fn config(attempts: u32) -> ManagerConfig {
        ManagerConfig::new("test")
            .with_network(NetworkConfig::new("mainnet", "ws://127.0.0.1:1"))
            .with_network(NetworkConfig::new("devnet", "ws://127.0.0.1:2").with_active(false))
            .with_reconnect(ReconnectConfig::new(attempts, Duration::from_millis(100)))
    }

    fn manager(attempts: u32, transport: Arc<dyn Transport>) -> ConnectionManager {
        let store = Arc::new(SledRecordStore::temporary().unwrap());
        ConnectionManager::new(&config(attempts), ConnectionRepository::new(store), transport)
    }

    #[tokio::test]
    async fn test_unknown_and_inactive_networks() {
        let manager = manager(0, Arc::new(CountingTransport::default()));

        let err = manager.open_connection(&"testnet".into()).await.unwrap_err();
        assert!(matches!(err, Error::UnknownNetwork(_)));

        let err = manager.open_connection(&"devnet".into()).await.unwrap_err();
        assert!(matches!(err, Error::NetworkInactive(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_open_retries_then_fails() {
        let transport = Arc::new(RefusingTransport::default());
        let manager = manager(3, transport.clone());

        let err = manager.open_connection(&"mainnet".into()).await.unwrap_err();
        match err {
            Error::ReconnectExhausted { attempts, last_error, .. } => {
                assert_eq!(attempts, 4);
                assert!(last_error.contains("refused"));
            }
            other => panic!("unexpected error: {}", other),
        }

        let attempts = transport.attempts.lock().unwrap().clone();
        let gaps: Vec<_> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400)
            ]
        );
        assert!(manager.connection_id(&"mainnet".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_opens_share_one_socket() {
        let transport = Arc::new(CountingTransport::default());
        let manager = manager(0, transport.clone());

        let opens = (0..5).map(|_| {
            let manager = manager.clone();
            async move { manager.open_connection(&"mainnet".into()).await.unwrap() }
        });
        let ids = join_all(opens).await;

        assert!(ids.iter().all(|id| id == &ids[0]));
        assert_eq!(transport.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let manager = manager(0, Arc::new(CountingTransport::default()));
        let network = Network::from("mainnet");

        manager.open_connection(&network).await.unwrap();
        manager.close_connection(&network).await.unwrap();
        manager.close_connection(&network).await.unwrap();
        assert!(manager.connection_id(&network).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_setup_closes_deactivated_networks() {
        let manager = manager(0, Arc::new(CountingTransport::default()));
        let mainnet = Network::from("mainnet");

        let report = manager.setup_all_connections().await;
        assert_eq!(report.opened, vec![mainnet.clone()]);
        assert!(report.is_success());

        manager.set_active(&mainnet, false).await.unwrap();
        let report = manager.setup_all_connections().await;
        assert_eq!(report.closed, vec![mainnet.clone()]);
        assert!(manager.connection_id(&mainnet).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_open_discards_socket() {
        let transport = Arc::new(CountingTransport::default());
        let manager = manager(0, transport.clone());
        let network = Network::from("mainnet");

        let opening = {
            let manager = manager.clone();
            let network = network.clone();
            tokio::spawn(async move { manager.open_connection(&network).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        manager.close_connection(&network).await.unwrap();

        let err = opening.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
        assert_eq!(*transport.closed.lock().unwrap(), vec![ConnectionId::from("conn-1")]);
        assert!(manager.connection_id(&network).await.unwrap().is_none());
    }
}
