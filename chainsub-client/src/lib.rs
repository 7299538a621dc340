//! Subscription and connection lifecycle manager over WebSocket JSON-RPC
//!
//! This crate keeps blockchain node subscriptions alive for any number of
//! logical networks, across dropped sockets and restarted processes.
//!
//! # Core Features
//!
//! - **Connections**: one socket per network, single-flight opens,
//!   exponential backoff, recovery callbacks
//! - **Subscriptions**: durable `pending → confirmed` state machine with
//!   full replay whenever a connection recovers
//! - **Routing**: notifications matched per connection and fanned out to
//!   every registered handler
//! - **Signatures**: one-shot `signatureSubscribe` watches, reconciled over
//!   HTTP after reconnects
//! - **Observability**: `tracing` spans and OpenTelemetry metrics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use chainsub_client::{HostBuilder, LifecycleEvent, SubscribeRequest};
//! use chainsub_core::{ManagerConfig, Network, NetworkConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ManagerConfig::new("wallet-watcher")
//!         .with_network(NetworkConfig::new("mainnet", "wss://api.mainnet-beta.solana.com"));
//!     let host = HostBuilder::new(config).build().await?;
//!     host.handle_lifecycle(LifecycleEvent::Start).await?;
//!
//!     host.register_notification_handler("accountSubscribe", Network::from("mainnet"), |n| async move {
//!         println!("{:?}: {}", n.key, n.result);
//!         Ok(())
//!     })
//!     .await;
//!
//!     host.subscribe(
//!         SubscribeRequest::new("accountSubscribe", "accountUnsubscribe", "mainnet")
//!             .with_params(vec![json!("9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin")]),
//!     )
//!     .await?;
//!
//!     Ok(())
//! }
//! ```

mod builder;
mod connection;
mod lifecycle;
mod metrics;
mod notification;
mod reconnect;
mod rpc_http;
mod signature;
mod subscription;
mod transport;

pub use builder::HostBuilder;
pub use connection::{ConnectionEvent, ConnectionManager, RecoveryFn, SetupReport};
pub use lifecycle::{Host, LifecycleEvent};
pub use metrics::ManagerMetrics;
pub use notification::{DispatchReport, HandlerFn, HandlerId, Notification, NotificationRegistry};
pub use reconnect::{ExponentialBackoff, ReconnectionStrategy};
pub use rpc_http::HttpStatusClient;
pub use signature::{
    Commitment, CommitmentFn, CommitmentReached, MonitorRequest, ReachedVia, SignatureMonitor,
    SignatureStatus, SignatureStatusClient, SIGNATURE_SUBSCRIBE, SIGNATURE_UNSUBSCRIBE,
};
pub use subscription::{FailureFn, SubscribeCallbacks, SubscribeRequest, SubscriptionManager};
pub use transport::{SocketEvent, Transport, WsTransport};
