//! chainsub - durable blockchain subscriptions over WebSocket JSON-RPC
//!
//! This is the convenience crate that re-exports the chainsub sub-crates.
//!
//! # Architecture
//!
//! - **chainsub-core**: ids, wire types, frame codec, errors, config, telemetry
//! - **chainsub-store**: durable connection and subscription records on sled
//! - **chainsub-client**: transport, connection and subscription managers,
//!   signature monitor, lifecycle host
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use chainsub::{Commitment, HostBuilder, LifecycleEvent, ManagerConfig, MonitorRequest, NetworkConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ManagerConfig::new("payments").with_network(
//!         NetworkConfig::new("mainnet", "wss://api.mainnet-beta.solana.com")
//!             .with_http_url("https://api.mainnet-beta.solana.com"),
//!     );
//!     let host = HostBuilder::new(config).build().await?;
//!     host.handle_lifecycle(LifecycleEvent::Start).await?;
//!
//!     host.monitor_signature(MonitorRequest::new(
//!         "5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnb",
//!         Commitment::Finalized,
//!         "mainnet",
//!         |reached| async move {
//!             println!("{} is {}", reached.signature, reached.commitment);
//!             Ok(())
//!         },
//!     ))
//!     .await?;
//!
//!     Ok(())
//! }
//! ```

pub use chainsub_client as client;
pub use chainsub_core as core;
pub use chainsub_store as store;

pub use chainsub_client::{
    Commitment, Host, HostBuilder, LifecycleEvent, MonitorRequest, Notification, SubscribeCallbacks,
    SubscribeRequest,
};
pub use chainsub_core::{
    Error, ManagerConfig, Network, NetworkConfig, ReconnectConfig, Result, SubscriptionId,
    TelemetryConfig,
};
