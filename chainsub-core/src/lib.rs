//! Core types for chainsub
//!
//! This crate holds everything the store and client crates share:
//!
//! - **Types**: network, connection and subscription identifiers, JSON-RPC
//!   request and inbound frame shapes
//! - **Codec**: outbound encoding and inbound frame classification
//! - **Error handling**: the crate-wide `Error` and `Result`
//! - **Config**: networks, endpoints and backoff parameters
//! - **Telemetry**: `tracing` subscriber and OpenTelemetry export setup
//!
//! # Example
//!
//! ```rust
//! use chainsub_core::{codec, InboundFrame};
//!
//! let frame = codec::classify(r#"{"jsonrpc":"2.0","id":2,"result":555}"#).unwrap();
//! assert_eq!(
//!     frame,
//!     InboundFrame::Confirmation { request_id: 2, rpc_subscription_id: 555 }
//! );
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod telemetry;
pub mod types;

pub use config::{ManagerConfig, NetworkConfig, ReconnectConfig};
pub use error::{Error, JsonRpcErrorData, Result};
pub use telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};
pub use types::{ConnectionId, Id, InboundFrame, JsonRpcRequest, Network, Payload, SubscriptionId};
