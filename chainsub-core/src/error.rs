//! Error types for chainsub
//!
//! Two error shapes live here:
//!
//! - **Error**: everything the manager can fail with internally (uses thiserror)
//! - **JsonRpcErrorData**: the wire-format `error` object a node sends back
//!
//! `Error` is `Clone` because a single connection attempt can be awaited by
//! several callers at once and each of them receives the same outcome.
//!
//! # Examples
//!
//! ```rust
//! use chainsub_core::{Error, JsonRpcErrorData, Network};
//!
//! let error = Error::UnknownNetwork(Network::from("net-x"));
//! assert!(error.to_string().contains("net-x"));
//!
//! let wire = JsonRpcErrorData::new(-32602, "Invalid params");
//! assert_eq!(wire.to_string(), "[-32602] Invalid params");
//! ```

use crate::types::{ConnectionId, Network};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for chainsub operations
pub type Result<T> = std::result::Result<T, Error>;

/// Application-level error type for chainsub operations
///
/// # Error Categories
///
/// - **Remote errors**: JsonRpc
/// - **Transport errors**: WebSocket, ConnectionClosed, ReconnectExhausted
/// - **Persistence errors**: Storage
/// - **Lookup errors**: UnknownNetwork, UnknownConnection, NetworkInactive
/// - **Processing errors**: Serialization, InvalidFrame, Http, Config, Internal
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Error object returned by the remote node
    #[error("JSON-RPC error: {0}")]
    JsonRpc(#[from] JsonRpcErrorData),

    /// Serialization or deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// WebSocket transport layer error
    ///
    /// Covers handshake failures and socket write errors below the
    /// JSON-RPC layer.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Durable record store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// HTTP request to a node's RPC endpoint failed
    #[error("HTTP error: {0}")]
    Http(String),

    /// The network is not part of the configured set
    #[error("Unknown network: {0}")]
    UnknownNetwork(Network),

    /// No socket is tracked under this connection id
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The network is configured but currently marked inactive
    #[error("Network is inactive: {0}")]
    NetworkInactive(Network),

    /// Every attempt to open a connection for a network failed
    ///
    /// Only surfaced to callers that asked for the connection directly;
    /// background reconnection logs this and gives up.
    #[error("Connection to {network} failed after {attempts} attempts: {last_error}")]
    ReconnectExhausted {
        /// Network that could not be reached
        network: Network,
        /// Number of attempts made
        attempts: u32,
        /// Error reported by the final attempt
        last_error: String,
    },

    /// Inbound payload could not be decoded into a known frame shape
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Configuration is missing or inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected internal failure
    #[error("Internal error: {0}")]
    Internal(String),

    /// Connection was closed
    #[error("Connection closed")]
    ConnectionClosed,
}

/// JSON-RPC 2.0 error object as it appears on the wire
///
/// ```json
/// {"code": -32602, "message": "Invalid params", "data": "..."}
/// ```
///
/// `data` is optional and omitted from the serialized form when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorData {
    /// Numeric error code
    pub code: i32,

    /// Short human-readable description
    pub message: String,

    /// Optional additional error information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcErrorData {
    /// Create a new JSON-RPC error with code and message
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create a new JSON-RPC error with additional data
    pub fn with_data(code: i32, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Create a parse error (-32700)
    ///
    /// Used when an inbound payload is not valid JSON.
    pub fn parse_error() -> Self {
        Self::new(-32700, "Parse error")
    }

    /// Create an invalid request error (-32600)
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new(-32600, msg)
    }

    /// Create an internal error (-32603)
    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::new(-32603, msg)
    }
}

impl std::fmt::Display for JsonRpcErrorData {
    /// Formats as "[code] message", e.g. "[-32602] Invalid params"
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcErrorData {}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
