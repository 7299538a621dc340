//! Identifiers and JSON-RPC 2.0 message types
//!
//! The manager juggles several id spaces that must never be confused:
//!
//! | id | assigned by | lifetime |
//! |---|---|---|
//! | [`Network`] | configuration | static |
//! | [`ConnectionId`] | the transport, on socket open | one socket |
//! | [`SubscriptionId`] | the manager, on `subscribe` | the whole subscription |
//! | request id (`u64`) | durable counter | one outstanding subscribe call |
//! | rpc subscription id (`u64`) | the remote node | one connection |
//!
//! Each string id gets its own newtype so a connection id cannot be passed
//! where a subscription id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Borrow the underlying string
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Logical network name, e.g. `mainnet` or `devnet`
    ///
    /// The set of valid networks is whatever the configuration lists.
    Network
);

string_id!(
    /// Opaque socket identifier handed out by the transport
    ConnectionId
);

string_id!(
    /// Caller-visible subscription identifier
    ///
    /// Stable for the whole life of a subscription, across any number of
    /// reconnects and re-issued subscribe calls.
    SubscriptionId
);

impl SubscriptionId {
    /// Generate a fresh random subscription id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// JSON-RPC request/response identifier
///
/// Outbound calls always use numeric ids; inbound frames may carry any of
/// the shapes JSON-RPC allows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    /// String identifier
    String(String),
    /// Numeric identifier
    Number(i64),
    /// Explicit `null`
    Null,
}

impl Id {
    /// Numeric value of the id, if it is a non-negative number
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Id::Number(n) => u64::try_from(*n).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::String(s) => write!(f, "\"{}\"", s),
            Id::Number(n) => write!(f, "{}", n),
            Id::Null => write!(f, "null"),
        }
    }
}

impl From<u64> for Id {
    fn from(n: u64) -> Self {
        Id::Number(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Id::Number(n)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::String(s.to_string())
    }
}

/// Outbound JSON-RPC 2.0 request
///
/// ```json
/// {"jsonrpc":"2.0","id":7,"method":"accountSubscribe","params":["9xQe...",{"encoding":"base64"}]}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Correlates the response with this request
    pub id: Id,
    /// Remote method name
    pub method: String,
    /// Positional parameters
    pub params: Vec<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC 2.0 request
    pub fn new(method: impl Into<String>, params: Vec<serde_json::Value>, id: impl Into<Id>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// Raw payload delivered by the transport for one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 text frame
    Text(String),
    /// Binary frame; must hold UTF-8 encoded JSON
    Binary(Vec<u8>),
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(bytes)
    }
}

/// An inbound frame, classified by shape
///
/// Every successfully parsed frame lands in exactly one variant; see
/// [`crate::codec::classify`] for the precedence rules.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Server push for a confirmed subscription
    ///
    /// `{"method":"accountNotification","params":{"subscription":23,"result":{...}}}`
    Notification {
        /// Notification method, e.g. `signatureNotification`
        method: String,
        /// Server-assigned subscription id
        subscription: u64,
        /// Notification body
        result: serde_json::Value,
    },

    /// Successful answer to a subscribe call
    ///
    /// `{"id":4,"result":23}`
    Confirmation {
        /// Request id of the subscribe call being answered
        request_id: u64,
        /// Server-assigned subscription id
        rpc_subscription_id: u64,
    },

    /// Any other successful response (e.g. `true` for an unsubscribe)
    Response {
        /// Id of the call being answered
        id: Id,
        /// Result value
        result: serde_json::Value,
    },

    /// JSON-RPC error
    ///
    /// `id` is `None` for connection-level errors that answer no call.
    Failure {
        /// Id of the failed call, if any
        id: Option<Id>,
        /// Error object
        error: crate::JsonRpcErrorData,
    },
}
