//! Persisted record types
//!
//! Records are bincode-encoded at rest. Subscription params are arbitrary
//! JSON, which bincode cannot describe, so they are stored as a JSON string.

use chainsub_core::{ConnectionId, Error, Network, Result, SubscriptionId};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// One open socket for a network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    /// Transport-assigned socket id
    pub id: ConnectionId,
    /// Network this socket serves
    pub network: Network,
    /// Endpoint the socket was opened against
    pub url: String,
    /// When the socket was registered
    pub opened_at: DateTime<Utc>,
}

impl ConnectionRecord {
    /// Create a record stamped with the current time
    pub fn new(id: ConnectionId, network: Network, url: impl Into<String>) -> Self {
        Self {
            id,
            network,
            url: url.into(),
            opened_at: Utc::now(),
        }
    }
}

/// Where a subscription is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    /// Subscribe call persisted, sent or waiting for a connection
    Pending,
    /// Server acknowledged the call with a subscription id
    Confirmed,
}

/// Durable state of one subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub id: SubscriptionId,
    /// Wire id of the current outstanding subscribe call
    pub request_id: u64,
    pub method: String,
    pub unsubscribe_method: String,
    #[serde(with = "json_text")]
    pub params: Vec<serde_json::Value>,
    pub network: Network,
    pub status: SubscriptionStatus,
    /// Present only while confirmed
    pub rpc_subscription_id: Option<u64>,
    /// Socket the current subscribe call went out on, if any
    pub connection_id: Option<ConnectionId>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl SubscriptionRecord {
    /// Create a pending record
    pub fn pending(
        id: SubscriptionId,
        request_id: u64,
        method: impl Into<String>,
        unsubscribe_method: impl Into<String>,
        params: Vec<serde_json::Value>,
        network: Network,
    ) -> Self {
        Self {
            id,
            request_id,
            method: method.into(),
            unsubscribe_method: unsubscribe_method.into(),
            params,
            network,
            status: SubscriptionStatus::Pending,
            rpc_subscription_id: None,
            connection_id: None,
            created_at: Utc::now(),
            confirmed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == SubscriptionStatus::Pending
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == SubscriptionStatus::Confirmed
    }

    /// Move to `confirmed` with the server-assigned id
    pub fn confirm(&mut self, rpc_subscription_id: u64) {
        self.status = SubscriptionStatus::Confirmed;
        self.rpc_subscription_id = Some(rpc_subscription_id);
        self.confirmed_at = Some(Utc::now());
    }

    /// Back to `pending` under a fresh request id
    ///
    /// The old server id means nothing on a new connection, so it is dropped.
    pub fn reissue(&mut self, request_id: u64, connection_id: Option<ConnectionId>) {
        self.status = SubscriptionStatus::Pending;
        self.request_id = request_id;
        self.rpc_subscription_id = None;
        self.confirmed_at = None;
        self.connection_id = connection_id;
    }

    /// The watched resource, when the first param is a string
    ///
    /// For account, program and signature subscriptions this is the
    /// address or signature being watched.
    pub fn key(&self) -> Option<&str> {
        self.params.first().and_then(|p| p.as_str())
    }
}

pub(crate) fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    bincode::serialize(record).map_err(|e| Error::Storage(format!("Failed to encode record: {}", e)))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| Error::Storage(format!("Failed to decode record: {}", e)))
}

mod json_text {
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    #[allow(clippy::ptr_arg)]
    pub fn serialize<S: Serializer>(params: &Vec<Value>, serializer: S) -> Result<S::Ok, S::Error> {
        let text = serde_json::to_string(params).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Value>, D::Error> {
        let text = String::deserialize(deserializer)?;
        serde_json::from_str(&text).map_err(serde::de::Error::custom)
    }
}
