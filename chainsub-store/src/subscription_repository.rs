//! Subscription records and the request id counter
//!
//! Layout:
//!
//! - `subscription:{id}` → bincode [`SubscriptionRecord`]
//! - `counter:request_id` → big-endian `u64`, last id handed out
//!
//! The request id counter is durable so that ids keep increasing across
//! process restarts and a late confirmation for an old call can never match
//! a new one.

use crate::records::{decode, encode, SubscriptionRecord};
use crate::store::RecordStore;
use chainsub_core::{ConnectionId, Error, Network, Result, SubscriptionId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const SUBSCRIPTION_PREFIX: &str = "subscription:";
const REQUEST_ID_COUNTER: &str = "counter:request_id";

fn subscription_key(id: &SubscriptionId) -> String {
    format!("{}{}", SUBSCRIPTION_PREFIX, id)
}

/// CRUD over [`SubscriptionRecord`]s
#[derive(Clone)]
pub struct SubscriptionRepository {
    store: Arc<dyn RecordStore>,
}

impl SubscriptionRepository {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Mint the next request id, starting at 1
    pub async fn next_request_id(&self) -> Result<u64> {
        let increment = |current: Option<&[u8]>| -> Option<Vec<u8>> {
            let last = current
                .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
                .map(u64::from_be_bytes)
                .unwrap_or(0);
            Some((last + 1).to_be_bytes().to_vec())
        };

        let bytes = self
            .store
            .update(REQUEST_ID_COUNTER, &increment)
            .await?
            .ok_or_else(|| Error::Storage("request id counter vanished".to_string()))?;
        let bytes = <[u8; 8]>::try_from(bytes.as_slice())
            .map_err(|_| Error::Storage("request id counter is corrupt".to_string()))?;
        Ok(u64::from_be_bytes(bytes))
    }

    pub async fn save(&self, record: &SubscriptionRecord) -> Result<()> {
        self.store
            .set(&subscription_key(&record.id), encode(record)?)
            .await
    }

    pub async fn get(&self, id: &SubscriptionId) -> Result<Option<SubscriptionRecord>> {
        match self.store.get(&subscription_key(id)).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Remove a record, returning it
    pub async fn delete(&self, id: &SubscriptionId) -> Result<Option<SubscriptionRecord>> {
        match self.store.remove(&subscription_key(id)).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Atomically apply `f` to a record
    ///
    /// `f` returns whether it changed the record. Returns the updated record
    /// when `f` applied, `None` when the record is absent or `f` declined.
    pub async fn update<F>(&self, id: &SubscriptionId, f: F) -> Result<Option<SubscriptionRecord>>
    where
        F: Fn(&mut SubscriptionRecord) -> bool + Send + Sync,
    {
        let applied = AtomicBool::new(false);
        let apply = |current: Option<&[u8]>| -> Option<Vec<u8>> {
            applied.store(false, Ordering::SeqCst);
            let bytes = current?;
            let Ok(mut record) = decode::<SubscriptionRecord>(bytes) else {
                return Some(bytes.to_vec());
            };
            if !f(&mut record) {
                return Some(bytes.to_vec());
            }
            match encode(&record) {
                Ok(encoded) => {
                    applied.store(true, Ordering::SeqCst);
                    Some(encoded)
                }
                Err(_) => Some(bytes.to_vec()),
            }
        };

        let updated = self.store.update(&subscription_key(id), &apply).await?;
        if !applied.load(Ordering::SeqCst) {
            return Ok(None);
        }
        updated.map(|bytes| decode(&bytes)).transpose()
    }

    /// Confirm the pending call with `request_id`, received on `connection_id`
    ///
    /// Returns `None` if the record is gone or has moved on to another call.
    pub async fn confirm(
        &self,
        id: &SubscriptionId,
        request_id: u64,
        rpc_subscription_id: u64,
        connection_id: &ConnectionId,
    ) -> Result<Option<SubscriptionRecord>> {
        self.update(id, |record| {
            if !record.is_pending() || record.request_id != request_id {
                return false;
            }
            record.confirm(rpc_subscription_id);
            record.connection_id = Some(connection_id.clone());
            true
        })
        .await
    }

    pub async fn list(&self) -> Result<Vec<SubscriptionRecord>> {
        self.store
            .scan_prefix(SUBSCRIPTION_PREFIX)
            .await?
            .into_iter()
            .map(|(_, bytes)| decode(&bytes))
            .collect()
    }

    pub async fn list_by_network(&self, network: &Network) -> Result<Vec<SubscriptionRecord>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|record| &record.network == network)
            .collect())
    }

    /// Pending record whose outstanding call has this request id
    pub async fn find_pending_by_request(&self, request_id: u64) -> Result<Option<SubscriptionRecord>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|record| record.is_pending() && record.request_id == request_id))
    }

    /// Confirmed record for a server id on a given socket
    ///
    /// Server ids are only unique per connection, so the lookup is scoped.
    pub async fn find_confirmed(
        &self,
        connection_id: &ConnectionId,
        rpc_subscription_id: u64,
    ) -> Result<Option<SubscriptionRecord>> {
        Ok(self.list().await?.into_iter().find(|record| {
            record.is_confirmed()
                && record.rpc_subscription_id == Some(rpc_subscription_id)
                && record.connection_id.as_ref() == Some(connection_id)
        }))
    }

    pub async fn has_pending(&self, network: &Network) -> Result<bool> {
        Ok(self
            .list()
            .await?
            .iter()
            .any(|record| record.is_pending() && &record.network == network))
    }

    /// Drop every subscription record; the request id counter is kept
    pub async fn clear(&self) -> Result<usize> {
        self.store.clear_prefix(SUBSCRIPTION_PREFIX).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SledRecordStore;
    use serde_json::json;

    fn repository() -> SubscriptionRepository {
        SubscriptionRepository::new(Arc::new(SledRecordStore::temporary().unwrap()))
    }

    fn pending(id: &str, request_id: u64, network: &str) -> SubscriptionRecord {
        SubscriptionRecord::pending(
            id.into(),
            request_id,
            "signatureSubscribe",
            "signatureUnsubscribe",
            vec![json!("sig123"), json!({"commitment": "confirmed"})],
            network.into(),
        )
    }

    #[tokio::test]
    async fn test_request_ids_increase() {
        let repo = repository();
        assert_eq!(repo.next_request_id().await.unwrap(), 1);
        assert_eq!(repo.next_request_id().await.unwrap(), 2);
        assert_eq!(repo.next_request_id().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_request_ids_are_unique() {
        let repo = repository();
        let handles: Vec<_> = (0..20)
            .map(|_| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.next_request_id().await.unwrap() })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 20);
    }

    #[tokio::test]
    async fn test_confirm_matches_request_id() {
        let repo = repository();
        let record = pending("sub-1", 4, "mainnet");
        repo.save(&record).await.unwrap();

        let conn = ConnectionId::from("conn-1");

        assert!(repo.confirm(&record.id, 3, 99, &conn).await.unwrap().is_none());

        let confirmed = repo.confirm(&record.id, 4, 99, &conn).await.unwrap().unwrap();
        assert!(confirmed.is_confirmed());
        assert_eq!(confirmed.rpc_subscription_id, Some(99));
        assert_eq!(confirmed.connection_id, Some(conn.clone()));

        // A duplicate confirmation does not apply twice
        assert!(repo.confirm(&record.id, 4, 100, &conn).await.unwrap().is_none());
        let stored = repo.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.rpc_subscription_id, Some(99));
    }

    #[tokio::test]
    async fn test_find_confirmed_is_connection_scoped() {
        let repo = repository();
        let mut first = pending("sub-1", 1, "mainnet");
        first.connection_id = Some("conn-1".into());
        first.confirm(555);
        let mut second = pending("sub-2", 2, "mainnet");
        second.connection_id = Some("conn-2".into());
        second.confirm(555);
        repo.save(&first).await.unwrap();
        repo.save(&second).await.unwrap();

        let found = repo.find_confirmed(&"conn-2".into(), 555).await.unwrap().unwrap();
        assert_eq!(found.id, second.id);
        assert!(repo.find_confirmed(&"conn-3".into(), 555).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pending_lookups() {
        let repo = repository();
        repo.save(&pending("sub-1", 10, "mainnet")).await.unwrap();

        assert!(repo.find_pending_by_request(10).await.unwrap().is_some());
        assert!(repo.find_pending_by_request(11).await.unwrap().is_none());
        assert!(repo.has_pending(&"mainnet".into()).await.unwrap());
        assert!(!repo.has_pending(&"devnet".into()).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let repo = repository();
        let result = repo.update(&"nope".into(), |_| true).await.unwrap();
        assert!(result.is_none());
        assert!(repo.get(&"nope".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_network_and_clear() {
        let repo = repository();
        repo.save(&pending("sub-1", 1, "mainnet")).await.unwrap();
        repo.save(&pending("sub-2", 2, "devnet")).await.unwrap();
        repo.save(&pending("sub-3", 3, "mainnet")).await.unwrap();

        assert_eq!(repo.list_by_network(&"mainnet".into()).await.unwrap().len(), 2);

        assert_eq!(repo.clear().await.unwrap(), 3);
        assert!(repo.list().await.unwrap().is_empty());
        assert_eq!(repo.next_request_id().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_returns_record() {
        let repo = repository();
        let record = pending("sub-1", 1, "mainnet");
        repo.save(&record).await.unwrap();

        assert_eq!(repo.delete(&record.id).await.unwrap(), Some(record.clone()));
        assert_eq!(repo.delete(&record.id).await.unwrap(), None);
    }
}
