//! Connection records, addressable by network and by socket id
//!
//! Layout:
//!
//! - `connection:network:{network}` → bincode [`ConnectionRecord`]
//! - `connection:id:{id}` → network name (UTF-8)
//!
//! The network key is the source of truth; the id key is an index that is
//! always verified against it on lookup.

use crate::records::{decode, encode, ConnectionRecord};
use crate::store::RecordStore;
use chainsub_core::{ConnectionId, Network, Result};
use std::sync::Arc;

const NETWORK_PREFIX: &str = "connection:network:";
const ID_PREFIX: &str = "connection:id:";

fn network_key(network: &Network) -> String {
    format!("{}{}", NETWORK_PREFIX, network)
}

fn id_key(id: &ConnectionId) -> String {
    format!("{}{}", ID_PREFIX, id)
}

/// CRUD over [`ConnectionRecord`]s
#[derive(Clone)]
pub struct ConnectionRepository {
    store: Arc<dyn RecordStore>,
}

impl ConnectionRepository {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Register a connection, replacing any previous one for the network
    pub async fn save(&self, record: &ConnectionRecord) -> Result<()> {
        if let Some(previous) = self.get_by_network(&record.network).await? {
            if previous.id != record.id {
                self.store.remove(&id_key(&previous.id)).await?;
            }
        }
        self.store
            .set(&network_key(&record.network), encode(record)?)
            .await?;
        self.store
            .set(&id_key(&record.id), record.network.as_str().as_bytes().to_vec())
            .await
    }

    pub async fn get_by_network(&self, network: &Network) -> Result<Option<ConnectionRecord>> {
        match self.store.get(&network_key(network)).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn get_by_id(&self, id: &ConnectionId) -> Result<Option<ConnectionRecord>> {
        let Some(network) = self.store.get(&id_key(id)).await? else {
            return Ok(None);
        };
        let network = Network::from(String::from_utf8_lossy(&network).into_owned());
        Ok(self
            .get_by_network(&network)
            .await?
            .filter(|record| &record.id == id))
    }

    /// Remove the network's record, returning it
    pub async fn delete_by_network(&self, network: &Network) -> Result<Option<ConnectionRecord>> {
        let Some(bytes) = self.store.remove(&network_key(network)).await? else {
            return Ok(None);
        };
        let record: ConnectionRecord = decode(&bytes)?;
        self.store.remove(&id_key(&record.id)).await?;
        Ok(Some(record))
    }

    /// Remove the record for this socket
    ///
    /// A record that has since been replaced by a newer socket for the same
    /// network is left alone.
    pub async fn delete_by_id(&self, id: &ConnectionId) -> Result<Option<ConnectionRecord>> {
        match self.get_by_id(id).await? {
            Some(record) => self.delete_by_network(&record.network).await,
            None => {
                self.store.remove(&id_key(id)).await?;
                Ok(None)
            }
        }
    }

    pub async fn list(&self) -> Result<Vec<ConnectionRecord>> {
        self.store
            .scan_prefix(NETWORK_PREFIX)
            .await?
            .into_iter()
            .map(|(_, bytes)| decode(&bytes))
            .collect()
    }

    /// Drop every connection record
    pub async fn clear(&self) -> Result<usize> {
        self.store.clear_prefix(ID_PREFIX).await?;
        self.store.clear_prefix(NETWORK_PREFIX).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SledRecordStore;

    fn repository() -> ConnectionRepository {
        ConnectionRepository::new(Arc::new(SledRecordStore::temporary().unwrap()))
    }

    fn record(id: &str, network: &str) -> ConnectionRecord {
        ConnectionRecord::new(id.into(), network.into(), format!("wss://{}.example", network))
    }

    #[tokio::test]
    async fn test_lookup_by_network_and_id() {
        let repo = repository();
        repo.save(&record("conn-1", "mainnet")).await.unwrap();

        let by_network = repo.get_by_network(&"mainnet".into()).await.unwrap().unwrap();
        let by_id = repo.get_by_id(&"conn-1".into()).await.unwrap().unwrap();
        assert_eq!(by_network, by_id);
        assert_eq!(by_id.url, "wss://mainnet.example");
    }

    #[tokio::test]
    async fn test_save_replaces_previous_socket() {
        let repo = repository();
        repo.save(&record("conn-1", "mainnet")).await.unwrap();
        repo.save(&record("conn-2", "mainnet")).await.unwrap();

        assert!(repo.get_by_id(&"conn-1".into()).await.unwrap().is_none());
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_stale_id_keeps_newer_record() {
        let repo = repository();
        repo.save(&record("conn-1", "mainnet")).await.unwrap();
        repo.save(&record("conn-2", "mainnet")).await.unwrap();

        assert!(repo.delete_by_id(&"conn-1".into()).await.unwrap().is_none());
        assert!(repo.get_by_network(&"mainnet".into()).await.unwrap().is_some());

        assert!(repo.delete_by_id(&"conn-2".into()).await.unwrap().is_some());
        assert!(repo.get_by_network(&"mainnet".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let repo = repository();
        repo.save(&record("conn-1", "devnet")).await.unwrap();

        assert!(repo.delete_by_network(&"devnet".into()).await.unwrap().is_some());
        assert!(repo.delete_by_network(&"devnet".into()).await.unwrap().is_none());
        assert!(repo.get_by_id(&"conn-1".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear() {
        let repo = repository();
        repo.save(&record("conn-1", "mainnet")).await.unwrap();
        repo.save(&record("conn-2", "devnet")).await.unwrap();

        assert_eq!(repo.clear().await.unwrap(), 2);
        assert!(repo.list().await.unwrap().is_empty());
        assert!(repo.get_by_id(&"conn-2".into()).await.unwrap().is_none());
    }
}
