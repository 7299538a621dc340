//! Durable state for chainsub
//!
//! The subscription manager cannot assume its process survives between
//! invocations, so connection and subscription state lives here rather
//! than in memory:
//!
//! - **RecordStore**: string-keyed byte storage (sled in production)
//! - **ConnectionRepository**: one record per network, indexed by socket id
//! - **SubscriptionRepository**: subscription records plus the durable
//!   request id counter
//!
//! # Example
//!
//! ```rust,no_run
//! use chainsub_store::{SledRecordStore, SubscriptionRepository};
//! use std::sync::Arc;
//!
//! # async fn example() -> chainsub_core::Result<()> {
//! let store = Arc::new(SledRecordStore::open("./data/chainsub.db")?);
//! let subscriptions = SubscriptionRepository::new(store);
//! let request_id = subscriptions.next_request_id().await?;
//! # Ok(())
//! # }
//! ```

mod connection_repository;
mod records;
mod store;
mod subscription_repository;

pub use connection_repository::ConnectionRepository;
pub use records::{ConnectionRecord, SubscriptionRecord, SubscriptionStatus};
pub use store::{RecordStore, SledRecordStore, UpdateFn};
pub use subscription_repository::SubscriptionRepository;
