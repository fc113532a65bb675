//! riverlog client - the write path for an append-only log store
//!
//! This crate provides the client-side write path for riverlog streams: a
//! batching [`Producer`] that accumulates records and dispatches them in
//! per-ordering-key batches, and a [`ShardKeyManager`] that routes
//! partitioning keys to shards over consistent 128-bit hash ranges.
//!
//! The wire-level RPC client is not part of this crate; it is consumed
//! through the [`StreamService`] trait.
//!
//! # Examples
//!
//! ## Producer
//!
//! ```ignore
//! use riverlog_client::{Producer, ProducerConfig, Record};
//!
//! let config = ProducerConfig::builder()
//!     .server_url("riverlog://node-1:6570")
//!     .stream("orders")
//!     .record_count_limit(100)
//!     .age_limit(std::time::Duration::from_millis(100))
//!     .build()?;
//!
//! let producer = Producer::start(config, service)?;
//!
//! let mut handle = producer
//!     .append(Record::raw(b"order data".as_ref()).with_ordering_key("user-1"))
//!     .await?;
//! let record_id = handle.wait_id().await?;
//! ```
//!
//! ## Shard routing
//!
//! ```ignore
//! use riverlog_client::ShardKeyManager;
//!
//! let mut manager = ShardKeyManager::new(service, "orders");
//! let shard_id = manager.choose_shard("user-1").await?;
//! ```

pub mod batch;
pub mod error;
pub mod producer;
pub mod record;
pub mod service;
pub mod shard;

pub use batch::BatchBuffer;
pub use error::{ClientError, Result};
pub use producer::{AppendResult, Producer, ProducerConfig, ProducerConfigBuilder};
pub use record::{BatchSetting, PayloadType, Record, RecordHeader, RecordId};
pub use service::{AppendRecord, StreamService};
pub use shard::{
    hash_partitioning_key, route, Shard, ShardKeyManager, DEFAULT_SHARD_UPDATE_INTERVAL,
};
