//! Shard routing: 128-bit hash ranges and the cached shard table.
//!
//! Each stream is partitioned into shards, and each shard owns a contiguous
//! closed interval of the 128-bit hash space. Routing a record is a pure
//! computation: hash the partitioning key to a 128-bit digest, then find the
//! unique shard whose interval contains it.
//!
//! ```text
//!   digest = sip128(partitioning_key)
//!
//!   0 ────────────────┬─────────────────┬──────────────── 2^128-1
//!   │    shard 1      │     shard 2     │     shard 3    │
//!   └─────────────────┴────────┬────────┴────────────────┘
//!                              │
//!                       digest lands here → shard 2
//! ```
//!
//! [`ShardKeyManager`] wraps the pure router with a cached shard table for
//! one stream. The cache is refreshed lazily: a routing call that finds the
//! refresh deadline passed fetches the table once and extends the deadline;
//! a failed fetch keeps the stale table and is retried by the next call.

use serde::{Deserialize, Serialize};
use siphasher::sip128::{Hasher128, SipHasher24};
use std::hash::Hasher;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};
use crate::service::StreamService;

/// Default shard table refresh interval (3,000,000 ms).
pub const DEFAULT_SHARD_UPDATE_INTERVAL: Duration = Duration::from_millis(3_000_000);

/// One shard of a stream: a contiguous closed interval of the 128-bit hash
/// space.
///
/// The set of shards for a stream is assumed to partition `[0, 2^128)`;
/// this crate checks the assumption per lookup and refuses to route when it
/// does not hold, but never repairs the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    /// Shard identifier, unique within the stream.
    pub shard_id: u64,
    /// Inclusive lower bound of the owned hash range.
    pub start_hash_key: u128,
    /// Inclusive upper bound of the owned hash range.
    pub end_hash_key: u128,
}

impl Shard {
    /// Whether `digest` falls inside this shard's closed interval.
    pub fn contains(&self, digest: u128) -> bool {
        self.start_hash_key <= digest && digest <= self.end_hash_key
    }
}

/// Hash a partitioning key to its 128-bit routing digest.
///
/// SipHash-2-4 in its 128-bit variant with fixed zero keys: deterministic
/// across processes and uniformly distributed, so equal keys always route to
/// the same shard while distinct keys spread over the full hash space.
pub fn hash_partitioning_key(partitioning_key: &str) -> u128 {
    let mut hasher = SipHasher24::new_with_keys(0, 0);
    hasher.write(partitioning_key.as_bytes());
    hasher.finish128().as_u128()
}

/// Route a digest to the unique shard owning it.
///
/// # Errors
///
/// `ShardRouting` when zero or more than one shard contains the digest.
/// Either case means the shard table is inconsistent; picking a shard
/// silently would misplace the record.
pub fn route(shards: &[Shard], digest: u128) -> Result<u64> {
    let mut owner: Option<u64> = None;
    for shard in shards {
        if shard.contains(digest) {
            if let Some(previous) = owner {
                return Err(ClientError::ShardRouting(format!(
                    "digest {digest:#x} matched shards {previous} and {}",
                    shard.shard_id
                )));
            }
            owner = Some(shard.shard_id);
        }
    }
    owner.ok_or_else(|| {
        ClientError::ShardRouting(format!(
            "digest {digest:#x} matched no shard in a table of {}",
            shards.len()
        ))
    })
}

/// Cached shard table for one stream, with lazy refresh.
///
/// The manager is single-writer: `choose_shard` takes `&mut self`, so a
/// shared instance must be behind the caller's own serialization (the same
/// actor or lock discipline the producer uses).
///
/// # Examples
///
/// ```ignore
/// use riverlog_client::ShardKeyManager;
///
/// let mut manager = ShardKeyManager::new(service, "orders");
/// let shard_id = manager.choose_shard("user-123").await?;
/// ```
pub struct ShardKeyManager {
    service: Arc<dyn StreamService>,
    stream: String,
    /// Immutable snapshot, replaced wholesale on refresh.
    shards: Option<Arc<Vec<Shard>>>,
    refresh_at: Instant,
    refresh_interval: Duration,
}

impl ShardKeyManager {
    /// Create a manager with the default refresh interval.
    ///
    /// The first `choose_shard` call fetches the shard table; nothing is
    /// cached up front.
    pub fn new(service: Arc<dyn StreamService>, stream: impl Into<String>) -> Self {
        Self::with_refresh_interval(service, stream, DEFAULT_SHARD_UPDATE_INTERVAL)
    }

    /// Create a manager with a custom refresh interval.
    pub fn with_refresh_interval(
        service: Arc<dyn StreamService>,
        stream: impl Into<String>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            service,
            stream: stream.into(),
            shards: None,
            refresh_at: Instant::now(),
            refresh_interval,
        }
    }

    /// Stream this manager routes for.
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Choose the shard owning `partitioning_key`.
    ///
    /// Refreshes the cached shard table first when the refresh deadline has
    /// passed, then hashes the key and scans for the owning range.
    ///
    /// # Errors
    ///
    /// - `ListShardsFailed`: a due refresh failed. The stale table is kept
    ///   and the refresh retried on the next call, not internally.
    /// - `ShardRouting`: the cached table does not contain exactly one owner
    ///   for the digest.
    pub async fn choose_shard(&mut self, partitioning_key: &str) -> Result<u64> {
        if self.shards.is_none() || Instant::now() >= self.refresh_at {
            self.refresh().await?;
        }
        let shards = self
            .shards
            .clone()
            .ok_or_else(|| ClientError::Internal("shard table missing after refresh".into()))?;

        let digest = hash_partitioning_key(partitioning_key);
        route(&shards, digest)
    }

    /// Fetch the shard table and extend the refresh deadline.
    ///
    /// On failure the cache and deadline are left untouched, so the next
    /// routing call attempts the refresh again.
    async fn refresh(&mut self) -> Result<()> {
        match self.service.list_shards(&self.stream).await {
            Ok(shards) => {
                debug!(
                    stream = %self.stream,
                    shard_count = shards.len(),
                    "refreshed shard table"
                );
                self.shards = Some(Arc::new(shards));
                self.refresh_at = Instant::now() + self.refresh_interval;
                Ok(())
            }
            Err(e) => {
                warn!(stream = %self.stream, error = %e, "failed to refresh shard table");
                Err(ClientError::ListShardsFailed {
                    stream: self.stream.clone(),
                    cause: e.to_string(),
                })
            }
        }
    }
}
