//! Abstract stream service consumed by the producer and shard router.
//!
//! The client core performs no wire I/O itself. The two operations it needs,
//! appending a batch of records and listing a stream's shards, are behind
//! the [`StreamService`] trait and consumed as `Arc<dyn StreamService>`.
//! The RPC client of a real deployment implements this trait; tests
//! substitute an in-process mock.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::record::{RecordHeader, RecordId};
use crate::shard::Shard;

/// One record as handed to the stream service: dispatch-time header plus
/// the payload bytes.
#[derive(Debug, Clone)]
pub struct AppendRecord {
    /// Header built when the batch was dispatched.
    pub header: RecordHeader,
    /// Record payload.
    pub payload: Bytes,
}

/// Operations the client core requires from the surrounding RPC layer.
///
/// Implementations own connection and channel lifecycle; the core never
/// sees them. Both operations may be called concurrently from multiple
/// dispatch tasks.
#[async_trait]
pub trait StreamService: Send + Sync {
    /// Append an ordered batch of records to a stream.
    ///
    /// # Contract
    ///
    /// The returned id list must have the same length and order as
    /// `records`; the producer pairs ids with records positionally to
    /// resolve the callers' result handles.
    ///
    /// # Errors
    ///
    /// Any error fails the whole batch. The producer does not retry.
    async fn append_records(
        &self,
        server_url: &str,
        stream: &str,
        records: Vec<AppendRecord>,
    ) -> Result<Vec<RecordId>>;

    /// List the shards of a stream.
    ///
    /// The returned shards are expected to partition the 128-bit hash space
    /// into contiguous, non-overlapping closed intervals.
    async fn list_shards(&self, stream: &str) -> Result<Vec<Shard>>;
}
