//! Error types for riverlog client operations.
//!
//! This module defines all possible errors that can occur on the producer
//! write path and during shard routing. Errors are categorized by where they
//! surface so callers can tell a local contract violation from a failed
//! network operation.
//!
//! ## Error Handling Strategy
//!
//! - **Synchronous, local**: `InvalidRecord`, `Config` — rejected before any
//!   record is buffered.
//! - **Synchronous, bounded**: `Timeout`, `ProducerStopped` — the append
//!   handshake with the producer did not complete.
//! - **Asynchronous, batch-scoped**: `AppendFailed` — one ordering key's
//!   dispatch failed; other ordering keys are unaffected.
//! - **Routing**: `ListShardsFailed`, `ShardRouting` — surfaced to the caller
//!   of `choose_shard`; the cached shard table is preserved.
//!
//! There is no automatic retry anywhere in this crate. Retry and backoff are
//! an application-level policy layered on top.
//!
//! ## Examples
//!
//! ```ignore
//! use riverlog_client::{ClientError, Producer};
//!
//! match producer.append(record).await {
//!     Ok(handle) => { /* await handle.wait_id() later */ }
//!     Err(ClientError::InvalidRecord(reason)) => {
//!         eprintln!("record rejected: {}", reason);
//!     }
//!     Err(ClientError::Timeout(d)) => {
//!         eprintln!("producer did not accept the record within {:?}", d);
//!     }
//!     Err(e) => eprintln!("error: {}", e),
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

/// Convenience type alias for `Result<T, ClientError>`.
///
/// This is the standard Result type used throughout the client library.
/// All public APIs return this type for consistent error handling.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Error type for riverlog producer and shard-routing operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Record failed validation before buffering.
    ///
    /// A `Json`-typed record must carry a payload that parses as JSON.
    /// Validation happens in `append` before the record reaches the
    /// producer's buffer, so a rejected record is never partially accepted.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// The append or flush handshake with the producer did not complete
    /// within the configured bound.
    ///
    /// The producer processes requests through a serialized queue. If the
    /// queue stays full or the acknowledgement does not arrive in time, the
    /// caller gets this error instead of blocking indefinitely. The record
    /// may or may not have been buffered; callers that need certainty should
    /// treat delivery as at-least-once and rely on the result handle.
    #[error("Producer request timed out after {0:?}")]
    Timeout(Duration),

    /// The producer has been stopped and no longer accepts requests.
    #[error("Producer is stopped")]
    ProducerStopped,

    /// The network append for one ordering key's batch failed.
    ///
    /// Affects only the handles in that batch. Batches for other ordering
    /// keys flushed in the same cycle are dispatched independently. The
    /// producer does not retry; the cause string carries the collaborator's
    /// error message.
    #[error("Append to stream '{stream}' failed: {cause}")]
    AppendFailed { stream: String, cause: String },

    /// Fetching the shard table for a stream failed.
    ///
    /// Surfaced by `choose_shard` when a due refresh fails. The previously
    /// cached shard table is kept and the refresh is retried on the next
    /// call rather than internally.
    #[error("Listing shards for stream '{stream}' failed: {cause}")]
    ListShardsFailed { stream: String, cause: String },

    /// The cached shard table does not cover the computed digest with
    /// exactly one shard.
    ///
    /// The shard table is expected to partition the full 128-bit hash space
    /// into non-overlapping closed intervals. Zero or multiple matches means
    /// the cached topology is inconsistent; routing refuses to guess.
    #[error("Shard routing error: {0}")]
    ShardRouting(String),

    /// Invalid producer or key-manager configuration.
    ///
    /// Returned at construction time, for example when a `BatchSetting` is
    /// created with no limit set at all.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The stream service collaborator reported a transport-level failure.
    ///
    /// `StreamService` implementations use this variant to carry their own
    /// error messages across the trait boundary.
    #[error("Stream service error: {0}")]
    Service(String),

    /// `wait_id()` was called twice on the same append result.
    #[error("Record id already consumed")]
    IdAlreadyConsumed,

    /// Internal error that shouldn't normally occur.
    #[error("Internal error: {0}")]
    Internal(String),
}
