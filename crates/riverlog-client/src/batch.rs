//! Batch buffer for the riverlog producer.
//!
//! Pending records are grouped by ordering key so that one flush turns into
//! one network call per key. The buffer is a pure data structure: it never
//! decides when to flush and performs no I/O. The producer actor owns it,
//! mutates it from serialized requests only, and replaces it wholesale on
//! every flush.
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  BatchBuffer                                │
//! ├─────────────────────────────────────────────┤
//! │  records_by_key: HashMap<key, Vec<Pending>> │
//! │  record_count:   usize                      │
//! │  total_bytes:    usize                      │
//! └─────────────────────────────────────────────┘
//!       │
//!       ├─→ ""       → [r1, r4]        default-key records co-batched
//!       ├─→ "user-a" → [r2, r3, r5]    FIFO within a key
//!       └─→ "user-b" → [r6]
//! ```
//!
//! Records are appended at the tail of their key's list, so dispatch emits
//! them in append order.

use std::collections::HashMap;
use tokio::sync::oneshot;
use tracing::trace;

use crate::record::{Record, RecordId};

/// A buffered record paired with the sender half of its result handle.
///
/// The receiver half was returned to the caller by `append`. The dispatch
/// task resolves the sender with the server-assigned record id, or drops it
/// when the batch fails.
pub(crate) struct PendingRecord {
    pub(crate) record: Record,
    pub(crate) id_tx: oneshot::Sender<RecordId>,
}

/// Buffer of pending records, grouped by ordering key.
///
/// # Invariants
///
/// - `record_count` equals the sum of list lengths across all keys.
/// - `total_bytes` equals the sum of payload byte lengths across all keys.
///
/// Both counters are maintained on `append` and reset by `take`.
#[derive(Default)]
pub struct BatchBuffer {
    records_by_key: HashMap<String, Vec<PendingRecord>>,
    record_count: usize,
    total_bytes: usize,
}

impl BatchBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pending record at the tail of its ordering key's list.
    pub(crate) fn append(&mut self, pending: PendingRecord) {
        self.record_count += 1;
        self.total_bytes += pending.record.payload_len();
        self.records_by_key
            .entry(pending.record.ordering_key().to_string())
            .or_default()
            .push(pending);
        trace!(
            record_count = self.record_count,
            total_bytes = self.total_bytes,
            "buffered record"
        );
    }

    /// Take the whole buffer contents, leaving the buffer empty.
    ///
    /// This is the flush handoff: the returned map is the snapshot handed to
    /// dispatch, and the buffer the actor keeps is reset in the same step so
    /// concurrent appends land in a fresh buffer.
    pub(crate) fn take(&mut self) -> HashMap<String, Vec<PendingRecord>> {
        self.record_count = 0;
        self.total_bytes = 0;
        std::mem::take(&mut self.records_by_key)
    }

    /// Number of buffered records across all ordering keys.
    pub fn record_count(&self) -> usize {
        self.record_count
    }

    /// Total payload bytes across all ordering keys.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Whether the buffer holds no records.
    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }
}
