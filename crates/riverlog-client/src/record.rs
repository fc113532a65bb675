//! Record types and batch limits for the riverlog producer.
//!
//! A [`Record`] is the unit a caller hands to the producer: a byte payload,
//! a payload type flag, and an ordering key that decides which records are
//! co-batched and dispatched together. [`BatchSetting`] holds the flush
//! limits a producer enforces; at least one limit must be set.
//!
//! Payloads are `bytes::Bytes` so the buffered record, the flushed snapshot,
//! and the dispatch task all share one allocation.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{ClientError, Result};

/// Payload type of a record, carried to the server as a header flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadType {
    /// Opaque bytes; never inspected by the client.
    Raw,
    /// JSON document; validated before buffering.
    Json,
}

impl PayloadType {
    /// Header flag value sent on the wire.
    pub fn flag(self) -> u8 {
        match self {
            PayloadType::Raw => 0,
            PayloadType::Json => 1,
        }
    }
}

/// A record to be appended to a stream.
///
/// Records are immutable once constructed. The ordering key defaults to the
/// empty string, so records appended without a key are all batched together.
///
/// # Examples
///
/// ```ignore
/// use riverlog_client::Record;
///
/// // Opaque payload, default ordering key
/// let r = Record::raw(b"event data".as_ref());
///
/// // JSON payload routed by user id
/// let r = Record::json(br#"{"user":"u1","amount":3}"#.as_ref())?
///     .with_ordering_key("u1");
/// ```
#[derive(Debug, Clone)]
pub struct Record {
    payload_type: PayloadType,
    payload: Bytes,
    ordering_key: String,
}

impl Record {
    /// Create a record with an opaque byte payload.
    pub fn raw(payload: impl Into<Bytes>) -> Self {
        Self {
            payload_type: PayloadType::Raw,
            payload: payload.into(),
            ordering_key: String::new(),
        }
    }

    /// Create a record with a JSON payload.
    ///
    /// # Errors
    ///
    /// `InvalidRecord` if the payload does not parse as JSON.
    pub fn json(payload: impl Into<Bytes>) -> Result<Self> {
        let record = Self {
            payload_type: PayloadType::Json,
            payload: payload.into(),
            ordering_key: String::new(),
        };
        record.validate()?;
        Ok(record)
    }

    /// Set the ordering key. Records sharing an ordering key are batched
    /// and dispatched together as one network call.
    pub fn with_ordering_key(mut self, key: impl Into<String>) -> Self {
        self.ordering_key = key.into();
        self
    }

    /// Check the payload against the declared payload type.
    ///
    /// Called by the producer before buffering, so a bad record is rejected
    /// synchronously and never occupies the batch.
    pub fn validate(&self) -> Result<()> {
        match self.payload_type {
            PayloadType::Raw => Ok(()),
            PayloadType::Json => {
                serde_json::from_slice::<serde_json::Value>(&self.payload).map_err(|e| {
                    ClientError::InvalidRecord(format!("payload is not valid JSON: {e}"))
                })?;
                Ok(())
            }
        }
    }

    /// Payload type of this record.
    pub fn payload_type(&self) -> PayloadType {
        self.payload_type
    }

    /// Ordering key of this record. Empty string is the default key.
    pub fn ordering_key(&self) -> &str {
        &self.ordering_key
    }

    /// Payload size in bytes, as counted against the producer's byte limit.
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Consume the record, returning its payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

/// Per-record header built at dispatch time.
///
/// The publish timestamp is taken from the wall clock when the batch is
/// dispatched, not when the record was appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordHeader {
    /// Flag derived from the record's payload type.
    pub flag: u8,
    /// Publish time, seconds since the Unix epoch.
    pub publish_time_secs: u64,
    /// Publish time, nanosecond remainder.
    pub publish_time_nanos: u32,
    /// Ordering key the record was batched under.
    pub ordering_key: String,
}

impl RecordHeader {
    /// Build a header for a record being dispatched now.
    pub fn new(payload_type: PayloadType, ordering_key: String) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            flag: payload_type.flag(),
            publish_time_secs: now.as_secs(),
            publish_time_nanos: now.subsec_nanos(),
            ordering_key,
        }
    }
}

/// Identifier assigned to an appended record by the server.
///
/// Opaque to this crate beyond display formatting; returned through the
/// append result handle once the record's batch has been acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    /// Shard the record landed on.
    pub shard_id: u64,
    /// Server-assigned batch identifier.
    pub batch_id: u64,
    /// Position of the record within its batch.
    pub batch_index: u32,
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.shard_id, self.batch_id, self.batch_index)
    }
}

/// Flush limits for a producer's batch buffer.
///
/// A flush is triggered when the buffered record count reaches
/// `record_count_limit`, when the buffered payload bytes reach `bytes_limit`,
/// or periodically every `age_limit`. Any subset of limits may be set, but
/// at least one is required; a producer with no flush trigger would buffer
/// forever.
///
/// # Examples
///
/// ```ignore
/// use riverlog_client::BatchSetting;
/// use std::time::Duration;
///
/// // Flush every 100 records or 64 KiB, whichever comes first
/// let setting = BatchSetting::new(Some(100), Some(64 * 1024), None)?;
///
/// // Flush on a timer only
/// let setting = BatchSetting::new(None, None, Some(Duration::from_millis(100)))?;
///
/// // Rejected: no limit at all
/// assert!(BatchSetting::new(None, None, None).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct BatchSetting {
    record_count_limit: Option<usize>,
    bytes_limit: Option<usize>,
    age_limit: Option<Duration>,
}

impl BatchSetting {
    /// Create a batch setting.
    ///
    /// # Errors
    ///
    /// `Config` if every limit is `None`, or if a set limit is zero.
    pub fn new(
        record_count_limit: Option<usize>,
        bytes_limit: Option<usize>,
        age_limit: Option<Duration>,
    ) -> Result<Self> {
        if record_count_limit.is_none() && bytes_limit.is_none() && age_limit.is_none() {
            return Err(ClientError::Config(
                "batch setting requires at least one of record count, bytes, or age limit"
                    .to_string(),
            ));
        }
        if record_count_limit == Some(0) || bytes_limit == Some(0) {
            return Err(ClientError::Config(
                "batch limits must be greater than zero".to_string(),
            ));
        }
        if age_limit == Some(Duration::ZERO) {
            return Err(ClientError::Config(
                "batch age limit must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            record_count_limit,
            bytes_limit,
            age_limit,
        })
    }

    /// Maximum buffered records before a flush is triggered.
    pub fn record_count_limit(&self) -> Option<usize> {
        self.record_count_limit
    }

    /// Maximum buffered payload bytes before a flush is triggered.
    pub fn bytes_limit(&self) -> Option<usize> {
        self.bytes_limit
    }

    /// Interval of the periodic age-based flush.
    pub fn age_limit(&self) -> Option<Duration> {
        self.age_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_setting_requires_a_limit() {
        assert!(matches!(
            BatchSetting::new(None, None, None),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn test_batch_setting_rejects_zero_limits() {
        assert!(BatchSetting::new(Some(0), None, None).is_err());
        assert!(BatchSetting::new(None, Some(0), None).is_err());
        assert!(BatchSetting::new(None, None, Some(Duration::ZERO)).is_err());
    }

    #[test]
    fn test_batch_setting_single_limit_is_enough() {
        let setting = BatchSetting::new(Some(10), None, None).unwrap();
        assert_eq!(setting.record_count_limit(), Some(10));
        assert_eq!(setting.bytes_limit(), None);
        assert_eq!(setting.age_limit(), None);
    }

    #[test]
    fn test_record_defaults_to_empty_ordering_key() {
        let record = Record::raw(Bytes::from("payload"));
        assert_eq!(record.ordering_key(), "");
        assert_eq!(record.payload_type(), PayloadType::Raw);
        assert_eq!(record.payload_len(), 7);
    }

    #[test]
    fn test_json_record_validation() {
        assert!(Record::json(Bytes::from(r#"{"a":1}"#)).is_ok());
        assert!(matches!(
            Record::json(Bytes::from("not json")),
            Err(ClientError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_header_flag_follows_payload_type() {
        let raw = RecordHeader::new(PayloadType::Raw, String::new());
        let json = RecordHeader::new(PayloadType::Json, "key".to_string());
        assert_eq!(raw.flag, 0);
        assert_eq!(json.flag, 1);
        assert_eq!(json.ordering_key, "key");
        assert!(raw.publish_time_secs > 0);
    }

    #[test]
    fn test_record_id_display() {
        let id = RecordId {
            shard_id: 3,
            batch_id: 17,
            batch_index: 2,
        };
        assert_eq!(id.to_string(), "3-17-2");
    }
}
