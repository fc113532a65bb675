//! Batching producer for riverlog streams.
//!
//! The producer accumulates records client-side and flushes them to the
//! stream service in per-ordering-key batches. All buffer state is owned by
//! a single actor task; callers talk to it over a serialized request queue,
//! so appends, flushes, and timer ticks never observe the buffer
//! mid-mutation and no locking is needed.
//!
//! ```text
//! append(record) ──┐
//! flush() ─────────┼──→ mpsc queue ──→ ┌───────────────────────────┐
//! age ticker ──────┘   (serialized)    │  actor task               │
//!                                      │  - BatchBuffer            │
//!                                      │  - limit checks           │
//!                                      │  - flush snapshot handoff │
//!                                      └──────────┬────────────────┘
//!                                                 │ one task per ordering key
//!                                      ┌──────────┴──────────┐
//!                                      ▼                     ▼
//!                              append_records("a")   append_records("b")
//!                                      │                     │
//!                                      ▼                     ▼
//!                              resolve handles        resolve handles
//! ```
//!
//! ## Flush Triggers
//!
//! A flush drains the whole buffer and is triggered when ANY of these hold:
//! - **Count**: buffered records reach `record_count_limit`
//! - **Bytes**: buffered payload bytes reach `bytes_limit`
//! - **Age**: the periodic age ticker fires (every `age_limit`)
//! - **Manual**: the caller invokes [`Producer::flush`]
//!
//! Limit-triggered flushes happen synchronously inside the append request,
//! before the caller's `append` returns.
//!
//! ## Result delivery
//!
//! Each `append` returns an [`AppendResult`] holding the receiving half of a
//! oneshot channel. The dispatch task for the record's ordering key resolves
//! it with the server-assigned [`RecordId`] by positional pairing with the
//! append response. A failed dispatch drops the batch's senders instead, so
//! waiting callers get `AppendFailed` rather than blocking forever. Dispatch
//! tasks for different ordering keys are fully independent: failure or delay
//! in one is never observed by another.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, trace};

use crate::batch::{BatchBuffer, PendingRecord};
use crate::error::{ClientError, Result};
use crate::record::{BatchSetting, Record, RecordHeader, RecordId};
use crate::service::{AppendRecord, StreamService};

/// Default bound on the append/flush handshake with the actor.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Default capacity of the actor's request queue.
const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Producer configuration.
///
/// Create through [`ProducerConfig::builder`]; the builder applies defaults
/// and rejects invalid combinations at `build()` time.
#[derive(Clone)]
pub struct ProducerConfig {
    /// Server the producer's batches are appended to.
    pub server_url: String,
    /// Stream all records from this producer are appended to.
    pub stream: String,
    /// Flush limits. At least one limit is always set.
    pub batch: BatchSetting,
    /// Bound on the append/flush handshake with the actor.
    pub request_timeout: Duration,
    /// Capacity of the actor's request queue.
    pub queue_capacity: usize,
}

impl ProducerConfig {
    /// Create a new [`ProducerConfigBuilder`] with default settings.
    pub fn builder() -> ProducerConfigBuilder {
        ProducerConfigBuilder::new()
    }
}

/// Builder for [`ProducerConfig`].
///
/// # Required Fields
///
/// - `server_url`, `stream`: destination of every batch
/// - at least one of `record_count_limit`, `bytes_limit`, `age_limit`
///
/// # Examples
///
/// ```ignore
/// use riverlog_client::ProducerConfig;
/// use std::time::Duration;
///
/// let config = ProducerConfig::builder()
///     .server_url("riverlog://node-1:6570")
///     .stream("orders")
///     .record_count_limit(100)
///     .age_limit(Duration::from_millis(100))
///     .build()?;
/// ```
pub struct ProducerConfigBuilder {
    server_url: Option<String>,
    stream: Option<String>,
    record_count_limit: Option<usize>,
    bytes_limit: Option<usize>,
    age_limit: Option<Duration>,
    request_timeout: Duration,
    queue_capacity: usize,
}

impl ProducerConfigBuilder {
    /// Create a builder with default timeout and queue capacity.
    pub fn new() -> Self {
        Self {
            server_url: None,
            stream: None,
            record_count_limit: None,
            bytes_limit: None,
            age_limit: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Set the destination server url (required).
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    /// Set the destination stream (required).
    pub fn stream(mut self, stream: impl Into<String>) -> Self {
        self.stream = Some(stream.into());
        self
    }

    /// Flush when this many records are buffered.
    pub fn record_count_limit(mut self, limit: usize) -> Self {
        self.record_count_limit = Some(limit);
        self
    }

    /// Flush when this many payload bytes are buffered.
    pub fn bytes_limit(mut self, limit: usize) -> Self {
        self.bytes_limit = Some(limit);
        self
    }

    /// Flush on a periodic timer with this interval.
    pub fn age_limit(mut self, limit: Duration) -> Self {
        self.age_limit = Some(limit);
        self
    }

    /// Bound the append/flush handshake with the actor.
    ///
    /// Default: 5 seconds.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Capacity of the actor's request queue.
    ///
    /// Default: 1024.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// `Config` when `server_url` or `stream` is missing, when no flush
    /// limit is set, or when the queue capacity is zero.
    pub fn build(self) -> Result<ProducerConfig> {
        let server_url = self
            .server_url
            .ok_or_else(|| ClientError::Config("server_url is required".to_string()))?;
        let stream = self
            .stream
            .ok_or_else(|| ClientError::Config("stream is required".to_string()))?;
        if self.queue_capacity == 0 {
            return Err(ClientError::Config(
                "queue_capacity must be greater than zero".to_string(),
            ));
        }
        let batch = BatchSetting::new(self.record_count_limit, self.bytes_limit, self.age_limit)?;
        Ok(ProducerConfig {
            server_url,
            stream,
            batch,
            request_timeout: self.request_timeout,
            queue_capacity: self.queue_capacity,
        })
    }
}

impl Default for ProducerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Result handle for one appended record.
///
/// Returned by [`Producer::append`] immediately; resolved by the dispatch
/// task once the record's batch has been acknowledged by the server.
/// Exactly one resolution ever occurs per handle.
///
/// ## Usage Patterns
///
/// **Fire-and-forget**
/// ```ignore
/// let _handle = producer.append(record).await?;
/// ```
///
/// **Wait for the record id**
/// ```ignore
/// let mut handle = producer.append(record).await?;
/// let id = handle.wait_id().await?;
/// println!("appended as {}", id);
/// ```
///
/// There is no built-in wait timeout: a record sits in the buffer until a
/// flush trigger fires, so callers impose their own bound (for example
/// `tokio::time::timeout`) when they need one.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct AppendResult {
    /// Stream the record was appended to.
    pub stream: String,
    /// Ordering key the record was batched under.
    pub ordering_key: String,
    /// Record id, once known. `None` until the batch is dispatched and
    /// acknowledged; use [`AppendResult::wait_id`] to block for it.
    record_id: Option<RecordId>,
    #[serde(skip)]
    id_rx: Option<oneshot::Receiver<RecordId>>,
}

impl AppendResult {
    /// Get the record id if it is already known.
    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    /// Wait until the record's batch is acknowledged and return the id.
    ///
    /// # Errors
    ///
    /// - `AppendFailed`: the batch's dispatch failed, or the producer was
    ///   stopped before the record was dispatched.
    /// - `IdAlreadyConsumed`: `wait_id` was called twice on this handle.
    pub async fn wait_id(&mut self) -> Result<RecordId> {
        if let Some(id) = self.record_id {
            return Ok(id);
        }
        match self.id_rx.take() {
            Some(rx) => match rx.await {
                Ok(id) => {
                    self.record_id = Some(id);
                    Ok(id)
                }
                Err(_) => Err(ClientError::AppendFailed {
                    stream: self.stream.clone(),
                    cause: "batch dispatch failed or producer stopped before dispatch"
                        .to_string(),
                }),
            },
            None => Err(ClientError::IdAlreadyConsumed),
        }
    }
}

/// Requests processed by the actor, strictly one at a time.
enum Request {
    Append {
        record: Record,
        id_tx: oneshot::Sender<RecordId>,
        ack: oneshot::Sender<()>,
    },
    Flush {
        ack: oneshot::Sender<()>,
    },
    Stop {
        ack: oneshot::Sender<()>,
    },
}

/// Batching producer bound to one stream on one server.
///
/// Cheap to share behind an `Arc`; `append` and `flush` take `&self`.
///
/// # Examples
///
/// ```ignore
/// use riverlog_client::{Producer, ProducerConfig, Record};
///
/// let config = ProducerConfig::builder()
///     .server_url("riverlog://node-1:6570")
///     .stream("orders")
///     .record_count_limit(100)
///     .build()?;
/// let producer = Producer::start(config, service)?;
///
/// let mut handle = producer
///     .append(Record::raw(b"order data".as_ref()).with_ordering_key("user-1"))
///     .await?;
/// producer.flush().await?;
/// let id = handle.wait_id().await?;
///
/// producer.stop().await?;
/// ```
pub struct Producer {
    request_tx: mpsc::Sender<Request>,
    /// Handle to the actor task, taken by the first `stop` call.
    actor: Mutex<Option<JoinHandle<()>>>,
    stream: String,
    request_timeout: Duration,
}

impl Producer {
    /// Start a producer: spawn the actor task owning the batch buffer and,
    /// when an age limit is configured, its flush ticker.
    ///
    /// # Errors
    ///
    /// `Config` when the queue capacity is zero.
    pub fn start(config: ProducerConfig, service: Arc<dyn StreamService>) -> Result<Producer> {
        if config.queue_capacity == 0 {
            return Err(ClientError::Config(
                "queue_capacity must be greater than zero".to_string(),
            ));
        }
        let (request_tx, request_rx) = mpsc::channel(config.queue_capacity);
        let stream = config.stream.clone();
        let request_timeout = config.request_timeout;
        let actor = tokio::spawn(run_actor(service, config, request_rx));
        Ok(Producer {
            request_tx,
            actor: Mutex::new(Some(actor)),
            stream,
            request_timeout,
        })
    }

    /// Append a record to the producer's buffer.
    ///
    /// The record is validated, then submitted to the actor's serialized
    /// queue. If buffering crosses a count or byte limit, the flush is
    /// triggered synchronously before this call returns. The returned
    /// handle can be awaited for the server-assigned record id.
    ///
    /// # Errors
    ///
    /// - `InvalidRecord`: payload fails validation; nothing was buffered.
    /// - `Timeout`: the actor handshake did not complete within
    ///   `request_timeout`.
    /// - `ProducerStopped`: the producer was stopped.
    pub async fn append(&self, record: Record) -> Result<AppendResult> {
        record.validate()?;
        let ordering_key = record.ordering_key().to_string();
        let (id_tx, id_rx) = oneshot::channel();
        let (ack_tx, ack_rx) = oneshot::channel();
        self.submit(
            Request::Append {
                record,
                id_tx,
                ack: ack_tx,
            },
            ack_rx,
        )
        .await?;
        Ok(AppendResult {
            stream: self.stream.clone(),
            ordering_key,
            record_id: None,
            id_rx: Some(id_rx),
        })
    }

    /// Append a record and wait until its batch is acknowledged.
    ///
    /// Convenience wrapper around [`Producer::append`] followed by
    /// [`AppendResult::wait_id`]. The id arrives only after a flush trigger
    /// fires for the buffered batch, so with neither an age limit nor
    /// concurrent appends crossing a size limit this call waits until the
    /// next explicit `flush`.
    pub async fn append_and_wait(&self, record: Record) -> Result<RecordId> {
        let mut result = self.append(record).await?;
        result.wait_id().await
    }

    /// Flush the current buffer.
    ///
    /// Returns once the dispatch tasks for the drained buffer are spawned,
    /// not once their network calls complete. Trivially succeeds when the
    /// buffer is empty. Appends arriving while dispatch is in flight land in
    /// the fresh buffer, never in the one being drained.
    pub async fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.submit(Request::Flush { ack: ack_tx }, ack_rx).await
    }

    /// Stop the producer.
    ///
    /// Cancels the age ticker, waits for already-spawned dispatch tasks to
    /// settle, and discards buffered-but-undispatched records; their handles
    /// resolve to `AppendFailed`. Callers that need those records delivered
    /// must `flush` first. Requests after `stop` fail with
    /// `ProducerStopped`. Stopping twice is harmless.
    pub async fn stop(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .request_tx
            .send(Request::Stop { ack: ack_tx })
            .await
            .is_ok()
        {
            let _ = ack_rx.await;
        }
        if let Some(actor) = self.actor.lock().await.take() {
            actor
                .await
                .map_err(|e| ClientError::Internal(format!("producer actor task failed: {e}")))?;
        }
        Ok(())
    }

    /// Submit one request and wait for the actor's acknowledgement, both
    /// bounded by `request_timeout`.
    async fn submit(&self, request: Request, ack_rx: oneshot::Receiver<()>) -> Result<()> {
        match time::timeout(self.request_timeout, self.request_tx.send(request)).await {
            Err(_) => return Err(ClientError::Timeout(self.request_timeout)),
            Ok(Err(_)) => return Err(ClientError::ProducerStopped),
            Ok(Ok(())) => {}
        }
        match time::timeout(self.request_timeout, ack_rx).await {
            Err(_) => Err(ClientError::Timeout(self.request_timeout)),
            Ok(Err(_)) => Err(ClientError::ProducerStopped),
            Ok(Ok(())) => Ok(()),
        }
    }
}

/// Actor task: the single owner of the batch buffer.
///
/// Requests arrive through the mpsc queue in submission order and are
/// processed one at a time. The age ticker and the dispatch supervision arm
/// run through the same `select!`, so every state transition happens at this
/// one serialization point.
async fn run_actor(
    service: Arc<dyn StreamService>,
    config: ProducerConfig,
    mut request_rx: mpsc::Receiver<Request>,
) {
    let mut buffer = BatchBuffer::new();
    let mut dispatches: JoinSet<()> = JoinSet::new();
    let mut ticker = config.batch.age_limit().map(|period| {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    debug!(
        stream = %config.stream,
        server_url = %config.server_url,
        age_limit = ?config.batch.age_limit(),
        "producer actor started"
    );

    loop {
        tokio::select! {
            request = request_rx.recv() => match request {
                Some(Request::Append { record, id_tx, ack }) => {
                    buffer.append(PendingRecord { record, id_tx });
                    if limits_reached(&config.batch, &buffer) {
                        flush_buffer(&service, &config, &mut buffer, &mut dispatches);
                    }
                    let _ = ack.send(());
                }
                Some(Request::Flush { ack }) => {
                    flush_buffer(&service, &config, &mut buffer, &mut dispatches);
                    let _ = ack.send(());
                }
                Some(Request::Stop { ack }) => {
                    settle_dispatches(&mut dispatches).await;
                    let _ = ack.send(());
                    break;
                }
                // All producer handles dropped without an explicit stop.
                None => {
                    settle_dispatches(&mut dispatches).await;
                    break;
                }
            },
            _ = next_tick(&mut ticker) => {
                trace!(stream = %config.stream, "age limit tick");
                flush_buffer(&service, &config, &mut buffer, &mut dispatches);
            }
            Some(joined) = dispatches.join_next(), if !dispatches.is_empty() => {
                if let Err(e) = joined {
                    error!(stream = %config.stream, error = %e, "dispatch task failed");
                }
            }
        }
    }

    debug!(
        stream = %config.stream,
        dropped_records = buffer.record_count(),
        "producer actor stopped"
    );
}

/// Await the next age tick, or forever when no age limit is configured.
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Limit predicate evaluated after every buffered append.
fn limits_reached(batch: &BatchSetting, buffer: &BatchBuffer) -> bool {
    batch
        .record_count_limit()
        .map_or(false, |limit| buffer.record_count() >= limit)
        || batch
            .bytes_limit()
            .map_or(false, |limit| buffer.total_bytes() >= limit)
}

/// Drain the buffer and spawn one dispatch task per ordering key.
///
/// The buffer is replaced wholesale in the same serialized step that reads
/// it. The actor does not wait for the spawned tasks; completions are reaped
/// by the supervision arm of the actor loop.
fn flush_buffer(
    service: &Arc<dyn StreamService>,
    config: &ProducerConfig,
    buffer: &mut BatchBuffer,
    dispatches: &mut JoinSet<()>,
) {
    if buffer.is_empty() {
        trace!(stream = %config.stream, "flush of empty buffer, nothing to dispatch");
        return;
    }
    let record_count = buffer.record_count();
    let total_bytes = buffer.total_bytes();
    let batches = buffer.take();
    debug!(
        stream = %config.stream,
        record_count,
        total_bytes,
        batch_count = batches.len(),
        "flushing buffer"
    );
    for (ordering_key, entries) in batches {
        dispatches.spawn(dispatch_batch(
            Arc::clone(service),
            config.server_url.clone(),
            config.stream.clone(),
            ordering_key,
            entries,
        ));
    }
}

/// Dispatch one ordering key's batch: build headers, perform the network
/// append, and resolve each record's handle by positional pairing.
///
/// On failure the batch's senders are dropped, which resolves the waiting
/// handles with `AppendFailed`. Nothing is retried here and no other
/// ordering key is affected.
async fn dispatch_batch(
    service: Arc<dyn StreamService>,
    server_url: String,
    stream: String,
    ordering_key: String,
    entries: Vec<PendingRecord>,
) {
    let mut records = Vec::with_capacity(entries.len());
    let mut senders = Vec::with_capacity(entries.len());
    for pending in entries {
        let header = RecordHeader::new(pending.record.payload_type(), ordering_key.clone());
        records.push(AppendRecord {
            header,
            payload: pending.record.into_payload(),
        });
        senders.push(pending.id_tx);
    }

    match service.append_records(&server_url, &stream, records).await {
        Ok(ids) if ids.len() == senders.len() => {
            trace!(
                stream = %stream,
                ordering_key = %ordering_key,
                record_count = ids.len(),
                "batch acknowledged"
            );
            for (id_tx, id) in senders.into_iter().zip(ids) {
                // Receiver may have been dropped by an uninterested caller.
                let _ = id_tx.send(id);
            }
        }
        Ok(ids) => {
            let err = ClientError::AppendFailed {
                stream: stream.clone(),
                cause: format!(
                    "append response had {} ids for {} records",
                    ids.len(),
                    senders.len()
                ),
            };
            error!(
                stream = %stream,
                ordering_key = %ordering_key,
                error = %err,
                "batch response length mismatch"
            );
        }
        Err(e) => {
            let err = ClientError::AppendFailed {
                stream: stream.clone(),
                cause: e.to_string(),
            };
            error!(
                stream = %stream,
                ordering_key = %ordering_key,
                record_count = senders.len(),
                error = %err,
                "failed to dispatch batch"
            );
        }
    }
}

/// Wait for every spawned dispatch task to finish, logging failures.
async fn settle_dispatches(dispatches: &mut JoinSet<()>) {
    while let Some(joined) = dispatches.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "dispatch task failed");
        }
    }
}
