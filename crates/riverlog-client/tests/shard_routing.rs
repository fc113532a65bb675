//! Integration tests for the shard key manager's cache-refresh policy.
//!
//! The pure routing math is covered by unit tests in `shard.rs`; these tests
//! exercise the lazily-refreshed cache against a mock service under the
//! paused tokio clock: one fetch per expired deadline, stale cache kept on
//! refresh failure, and replacement of the snapshot on the next successful
//! refresh.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use riverlog_client::{
    hash_partitioning_key, AppendRecord, ClientError, RecordId, Result, Shard, ShardKeyManager,
    StreamService,
};

/// Mock service that only serves shard tables.
struct MockShardService {
    shards: Mutex<Vec<Shard>>,
    list_calls: AtomicUsize,
    fail: AtomicBool,
}

impl MockShardService {
    fn new(shards: Vec<Shard>) -> Arc<Self> {
        Arc::new(Self {
            shards: Mutex::new(shards),
            list_calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        })
    }

    fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn set_shards(&self, shards: Vec<Shard>) {
        *self.shards.lock().unwrap() = shards;
    }
}

#[async_trait]
impl StreamService for MockShardService {
    async fn append_records(
        &self,
        _server_url: &str,
        _stream: &str,
        _records: Vec<AppendRecord>,
    ) -> Result<Vec<RecordId>> {
        Err(ClientError::Service(
            "append_records not supported by this mock".to_string(),
        ))
    }

    async fn list_shards(&self, _stream: &str) -> Result<Vec<Shard>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClientError::Service(
                "injected list_shards failure".to_string(),
            ));
        }
        Ok(self.shards.lock().unwrap().clone())
    }
}

/// Two shards splitting the full 128-bit hash space.
fn full_space_table() -> Vec<Shard> {
    vec![
        Shard {
            shard_id: 1,
            start_hash_key: 0,
            end_hash_key: u128::MAX / 2,
        },
        Shard {
            shard_id: 2,
            start_hash_key: u128::MAX / 2 + 1,
            end_hash_key: u128::MAX,
        },
    ]
}

#[tokio::test]
async fn test_first_call_fetches_then_serves_from_cache() {
    let service = MockShardService::new(full_space_table());
    let mut manager = ShardKeyManager::with_refresh_interval(
        service.clone(),
        "orders",
        Duration::from_secs(60),
    );

    let first = manager.choose_shard("user-1").await.unwrap();
    assert_eq!(service.list_calls(), 1);

    // Cached: no further fetches, and the same key routes identically.
    for _ in 0..5 {
        assert_eq!(manager.choose_shard("user-1").await.unwrap(), first);
    }
    assert_eq!(service.list_calls(), 1);

    // The chosen shard is the one containing the key's digest.
    let digest = hash_partitioning_key("user-1");
    let expected = if digest <= u128::MAX / 2 { 1 } else { 2 };
    assert_eq!(first, expected);
}

#[tokio::test(start_paused = true)]
async fn test_expired_deadline_triggers_exactly_one_refresh() {
    let service = MockShardService::new(full_space_table());
    let mut manager = ShardKeyManager::with_refresh_interval(
        service.clone(),
        "orders",
        Duration::from_millis(100),
    );

    manager.choose_shard("k").await.unwrap();
    assert_eq!(service.list_calls(), 1);

    tokio::time::sleep(Duration::from_millis(150)).await;

    manager.choose_shard("k").await.unwrap();
    assert_eq!(service.list_calls(), 2, "one refresh at the expired deadline");

    manager.choose_shard("k").await.unwrap();
    assert_eq!(service.list_calls(), 2, "no refresh before the new deadline");
}

#[tokio::test(start_paused = true)]
async fn test_refresh_failure_propagates_and_is_retried_next_call() {
    let service = MockShardService::new(full_space_table());
    let mut manager = ShardKeyManager::with_refresh_interval(
        service.clone(),
        "orders",
        Duration::from_millis(100),
    );

    manager.choose_shard("k").await.unwrap();
    assert_eq!(service.list_calls(), 1);

    service.set_fail(true);
    tokio::time::sleep(Duration::from_millis(150)).await;

    // The due refresh fails and the error is surfaced, not swallowed.
    assert!(matches!(
        manager.choose_shard("k").await,
        Err(ClientError::ListShardsFailed { .. })
    ));
    assert_eq!(service.list_calls(), 2);

    // The deadline was not extended by the failure: the next call retries.
    assert!(manager.choose_shard("k").await.is_err());
    assert_eq!(service.list_calls(), 3);

    // Recovery: the stale cache was never invalidated and the next
    // successful refresh resumes routing.
    service.set_fail(false);
    let shard = manager.choose_shard("k").await.unwrap();
    assert_eq!(service.list_calls(), 4);
    assert!(shard == 1 || shard == 2);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_replaces_the_snapshot_wholesale() {
    let service = MockShardService::new(full_space_table());
    let mut manager = ShardKeyManager::with_refresh_interval(
        service.clone(),
        "orders",
        Duration::from_millis(100),
    );

    manager.choose_shard("k").await.unwrap();

    // Re-shard: one shard now owns the whole space.
    service.set_shards(vec![Shard {
        shard_id: 42,
        start_hash_key: 0,
        end_hash_key: u128::MAX,
    }]);

    // Old snapshot still in use before the deadline.
    assert_ne!(manager.choose_shard("k").await.unwrap(), 42);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(manager.choose_shard("k").await.unwrap(), 42);
}

#[tokio::test]
async fn test_inconsistent_table_is_a_routing_error() {
    // A table with a hole: keys hashing into the missing half cannot route.
    let service = MockShardService::new(vec![Shard {
        shard_id: 1,
        start_hash_key: 0,
        end_hash_key: u128::MAX / 2,
    }]);
    let mut manager = ShardKeyManager::new(service.clone(), "orders");

    // Find a key hashing into the uncovered half.
    let key = (0..)
        .map(|i| format!("probe-{i}"))
        .find(|k| hash_partitioning_key(k) > u128::MAX / 2)
        .unwrap();

    assert!(matches!(
        manager.choose_shard(&key).await,
        Err(ClientError::ShardRouting(_))
    ));
}
