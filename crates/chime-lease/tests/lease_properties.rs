//! Mutual exclusion, extension and release properties of the lease lock.
//!
//! Every property runs against the in-memory store under a paused clock.
//! The same properties run against Redis when `CHIME_TEST_REDIS_URL` points
//! at a disposable server; without it those variants pass without checking.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::sleep;
use uuid::Uuid;

use chime_lease::{
    HolderToken, LeaseError, LeaseLock, LeaseOutcome, LeaseStore, MemoryLeaseStore,
    RedisLeaseStore, ReleaseOutcome,
};

const TTL: Duration = Duration::from_secs(2);

/// Real-time TTL for the Redis runs, short enough to keep them quick.
const REDIS_TTL: Duration = Duration::from_secs(1);

fn memory_store() -> Arc<dyn LeaseStore> {
    Arc::new(MemoryLeaseStore::new())
}

async fn redis_store() -> Option<Arc<dyn LeaseStore>> {
    let Ok(url) = std::env::var("CHIME_TEST_REDIS_URL") else {
        eprintln!("CHIME_TEST_REDIS_URL not set, skipping Redis lease test");
        return None;
    };
    let store = RedisLeaseStore::connect(&url)
        .await
        .expect("failed to connect to test redis");
    Some(Arc::new(store))
}

/// Lease key that no other run shares.
fn unique_key(name: &str) -> String {
    format!("test:lease:{name}:{}", Uuid::new_v4())
}

/// Race `count` fresh holders for `key` and return how many were granted.
async fn race_random_holders(lock: &LeaseLock, key: &str, ttl: Duration, count: usize) -> usize {
    let key: Arc<str> = Arc::from(key);
    let mut set = JoinSet::new();
    for _ in 0..count {
        let lock = lock.clone();
        let key = key.clone();
        set.spawn(async move {
            lock.acquire_or_extend(&key, &HolderToken::random(), ttl)
                .await
        });
    }

    let mut granted = 0;
    while let Some(outcome) = set.join_next().await {
        if outcome.expect("task panicked").is_granted() {
            granted += 1;
        }
    }
    granted
}

async fn exactly_one_concurrent_holder_wins(store: Arc<dyn LeaseStore>, ttl: Duration) {
    let lock = LeaseLock::new(store);
    let granted = race_random_holders(&lock, &unique_key("first"), ttl, 1000).await;
    assert_eq!(granted, 1);
}

async fn holder_keeps_lease_by_extending(store: Arc<dyn LeaseStore>, ttl: Duration) {
    let lock = LeaseLock::new(store);
    let key = unique_key("second");
    let holder = HolderToken::random();

    assert_eq!(
        lock.acquire_or_extend(&key, &holder, ttl).await,
        LeaseOutcome::Granted
    );

    sleep(ttl / 2).await;
    assert_eq!(race_random_holders(&lock, &key, ttl, 10).await, 0);

    assert_eq!(
        lock.acquire_or_extend(&key, &holder, ttl).await,
        LeaseOutcome::Granted
    );

    // A full ttl past the original acquisition, half of one past the extension.
    sleep(ttl / 2).await;
    assert_eq!(race_random_holders(&lock, &key, ttl, 10).await, 0);
    assert_eq!(
        lock.holder(&key).await.unwrap().as_deref(),
        Some(holder.as_str())
    );
    assert_eq!(lock.release(&key, &holder).await, ReleaseOutcome::Released);
}

async fn lapsed_lease_is_taken_over(store: Arc<dyn LeaseStore>, ttl: Duration) {
    let lock = LeaseLock::new(store);
    let key = unique_key("lapsed");
    let crashed = HolderToken::random();
    let successor = HolderToken::random();

    assert!(lock.acquire_or_extend(&key, &crashed, ttl).await.is_granted());
    sleep(ttl + Duration::from_millis(100)).await;
    assert_eq!(lock.holder(&key).await.unwrap(), None);

    assert!(
        lock.acquire_or_extend(&key, &successor, ttl)
            .await
            .is_granted()
    );
    // The crashed holder cannot extend or release what it lost.
    assert_eq!(
        lock.acquire_or_extend(&key, &crashed, ttl).await,
        LeaseOutcome::Denied
    );
    assert_eq!(lock.release(&key, &crashed).await, ReleaseOutcome::Noop);
    assert_eq!(
        lock.holder(&key).await.unwrap().as_deref(),
        Some(successor.as_str())
    );
    assert_eq!(lock.release(&key, &successor).await, ReleaseOutcome::Released);
}

async fn release_is_owner_gated(store: Arc<dyn LeaseStore>, ttl: Duration) {
    let lock = LeaseLock::new(store);
    let key = unique_key("release");
    let owner = HolderToken::random();
    let stranger = HolderToken::random();

    assert_eq!(lock.release(&key, &stranger).await, ReleaseOutcome::Noop);

    assert!(lock.acquire_or_extend(&key, &owner, ttl).await.is_granted());
    assert_eq!(lock.release(&key, &stranger).await, ReleaseOutcome::Noop);
    assert_eq!(
        lock.holder(&key).await.unwrap().as_deref(),
        Some(owner.as_str())
    );

    assert_eq!(lock.release(&key, &owner).await, ReleaseOutcome::Released);
    assert_eq!(lock.holder(&key).await.unwrap(), None);

    // Free again for anyone.
    assert!(
        lock.acquire_or_extend(&key, &stranger, ttl)
            .await
            .is_granted()
    );
    assert_eq!(lock.release(&key, &stranger).await, ReleaseOutcome::Released);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn exactly_one_of_a_thousand_concurrent_holders_wins() {
    exactly_one_concurrent_holder_wins(memory_store(), TTL).await;
}

#[tokio::test(start_paused = true)]
async fn memory_holder_keeps_lease_by_extending() {
    holder_keeps_lease_by_extending(memory_store(), TTL).await;
}

#[tokio::test(start_paused = true)]
async fn memory_lapsed_lease_is_taken_over() {
    lapsed_lease_is_taken_over(memory_store(), TTL).await;
}

#[tokio::test]
async fn memory_release_is_owner_gated() {
    release_is_owner_gated(memory_store(), TTL).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn redis_exactly_one_of_a_thousand_concurrent_holders_wins() {
    let Some(store) = redis_store().await else {
        return;
    };
    exactly_one_concurrent_holder_wins(store, REDIS_TTL).await;
}

#[tokio::test]
async fn redis_holder_keeps_lease_by_extending() {
    let Some(store) = redis_store().await else {
        return;
    };
    holder_keeps_lease_by_extending(store, REDIS_TTL).await;
}

#[tokio::test]
async fn redis_lapsed_lease_is_taken_over() {
    let Some(store) = redis_store().await else {
        return;
    };
    lapsed_lease_is_taken_over(store, REDIS_TTL).await;
}

#[tokio::test]
async fn redis_release_is_owner_gated() {
    let Some(store) = redis_store().await else {
        return;
    };
    release_is_owner_gated(store, REDIS_TTL).await;
}

#[tokio::test]
async fn redis_rejects_ttl_it_cannot_express() {
    let Some(store) = redis_store().await else {
        return;
    };
    let key = unique_key("range");

    let result = store.acquire_or_extend(&key, "holder", Duration::MAX).await;
    assert!(matches!(result, Err(LeaseError::TtlOutOfRange(_))));
    assert_eq!(store.holder(&key).await.unwrap(), None);
}
