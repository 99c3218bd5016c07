//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 旁路缓存客户端集成测试

#[path = "../common/mod.rs"]
mod common;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use common::{fast_cache_config, setup_logging, CountingSource, Shop};
use flashguard::backend::{KeyValueStore, MemoryStore};
use flashguard::client::{CacheClient, LogicalEntry, ReadPolicy, NULL_MARKER};
use flashguard::config::CacheConfig;
use flashguard::error::{CacheError, Result};
use flashguard::lock::DistributedLock;
use mockall::mock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;

const SHOP_PREFIX: &str = "cache:shop:";

fn client_with(config: CacheConfig) -> (Arc<MemoryStore>, CacheClient) {
    setup_logging();
    let store = Arc::new(MemoryStore::new());
    let client = CacheClient::new(store.clone(), config);
    (store, client)
}

fn client() -> (Arc<MemoryStore>, CacheClient) {
    client_with(fast_cache_config())
}

async fn seed_logical(store: &MemoryStore, key: &str, shop: &Shop, expire_in: ChronoDuration) {
    let entry = LogicalEntry {
        data: shop.clone(),
        expire_time: Utc::now() + expire_in,
    };
    store
        .set(key, &serde_json::to_string(&entry).unwrap(), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_pass_through_caches_absence_once() {
    let (store, client) = client();
    let source = CountingSource::new();

    for _ in 0..2 {
        let src = source.clone();
        let result: Option<Shop> = client
            .query_with_pass_through(
                SHOP_PREFIX,
                404u64,
                move |_id| {
                    let src = src.clone();
                    async move {
                        src.hit();
                        Ok(None)
                    }
                },
                Duration::from_secs(1800),
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }

    assert_eq!(source.calls(), 1);
    assert_eq!(
        store.get("cache:shop:404").await.unwrap(),
        Some(NULL_MARKER.to_string())
    );
    let ttl = store.ttl("cache:shop:404").await.unwrap().unwrap();
    assert!(ttl <= Duration::from_secs(120));
}

#[tokio::test]
async fn test_pass_through_populates_with_jittered_ttl() {
    let (store, client) = client();

    let shop: Option<Shop> = client
        .query_with_pass_through(
            SHOP_PREFIX,
            1u64,
            |id| async move { Ok(Some(Shop::sample(id))) },
            Duration::from_secs(100),
        )
        .await
        .unwrap();
    assert_eq!(shop, Some(Shop::sample(1)));

    let ttl = store.ttl("cache:shop:1").await.unwrap().unwrap();
    assert!(ttl > Duration::from_secs(99));
    assert!(ttl <= Duration::from_secs(120));

    // 第二次读取命中缓存，不再回源
    let cached: Option<Shop> = client
        .query_with_pass_through(
            SHOP_PREFIX,
            1u64,
            |_id| async move { Err(CacheError::DatabaseError("should not be called".into())) },
            Duration::from_secs(100),
        )
        .await
        .unwrap();
    assert_eq!(cached, Some(Shop::sample(1)));
}

#[tokio::test]
async fn test_corrupt_payload_falls_through_to_source() {
    let (store, client) = client();
    store
        .set("cache:shop:3", "{not json", Some(Duration::from_secs(60)))
        .await
        .unwrap();

    let shop: Option<Shop> = client
        .query_with_pass_through(
            SHOP_PREFIX,
            3u64,
            |id| async move { Ok(Some(Shop::sample(id))) },
            Duration::from_secs(60),
        )
        .await
        .unwrap();
    assert_eq!(shop, Some(Shop::sample(3)));

    let repaired: Shop =
        serde_json::from_str(&store.get("cache:shop:3").await.unwrap().unwrap()).unwrap();
    assert_eq!(repaired, Shop::sample(3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutex_rebuild_is_single_flight() {
    let (_, client) = client();
    let source = CountingSource::new();
    let barrier = Arc::new(Barrier::new(20));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let client = client.clone();
        let source = source.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            client
                .query_with_mutex(
                    SHOP_PREFIX,
                    7u64,
                    move |id| {
                        let source = source.clone();
                        async move {
                            source.hit();
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            Ok(Some(Shop::sample(id)))
                        }
                    },
                    Duration::from_secs(60),
                )
                .await
        }));
    }

    for result in futures::future::join_all(handles).await {
        let shop: Option<Shop> = result.unwrap().unwrap();
        assert_eq!(shop, Some(Shop::sample(7)));
    }
    assert_eq!(source.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutex_rebuild_of_missing_record_is_single_flight() {
    let (store, client) = client();
    let source = CountingSource::new();
    let barrier = Arc::new(Barrier::new(10));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let client = client.clone();
        let source = source.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            client
                .query_with_mutex::<Shop, _, _, _>(
                    SHOP_PREFIX,
                    8u64,
                    move |_id| {
                        let source = source.clone();
                        async move {
                            source.hit();
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(None)
                        }
                    },
                    Duration::from_secs(60),
                )
                .await
        }));
    }

    for result in futures::future::join_all(handles).await {
        assert!(result.unwrap().unwrap().is_none());
    }
    assert_eq!(source.calls(), 1);
    assert_eq!(
        store.get("cache:shop:8").await.unwrap(),
        Some(NULL_MARKER.to_string())
    );
}

#[tokio::test]
async fn test_mutex_releases_lock_when_source_fails() {
    let (store, client) = client();

    let err = client
        .query_with_mutex::<Shop, _, _, _>(
            SHOP_PREFIX,
            9u64,
            |_id| async move { Err(CacheError::DatabaseError("connection reset".into())) },
            Duration::from_secs(60),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::DatabaseError(_)));
    assert_eq!(store.get("lock:cache:shop:9").await.unwrap(), None);
    assert_eq!(store.get("cache:shop:9").await.unwrap(), None);
}

fn fail_hard() -> bool {
    true
}

#[tokio::test]
async fn test_mutex_releases_lock_when_source_panics() {
    let (store, client) = client();

    let task = tokio::spawn(async move {
        client
            .query_with_mutex::<Shop, _, _, _>(
                SHOP_PREFIX,
                10u64,
                |_id| async move {
                    if fail_hard() {
                        panic!("loader crashed");
                    }
                    Ok(None)
                },
                Duration::from_secs(60),
            )
            .await
    });
    assert!(task.await.unwrap_err().is_panic());
    assert_eq!(store.get("lock:cache:shop:10").await.unwrap(), None);
}

#[tokio::test]
async fn test_mutex_gives_up_after_retry_budget() {
    let config = CacheConfig {
        retry_backoff_ms: 5,
        max_lock_retries: 3,
        ..Default::default()
    };
    let (store, client) = client_with(config);
    let lock = DistributedLock::new(store.clone(), "lock:");
    let held = lock
        .try_acquire("cache:shop:11", Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();

    let source = CountingSource::new();
    let src = source.clone();
    let err = client
        .query_with_mutex::<Shop, _, _, _>(
            SHOP_PREFIX,
            11u64,
            move |_id| {
                let src = src.clone();
                async move {
                    src.hit();
                    Ok(None)
                }
            },
            Duration::from_secs(60),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CacheError::LockContended(_)));
    assert_eq!(source.calls(), 0);
    assert!(held.release().await.unwrap());
}

#[tokio::test]
async fn test_mutex_wait_can_be_cancelled() {
    let config = CacheConfig {
        retry_backoff_ms: 20,
        max_lock_retries: 10_000,
        ..Default::default()
    };
    let (store, client) = client_with(config);
    let lock = DistributedLock::new(store.clone(), "lock:");
    let held = lock
        .try_acquire("cache:shop:12", Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        canceller.cancel();
    });

    let err = client
        .query_with_mutex_cancellable::<Shop, _, _, _>(
            SHOP_PREFIX,
            12u64,
            |_id| async move { Ok(None) },
            Duration::from_secs(60),
            Some(&token),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::Cancelled(_)));
    assert!(held.release().await.unwrap());
}

#[tokio::test]
async fn test_mutex_waiter_picks_up_rebuilt_value() {
    let (store, client) = client();
    let lock = DistributedLock::new(store.clone(), "lock:");
    let held = lock
        .try_acquire("cache:shop:13", Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();

    let writer = store.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        writer
            .set(
                "cache:shop:13",
                &serde_json::to_string(&Shop::sample(13)).unwrap(),
                Some(Duration::from_secs(60)),
            )
            .await
            .unwrap();
        held.release().await.unwrap();
    });

    let source = CountingSource::new();
    let src = source.clone();
    let shop: Option<Shop> = client
        .query_with_mutex(
            SHOP_PREFIX,
            13u64,
            move |_id| {
                let src = src.clone();
                async move {
                    src.hit();
                    Ok(None)
                }
            },
            Duration::from_secs(60),
        )
        .await
        .unwrap();
    assert_eq!(shop, Some(Shop::sample(13)));
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn test_logical_absent_key_is_not_loaded() {
    let (_, client) = client();
    let source = CountingSource::new();
    let src = source.clone();

    let result: Option<Shop> = client
        .query_with_logical_expire(
            SHOP_PREFIX,
            20u64,
            move |id| {
                let src = src.clone();
                async move {
                    src.hit();
                    Ok(Some(Shop::sample(id)))
                }
            },
            Duration::from_secs(20),
        )
        .await
        .unwrap();
    assert!(result.is_none());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn test_logical_fresh_entry_served_without_rebuild() {
    let (store, client) = client();
    seed_logical(&store, "cache:shop:21", &Shop::sample(21), ChronoDuration::minutes(5)).await;
    let source = CountingSource::new();
    let src = source.clone();

    let result: Option<Shop> = client
        .query_with_logical_expire(
            SHOP_PREFIX,
            21u64,
            move |_id| {
                let src = src.clone();
                async move {
                    src.hit();
                    Ok(None)
                }
            },
            Duration::from_secs(20),
        )
        .await
        .unwrap();
    assert_eq!(result, Some(Shop::sample(21)));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(source.calls(), 0);
}

async fn read_logical(
    client: CacheClient,
    source: CountingSource,
    id: u64,
    source_delay: Duration,
) -> Result<Option<Shop>> {
    client
        .query_with_logical_expire(
            SHOP_PREFIX,
            id,
            move |id| {
                let source = source.clone();
                async move {
                    source.hit();
                    tokio::time::sleep(source_delay).await;
                    Ok(Some(Shop {
                        name: "rebuilt".to_string(),
                        ..Shop::sample(id)
                    }))
                }
            },
            Duration::from_secs(20),
        )
        .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_logical_stale_entry_is_served_while_rebuilding_once() {
    let (store, client) = client();
    let stale = Shop::sample(22);
    seed_logical(&store, "cache:shop:22", &stale, ChronoDuration::seconds(-1)).await;
    let source = CountingSource::new();
    let barrier = Arc::new(Barrier::new(10));

    let started = std::time::Instant::now();
    let mut handles = Vec::new();
    for _ in 0..10 {
        let client = client.clone();
        let source = source.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            read_logical(client, source, 22, Duration::from_millis(200)).await
        }));
    }
    for result in futures::future::join_all(handles).await {
        assert_eq!(result.unwrap().unwrap(), Some(stale.clone()));
    }
    assert!(started.elapsed() < Duration::from_millis(150));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(source.calls(), 1);
    assert_eq!(store.get("lock:cache:shop:22").await.unwrap(), None);

    let fresh = read_logical(client.clone(), source.clone(), 22, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(fresh.unwrap().name, "rebuilt");
    assert_eq!(source.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_logical_corrupt_entry_is_reloaded_once() {
    let (store, client) = client();
    store.set("cache:shop:77", "{not json", None).await.unwrap();
    let source = CountingSource::new();
    let barrier = Arc::new(Barrier::new(20));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let client = client.clone();
        let source = source.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            read_logical(client, source, 77, Duration::from_millis(100)).await
        }));
    }
    for result in futures::future::join_all(handles).await {
        let shop = result.unwrap().unwrap().expect("reloaded record");
        assert_eq!(shop.name, "rebuilt");
    }
    assert_eq!(source.calls(), 1);

    let payload = store.get("cache:shop:77").await.unwrap().unwrap();
    let entry: LogicalEntry<Shop> = serde_json::from_str(&payload).unwrap();
    assert!(!entry.is_expired());
    assert_eq!(entry.data.id, 77);
    assert_eq!(store.get("lock:cache:shop:77").await.unwrap(), None);
}

#[tokio::test]
async fn test_logical_rebuild_of_deleted_record_removes_key() {
    let (store, client) = client();
    seed_logical(&store, "cache:shop:23", &Shop::sample(23), ChronoDuration::seconds(-1)).await;

    let stale: Option<Shop> = client
        .query_with_logical_expire(
            SHOP_PREFIX,
            23u64,
            |_id| async move { Ok(None) },
            Duration::from_secs(20),
        )
        .await
        .unwrap();
    assert_eq!(stale, Some(Shop::sample(23)));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.get("cache:shop:23").await.unwrap(), None);
}

#[tokio::test]
async fn test_logical_background_failure_releases_lock() {
    let (store, client) = client();
    seed_logical(&store, "cache:shop:24", &Shop::sample(24), ChronoDuration::seconds(-1)).await;

    let stale: Option<Shop> = client
        .query_with_logical_expire(
            SHOP_PREFIX,
            24u64,
            |_id| async move { Err(CacheError::DatabaseError("timeout".into())) },
            Duration::from_secs(20),
        )
        .await
        .unwrap();
    assert_eq!(stale, Some(Shop::sample(24)));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.get("lock:cache:shop:24").await.unwrap(), None);
    assert!(store.get("cache:shop:24").await.unwrap().is_some());
}

#[tokio::test]
async fn test_warm_logical_writes_envelope_without_ttl() {
    let (store, client) = client();

    assert!(client
        .warm_logical(
            SHOP_PREFIX,
            30u64,
            |id| async move { Ok(Some(Shop::sample(id))) },
            Duration::from_secs(20),
        )
        .await
        .unwrap());
    assert!(!client
        .warm_logical::<Shop, _, _, _>(
            SHOP_PREFIX,
            31u64,
            |_id| async move { Ok(None) },
            Duration::from_secs(20),
        )
        .await
        .unwrap());

    let raw = store.get("cache:shop:30").await.unwrap().unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["data"]["id"], 30);
    assert!(json["expireTime"].is_string());
    assert_eq!(store.ttl("cache:shop:30").await.unwrap(), None);
    assert_eq!(store.get("cache:shop:31").await.unwrap(), None);
}

#[tokio::test]
async fn test_update_through_invalidates_only_on_success() {
    let (store, client) = client();
    client
        .write("cache:shop:40", &Shop::sample(40), Duration::from_secs(60))
        .await
        .unwrap();

    let updated = client
        .update_through(SHOP_PREFIX, &40u64, async { Ok(false) })
        .await
        .unwrap();
    assert!(!updated);
    assert!(store.get("cache:shop:40").await.unwrap().is_some());

    let err = client
        .update_through(SHOP_PREFIX, &40u64, async {
            Err(CacheError::DatabaseError("deadlock".into()))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::DatabaseError(_)));
    assert!(store.get("cache:shop:40").await.unwrap().is_some());

    assert!(client
        .update_through(SHOP_PREFIX, &40u64, async { Ok(true) })
        .await
        .unwrap());
    assert_eq!(store.get("cache:shop:40").await.unwrap(), None);
}

#[tokio::test]
async fn test_query_dispatches_on_policy() {
    let (store, client) = client();
    seed_logical(&store, "cache:shop:50", &Shop::sample(50), ChronoDuration::minutes(5)).await;

    let by_logical: Option<Shop> = client
        .query(
            ReadPolicy::LogicalExpire,
            SHOP_PREFIX,
            50u64,
            |_id| async move { Ok(None) },
            Duration::from_secs(20),
        )
        .await
        .unwrap();
    assert_eq!(by_logical, Some(Shop::sample(50)));

    let by_mutex: Option<Shop> = client
        .query(
            ReadPolicy::Mutex,
            SHOP_PREFIX,
            51u64,
            |id| async move { Ok(Some(Shop::sample(id))) },
            Duration::from_secs(20),
        )
        .await
        .unwrap();
    assert_eq!(by_mutex, Some(Shop::sample(51)));

    let by_pass_through: Option<Shop> = client
        .query(
            ReadPolicy::PassThrough,
            SHOP_PREFIX,
            52u64,
            |_id| async move { Ok(None) },
            Duration::from_secs(20),
        )
        .await
        .unwrap();
    assert!(by_pass_through.is_none());
    assert_eq!(
        store.get("cache:shop:52").await.unwrap(),
        Some(NULL_MARKER.to_string())
    );
}

mock! {
    pub FailingStore {}

    #[async_trait]
    impl KeyValueStore for FailingStore {
        async fn get(&self, key: &str) -> Result<Option<String>>;
        async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
        async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;
        async fn delete(&self, key: &str) -> Result<bool>;
        async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool>;
        async fn incr(&self, key: &str) -> Result<i64>;
        async fn ttl(&self, key: &str) -> Result<Option<Duration>>;
        async fn ping(&self) -> Result<()>;
    }
}

#[tokio::test]
async fn test_store_outage_is_propagated_not_swallowed() {
    let mut store = MockFailingStore::new();
    store
        .expect_get()
        .returning(|_| Err(CacheError::Store("connection refused".into())));
    let client = CacheClient::new(Arc::new(store), CacheConfig::default());

    let source = CountingSource::new();
    let src = source.clone();
    let err = client
        .query_with_pass_through::<Shop, _, _, _>(
            SHOP_PREFIX,
            60u64,
            move |_id| {
                let src = src.clone();
                async move {
                    src.hit();
                    Ok(None)
                }
            },
            Duration::from_secs(20),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::Store(_)));
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn test_mutex_releases_lock_when_populate_fails() {
    let mut store = MockFailingStore::new();
    store.expect_get().returning(|_| Ok(None));
    store.expect_set_nx().times(1).returning(|_, _, _| Ok(true));
    store
        .expect_set()
        .returning(|_, _, _| Err(CacheError::Store("READONLY".into())));
    store
        .expect_compare_and_delete()
        .times(1)
        .returning(|_, _| Ok(true));
    let client = CacheClient::new(Arc::new(store), CacheConfig::default());

    let err = client
        .query_with_mutex(
            SHOP_PREFIX,
            61u64,
            |id| async move { Ok(Some(Shop::sample(id))) },
            Duration::from_secs(20),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::Store(_)));
}
