//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 分布式ID生成器集成测试

#[path = "../common/mod.rs"]
mod common;

use chrono::{TimeZone, Utc};
use common::setup_logging;
use flashguard::backend::{KeyValueStore, MemoryStore};
use flashguard::config::IdGeneratorConfig;
use flashguard::id_worker::{compose, sequence_of, timestamp_of, IdGenerator};
use std::collections::HashSet;
use std::sync::Arc;

fn generator() -> (Arc<MemoryStore>, IdGenerator) {
    setup_logging();
    let store = Arc::new(MemoryStore::new());
    let ids = IdGenerator::new(store.clone(), &IdGeneratorConfig::default());
    (store, ids)
}

#[tokio::test]
async fn test_ids_increase_within_a_day() {
    let (_, ids) = generator();
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();

    let mut previous = 0;
    for _ in 0..100 {
        let id = ids.next_at("order", now).await.unwrap();
        assert!(id > previous);
        previous = id;
    }
    assert_eq!(sequence_of(previous), 100);
    assert_eq!(timestamp_of(previous), now.timestamp() - 1_640_995_200);
}

#[tokio::test]
async fn test_counter_key_is_partitioned_by_tag_and_day() {
    let (store, ids) = generator();
    let day1 = Utc.with_ymd_and_hms(2025, 6, 1, 23, 59, 59).unwrap();
    let day2 = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 1).unwrap();

    assert_eq!(ids.counter_key("order", day1), "icr:order:2025:06:01");

    ids.next_at("order", day1).await.unwrap();
    ids.next_at("order", day1).await.unwrap();
    ids.next_at("shop", day1).await.unwrap();
    let first_of_day2 = ids.next_at("order", day2).await.unwrap();

    assert_eq!(
        store.get("icr:order:2025:06:01").await.unwrap(),
        Some("2".to_string())
    );
    assert_eq!(
        store.get("icr:shop:2025:06:01").await.unwrap(),
        Some("1".to_string())
    );
    assert_eq!(sequence_of(first_of_day2), 1);
}

#[tokio::test]
async fn test_later_day_sorts_after_regardless_of_sequence() {
    let (_, ids) = generator();
    let day1 = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
    let day2 = Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap();

    let mut last_of_day1 = 0;
    for _ in 0..50 {
        last_of_day1 = ids.next_at("order", day1).await.unwrap();
    }
    let first_of_day2 = ids.next_at("order", day2).await.unwrap();
    assert!(first_of_day2 > last_of_day1);
    assert!(compose(timestamp_of(first_of_day2), 0) > last_of_day1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ids_are_unique() {
    let (_, ids) = generator();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let ids = ids.clone();
        handles.push(tokio::spawn(async move {
            let mut out = Vec::with_capacity(250);
            for _ in 0..250 {
                out.push(ids.next("order").await.unwrap());
            }
            out
        }));
    }

    let mut all = HashSet::new();
    for handle in futures::future::join_all(handles).await {
        for id in handle.unwrap() {
            assert!(all.insert(id), "duplicate id {}", id);
        }
    }
    assert_eq!(all.len(), 2000);
}

#[tokio::test]
async fn test_clock_before_epoch_is_rejected() {
    let (_, ids) = generator();
    let before = Utc.with_ymd_and_hms(2021, 12, 31, 23, 59, 59).unwrap();
    assert!(ids.next_at("order", before).await.is_err());
}
