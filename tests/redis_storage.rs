//! Redis adapter tests against a live server.
//!
//! Run with `REDIS_URL=redis://127.0.0.1/ cargo test --features redis-storage -- --ignored`.

#![cfg(feature = "redis-storage")]

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use futures::future::join_all;
use request_gatekeeper::{
    AlertKind, AlertRecord, ClientId, CounterStore, GateDecision, Gatekeeper, GatekeeperConfig,
    KeyExpiry, LogRecord, RecordStore, RedisCounterStore, RedisCounterStoreConfig,
    RedisRecordStore, RedisRecordStoreConfig, Severity,
};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string())
}

/// Prefix unique to one test run so tests never see each other's keys.
fn unique_prefix(test: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("gatekeeper-test:{test}:{nanos}:")
}

async fn counters(test: &str) -> RedisCounterStore {
    RedisCounterStore::connect_with_config(
        &redis_url(),
        RedisCounterStoreConfig {
            key_prefix: unique_prefix(test),
        },
    )
    .await
    .unwrap()
}

async fn records(test: &str) -> RedisRecordStore {
    RedisRecordStore::connect_with_config(
        &redis_url(),
        RedisRecordStoreConfig {
            key_prefix: unique_prefix(test),
        },
    )
    .await
    .unwrap()
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_increment_window_arms_ttl_once() {
    let store = counters("window").await;

    assert_eq!(store.increment_window("rate:1.1.1.1", Duration::from_secs(60)).await.unwrap(), 1);
    assert_eq!(store.increment_window("rate:1.1.1.1", Duration::from_secs(60)).await.unwrap(), 2);

    match store.ttl("rate:1.1.1.1").await.unwrap() {
        KeyExpiry::ExpiresIn(ttl) => assert!(ttl <= Duration::from_secs(60)),
        other => panic!("expected a TTL, got {other:?}"),
    }
    assert_eq!(store.get("rate:1.1.1.1").await.unwrap().as_deref(), Some("2"));

    store.delete_all().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_set_if_absent_and_reset() {
    let store = counters("bans").await;

    assert!(store.set_if_absent("blocked:2.2.2.2", "true", None).await.unwrap());
    assert!(!store.set_if_absent("blocked:2.2.2.2", "true", None).await.unwrap());
    assert_eq!(store.ttl("blocked:2.2.2.2").await.unwrap(), KeyExpiry::Persistent);
    assert_eq!(store.ttl("blocked:9.9.9.9").await.unwrap(), KeyExpiry::Missing);
    assert_eq!(store.keys("blocked:").await.unwrap(), vec!["blocked:2.2.2.2".to_string()]);

    store.delete_all().await.unwrap();
    assert!(store.keys("").await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_concurrent_increments_are_atomic() {
    let store = Arc::new(counters("atomic").await);

    let tasks = (0..50).map(|_| {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .increment_window("rate:3.3.3.3", Duration::from_secs(60))
                .await
                .unwrap()
        })
    });
    let mut counts: Vec<i64> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();
    counts.sort_unstable();
    assert_eq!(counts, (1..=50).collect::<Vec<i64>>());

    store.delete_all().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_records_round_trip_newest_first() {
    let store = records("records").await;
    let client = ClientId::new("4.4.4.4");

    for status in [200, 429, 403] {
        store
            .insert_log(LogRecord::new(Utc::now(), &client, "/api/balance", "GET", status))
            .await
            .unwrap();
    }
    store
        .insert_alert(AlertRecord::new(
            Utc::now(),
            &client,
            AlertKind::RateLimitExceeded,
            Severity::High,
        ))
        .await
        .unwrap();

    let statuses: Vec<u16> = store
        .recent_logs(10)
        .await
        .unwrap()
        .iter()
        .map(|l| l.status)
        .collect();
    assert_eq!(statuses, vec![403, 429, 200]);
    assert_eq!(store.alerts_for(&client).await.unwrap().len(), 1);
    assert!(store.alerts_for(&ClientId::new("5.5.5.5")).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_gatekeeper_over_redis() {
    let config = GatekeeperConfig::builder()
        .with_threshold(2)
        .build()
        .unwrap();
    let counter_store = Arc::new(counters("gatekeeper").await);
    let record_store = Arc::new(records("gatekeeper").await);
    let gatekeeper = Gatekeeper::builder(config)
        .with_counter_store(counter_store.clone())
        .with_record_store(record_store.clone())
        .build()
        .unwrap();
    let client = ClientId::new("9.9.9.9");

    assert!(gatekeeper.check(&client, "/api").await.is_admitted());
    assert!(gatekeeper.check(&client, "/api").await.is_admitted());
    assert_eq!(
        gatekeeper.check(&client, "/api").await,
        GateDecision::TooManyRequests { count: 3 }
    );
    assert_eq!(gatekeeper.check(&client, "/api").await, GateDecision::Blocked);
    assert_eq!(record_store.alerts_for(&client).await.unwrap().len(), 1);

    gatekeeper.reset_hook().reset_all().await.unwrap();
    assert_eq!(
        gatekeeper.check(&client, "/api").await,
        GateDecision::Allow { count: Some(1) }
    );

    counter_store.delete_all().await.unwrap();
    gatekeeper.shutdown().await.unwrap();
}
