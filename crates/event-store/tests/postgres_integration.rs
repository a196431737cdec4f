//! PostgreSQL integration tests.
//!
//! All tests share one container and truncate the tables first, so they run
//! serially. Requires a local Docker daemon.

use std::sync::Arc;

use chrono::{Duration, Utc};
use event_store::{
    AggregateId, EventQuery, EventStore, EventStoreError, EventStoreExt, NewEvent,
    PostgresEventStore, Snapshot, Version,
};
use futures_util::TryStreamExt;
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // dropping the handle stops the container
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresEventStore::new(pool.clone())
                .run_migrations()
                .await
                .unwrap();
            pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn test_store() -> PostgresEventStore {
    let info = container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE events, snapshots")
        .execute(&pool)
        .await
        .unwrap();

    PostgresEventStore::new(pool)
}

fn new_event(event_type: &str) -> NewEvent {
    NewEvent::new(event_type, "Order", serde_json::json!({"kind": event_type}))
}

#[tokio::test]
#[serial]
async fn append_and_load_round_trip() {
    let store = test_store().await;
    let id = AggregateId::new();

    let committed = store
        .append(
            id,
            Version::initial(),
            vec![
                new_event("OrderCreated").with_metadata("correlation_id", serde_json::json!("c-1")),
                new_event("ItemAdded"),
            ],
        )
        .await
        .unwrap();

    let loaded = store.load_all(id).await.unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].version, Version::first());
    assert_eq!(loaded[1].version, Version::new(2));
    assert_eq!(loaded[0].event_id, committed[0].event_id);
    assert_eq!(loaded[0].schema_version, 1);
    assert_eq!(
        loaded[0].metadata.get("correlation_id"),
        Some(&serde_json::json!("c-1"))
    );
    assert_eq!(store.current_version(id).await.unwrap(), Version::new(2));
}

#[tokio::test]
#[serial]
async fn stale_expected_version_conflicts() {
    let store = test_store().await;
    let id = AggregateId::new();
    store
        .append(id, Version::initial(), vec![new_event("OrderCreated")])
        .await
        .unwrap();

    let result = store
        .append(id, Version::initial(), vec![new_event("ItemAdded")])
        .await;
    assert!(matches!(
        result,
        Err(EventStoreError::ConcurrencyConflict { .. })
    ));
    assert_eq!(store.load_all(id).await.unwrap().len(), 1);
}

#[tokio::test]
#[serial]
async fn racing_appends_commit_exactly_once() {
    let store = test_store().await;
    let id = AggregateId::new();
    store
        .append(id, Version::initial(), vec![new_event("OrderCreated")])
        .await
        .unwrap();

    let tasks: Vec<_> = (0..6)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .append(id, Version::first(), vec![new_event("ItemAdded")])
                    .await
            })
        })
        .collect();

    let mut successes = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => successes += 1,
            Err(e) => assert!(e.is_concurrency_conflict(), "unexpected error: {e}"),
        }
    }
    assert_eq!(successes, 1);

    let versions: Vec<i64> = store
        .load_all(id)
        .await
        .unwrap()
        .iter()
        .map(|e| e.version.as_i64())
        .collect();
    assert_eq!(versions, vec![1, 2]);
}

#[tokio::test]
#[serial]
async fn invalid_batches_write_nothing() {
    let store = test_store().await;
    let id = AggregateId::new();

    let empty = store.append(id, Version::initial(), vec![]).await;
    assert!(matches!(empty, Err(EventStoreError::Validation(_))));

    store
        .append(id, Version::initial(), vec![new_event("OrderCreated")])
        .await
        .unwrap();
    let foreign = NewEvent::new("InvoiceRaised", "Invoice", serde_json::json!({}));
    let mismatched = store.append(id, Version::first(), vec![foreign]).await;
    assert!(matches!(mismatched, Err(EventStoreError::Validation(_))));

    assert_eq!(store.current_version(id).await.unwrap(), Version::first());
}

#[tokio::test]
#[serial]
async fn duplicate_event_id_is_rejected() {
    let store = test_store().await;
    let id = AggregateId::new();
    let event = new_event("OrderCreated");
    store
        .append(id, Version::initial(), vec![event.clone()])
        .await
        .unwrap();

    let result = store.append(id, Version::first(), vec![event]).await;
    assert!(matches!(result, Err(EventStoreError::Validation(_))));
    assert_eq!(store.current_version(id).await.unwrap(), Version::first());
}

#[tokio::test]
#[serial]
async fn load_after_version_skips_prefix() {
    let store = test_store().await;
    let id = AggregateId::new();
    let batch = (0..5).map(|i| new_event(&format!("Event{i}"))).collect();
    store.append(id, Version::initial(), batch).await.unwrap();

    let tail: Vec<_> = store
        .load(id, Version::new(3))
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    let versions: Vec<i64> = tail.iter().map(|e| e.version.as_i64()).collect();
    assert_eq!(versions, vec![4, 5]);
}

#[tokio::test]
#[serial]
async fn load_pages_through_long_streams() {
    let store = test_store().await;
    let id = AggregateId::new();
    let batch = (0..1_200).map(|_| new_event("ItemAdded")).collect();
    store.append(id, Version::initial(), batch).await.unwrap();

    let events = store.load_all(id).await.unwrap();
    assert_eq!(events.len(), 1_200);
    assert!(
        events
            .windows(2)
            .all(|pair| pair[1].version == pair[0].version.next())
    );

    let all: Vec<_> = store.stream_all().await.unwrap().try_collect().await.unwrap();
    assert_eq!(all.len(), 1_200);
}

#[tokio::test]
#[serial]
async fn load_by_timestamp_returns_prefix() {
    let store = test_store().await;
    let id = AggregateId::new();
    let base = Utc::now();

    let batch = (0..4)
        .map(|i| new_event(&format!("Event{i}")).with_timestamp(base + Duration::seconds(i * 10)))
        .collect();
    store.append(id, Version::initial(), batch).await.unwrap();

    let as_of: Vec<_> = store
        .load_by_timestamp(id, base + Duration::seconds(15))
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(as_of.len(), 2);
    assert_eq!(as_of[1].version, Version::new(2));
}

#[tokio::test]
#[serial]
async fn stream_all_keeps_commit_order() {
    let store = test_store().await;
    let first = AggregateId::new();
    let second = AggregateId::new();

    store
        .append(first, Version::initial(), vec![new_event("OrderCreated")])
        .await
        .unwrap();
    store
        .append(second, Version::initial(), vec![new_event("OrderCreated")])
        .await
        .unwrap();
    store
        .append(first, Version::first(), vec![new_event("ItemAdded")])
        .await
        .unwrap();

    let order: Vec<(AggregateId, i64)> = store
        .stream_all()
        .await
        .unwrap()
        .map_ok(|e| (e.aggregate_id, e.version.as_i64()))
        .try_collect()
        .await
        .unwrap();
    assert_eq!(order, vec![(first, 1), (second, 1), (first, 2)]);
}

#[tokio::test]
#[serial]
async fn query_events_with_limit_and_offset() {
    let store = test_store().await;
    let id = AggregateId::new();
    let batch = (0..5).map(|_| new_event("ItemAdded")).collect();
    store.append(id, Version::initial(), batch).await.unwrap();

    let page = store
        .query_events(
            EventQuery::for_aggregate(id)
                .event_type("ItemAdded")
                .offset(1)
                .limit(2),
        )
        .await
        .unwrap();
    let versions: Vec<i64> = page.iter().map(|e| e.version.as_i64()).collect();
    assert_eq!(versions, vec![2, 3]);
}

#[tokio::test]
#[serial]
async fn latest_snapshot_is_returned() {
    let store = test_store().await;
    let id = AggregateId::new();
    let batch = (0..4).map(|_| new_event("ItemAdded")).collect();
    store.append(id, Version::initial(), batch).await.unwrap();

    for version in [2, 4] {
        store
            .save_snapshot(Snapshot::new(
                id,
                "Order",
                Version::new(version),
                serde_json::json!({"version": version}),
            ))
            .await
            .unwrap();
    }

    let latest = store.load_latest_snapshot(id).await.unwrap().unwrap();
    assert_eq!(latest.version, Version::new(4));

    let beyond = store
        .save_snapshot(Snapshot::new(id, "Order", Version::new(9), serde_json::json!({})))
        .await;
    assert!(matches!(beyond, Err(EventStoreError::Validation(_))));
}
