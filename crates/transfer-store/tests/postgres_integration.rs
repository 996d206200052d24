//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency; `#[serial]`
//! keeps them from racing on the shared tables.

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{BoundaryPair, Partition, PartitionRange, TaskType, TransferId, TransferKey};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use transfer_store::{
    OrphanQuery, OutboxQuery, PostgresSequenceAllocator, PostgresTransferStore, RecordOutcome,
    RetryQuery, SequenceAllocator, TaskJournal, Transfer, TransferStatus, TransferStore,
    TransferStoreError,
};

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            // Create a temporary pool just for migrations
            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            // Run migrations using raw_sql to execute multiple statements
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_transfer_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresTransferStore {
    let info = get_container_info().await;

    // Create a fresh pool for each test to avoid connection issues
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    // Clear tables for test isolation
    sqlx::query("TRUNCATE TABLE transfer, task_journal")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("ALTER SEQUENCE transfer_id_seq RESTART WITH 1")
        .execute(&pool)
        .await
        .unwrap();

    PostgresTransferStore::new(pool)
}

fn transfer(id: i64, partition: i32, ext: &str) -> Transfer {
    Transfer::builder()
        .id(TransferId::new(id))
        .partition(Partition::new(partition))
        .external_id(ext)
        .suit(format!("suit-{ext}"))
        .build()
}

fn range(from: i32, to: i32) -> PartitionRange {
    PartitionRange::new(Partition::new(from), Partition::new(to)).unwrap()
}

#[tokio::test]
#[serial]
async fn insert_and_load_roundtrip() {
    let store = get_test_store().await;
    let t = transfer(1, 3, "A1");
    store.insert(&t).await.unwrap();

    let loaded = store.load(t.key()).await.unwrap().unwrap();
    assert_eq!(loaded.external_id, "A1");
    assert_eq!(loaded.suit, "suit-A1");
    assert_eq!(loaded.status, TransferStatus::New);
    assert!(!loaded.published);
}

#[tokio::test]
#[serial]
async fn insert_maps_duplicate_external_id() {
    let store = get_test_store().await;
    store.insert(&transfer(1, 3, "A1")).await.unwrap();

    let err = store.insert(&transfer(2, 4, "A1")).await.unwrap_err();
    assert!(matches!(
        err,
        TransferStoreError::DuplicateExternalId(id) if id == "A1"
    ));
}

#[tokio::test]
#[serial]
async fn external_id_lookup_scopes() {
    let store = get_test_store().await;
    store.insert(&transfer(1, 3, "A1")).await.unwrap();

    assert!(store.find_by_external_id("A1").await.unwrap().is_some());
    assert!(
        store
            .find_by_external_id_in_range("A1", range(0, 5))
            .await
            .unwrap()
            .is_some()
    );
    assert!(
        store
            .find_by_external_id_in_range("A1", range(4, 9))
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        store
            .find_by_external_id_in_partition("A1", Partition::new(3))
            .await
            .unwrap()
            .is_some()
    );
    assert!(
        store
            .find_by_suit("suit-A1", Partition::new(3))
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
#[serial]
async fn outbox_query_filters_and_limits() {
    let store = get_test_store().await;
    let old = Utc::now() - Duration::minutes(5);

    for i in 0..5 {
        let mut t = transfer(i, 3, &format!("A{i}"));
        t.created_at = old;
        store.insert(&t).await.unwrap();
    }
    let mut published = transfer(10, 3, "published");
    published.created_at = old;
    published.published = true;
    store.insert(&published).await.unwrap();

    let keys = store
        .find_unpublished(OutboxQuery::new(
            Utc::now() - Duration::seconds(1),
            range(0, 5),
            3,
        ))
        .await
        .unwrap();
    assert_eq!(keys.len(), 3);
    assert!(!keys.contains(&published.key()));
}

#[tokio::test]
#[serial]
async fn retry_query_respects_deadline_and_status() {
    let store = get_test_store().await;
    let now = Utc::now();

    let mut due = transfer(1, 2, "due");
    due.status = TransferStatus::Retry;
    due.next_retry_at = Some(now - Duration::seconds(30));
    store.insert(&due).await.unwrap();

    let mut future = transfer(2, 2, "future");
    future.status = TransferStatus::Retry;
    future.next_retry_at = Some(now + Duration::minutes(10));
    store.insert(&future).await.unwrap();

    let keys = store
        .find_due_for_retry(RetryQuery::new(TransferStatus::Retry, now, range(0, 5), 10))
        .await
        .unwrap();
    assert_eq!(keys, vec![due.key()]);
}

#[tokio::test]
#[serial]
async fn orphan_query_unions_boundary_pair_with_anti_join() {
    let store = get_test_store().await;
    let yesterday = Utc::now() - Duration::days(1);
    let task = TaskType::new("SEND");

    let mut orphan_lower = transfer(1, 5, "lower");
    orphan_lower.status = TransferStatus::PendingTask;
    orphan_lower.created_at = yesterday;
    store.insert(&orphan_lower).await.unwrap();

    let mut orphan_upper = transfer(2, 6, "upper");
    orphan_upper.status = TransferStatus::PendingTask;
    orphan_upper.created_at = yesterday;
    store.insert(&orphan_upper).await.unwrap();

    let mut journaled = transfer(3, 5, "journaled");
    journaled.status = TransferStatus::PendingTask;
    journaled.created_at = yesterday;
    store.insert(&journaled).await.unwrap();
    store.record(journaled.key(), &task).await.unwrap();

    let pair = BoundaryPair::new(Partition::new(5), Partition::new(6)).unwrap();
    let keys = store
        .find_orphans(OrphanQuery::new(
            vec![TransferStatus::PendingTask],
            task,
            Utc::now(),
            pair,
            100,
        ))
        .await
        .unwrap();

    assert_eq!(keys.len(), 2);
    assert!(keys.contains(&orphan_lower.key()));
    assert!(keys.contains(&orphan_upper.key()));
}

#[tokio::test]
#[serial]
async fn journal_record_converges() {
    let store = get_test_store().await;
    let key = TransferKey::new(TransferId::new(1), Partition::new(3));
    let task = TaskType::new("SEND");

    assert_eq!(
        store.record(key, &task).await.unwrap(),
        RecordOutcome::Recorded
    );
    assert_eq!(
        store.record(key, &task).await.unwrap(),
        RecordOutcome::AlreadyRecorded
    );
    assert!(store.contains(key, &task).await.unwrap());
}

#[tokio::test]
#[serial]
async fn mark_published_only_advances() {
    let store = get_test_store().await;
    let t = transfer(1, 3, "A1");
    store.insert(&t).await.unwrap();

    store.mark_published(t.key()).await.unwrap();
    store.mark_published(t.key()).await.unwrap();

    let loaded = store.load(t.key()).await.unwrap().unwrap();
    assert!(loaded.published);
}

#[tokio::test]
#[serial]
async fn set_retry_state_updates_row() {
    let store = get_test_store().await;
    let t = transfer(1, 3, "A1");
    store.insert(&t).await.unwrap();

    let at = Utc::now() + Duration::minutes(5);
    store
        .set_retry_state(t.key(), TransferStatus::Retry, Some(at))
        .await
        .unwrap();

    let loaded = store.load(t.key()).await.unwrap().unwrap();
    assert_eq!(loaded.status, TransferStatus::Retry);
    let stored_at = loaded.next_retry_at.unwrap();
    assert!((stored_at - at).num_milliseconds().abs() < 10);
}

#[tokio::test]
#[serial]
async fn sequence_allocates_disjoint_batches() {
    let store = get_test_store().await;
    let allocator = PostgresSequenceAllocator::new(store.pool().clone());

    let first = allocator.allocate(10).await.unwrap();
    let second = allocator.allocate(10).await.unwrap();

    assert_eq!(first.len(), 10);
    assert_eq!(second.len(), 10);

    let mut seen = std::collections::HashSet::new();
    for id in first.iter().chain(second.iter()) {
        assert!(seen.insert(*id), "id {id} allocated twice");
    }
    // Batches are monotonic: everything in the second batch is above the first.
    assert!(second.iter().min() > first.iter().max());
}
