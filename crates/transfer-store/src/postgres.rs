use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Partition, PartitionRange, TaskType, TransferId, TransferKey};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    OrphanQuery, OutboxQuery, RecordOutcome, Result, RetryQuery, SequenceAllocator, SequenceError,
    TaskJournal, Transfer, TransferStatus, TransferStoreError,
    store::TransferStore,
};

/// PostgreSQL-backed transfer store implementation.
///
/// Owns both the `transfer` table and the `task_journal` table, so the
/// orphan anti-join runs as a single partition-local query.
#[derive(Clone)]
pub struct PostgresTransferStore {
    pool: PgPool,
}

impl PostgresTransferStore {
    /// Creates a new PostgreSQL transfer store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_transfer(row: PgRow) -> Result<Transfer> {
        let status: TransferStatus = row.try_get::<String, _>("status_value")?.parse()?;
        Ok(Transfer {
            id: TransferId::new(row.try_get("id")?),
            partition: Partition::new(row.try_get("part")?),
            external_id: row.try_get("ext_id")?,
            suit: row.try_get("suit")?,
            status,
            created_at: row.try_get("create_date")?,
            next_retry_at: row.try_get("next_date_for_retry")?,
            published: row.try_get("is_sent_to_kafka")?,
        })
    }

    fn row_to_key(row: PgRow) -> Result<TransferKey> {
        Ok(TransferKey::new(
            TransferId::new(row.try_get("id")?),
            Partition::new(row.try_get("part")?),
        ))
    }
}

#[async_trait]
impl TransferStore for PostgresTransferStore {
    async fn insert(&self, transfer: &Transfer) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transfer (id, part, ext_id, suit, status_value, create_date, next_date_for_retry, is_sent_to_kafka)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(transfer.id.as_i64())
        .bind(transfer.partition.as_i32())
        .bind(&transfer.external_id)
        .bind(&transfer.suit)
        .bind(transfer.status.as_str())
        .bind(transfer.created_at)
        .bind(transfer.next_retry_at)
        .bind(transfer.published)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            // A unique violation on ext_id means re-ingestion, not corruption
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("transfer_ext_id_key")
            {
                return TransferStoreError::DuplicateExternalId(transfer.external_id.clone());
            }
            TransferStoreError::Database(e)
        })?;
        Ok(())
    }

    async fn load(&self, key: TransferKey) -> Result<Option<Transfer>> {
        let row = sqlx::query(
            r#"
            SELECT id, part, ext_id, suit, status_value, create_date, next_date_for_retry, is_sent_to_kafka
            FROM transfer
            WHERE id = $1 AND part = $2
            "#,
        )
        .bind(key.id.as_i64())
        .bind(key.partition.as_i32())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_transfer).transpose()
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Transfer>> {
        let row = sqlx::query(
            r#"
            SELECT id, part, ext_id, suit, status_value, create_date, next_date_for_retry, is_sent_to_kafka
            FROM transfer
            WHERE ext_id = $1
            "#,
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_transfer).transpose()
    }

    async fn find_by_external_id_in_range(
        &self,
        external_id: &str,
        range: PartitionRange,
    ) -> Result<Option<Transfer>> {
        let row = sqlx::query(
            r#"
            SELECT id, part, ext_id, suit, status_value, create_date, next_date_for_retry, is_sent_to_kafka
            FROM transfer
            WHERE ext_id = $1 AND part >= $2 AND part <= $3
            "#,
        )
        .bind(external_id)
        .bind(range.from().as_i32())
        .bind(range.to().as_i32())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_transfer).transpose()
    }

    async fn find_by_external_id_in_partition(
        &self,
        external_id: &str,
        partition: Partition,
    ) -> Result<Option<Transfer>> {
        let row = sqlx::query(
            r#"
            SELECT id, part, ext_id, suit, status_value, create_date, next_date_for_retry, is_sent_to_kafka
            FROM transfer
            WHERE ext_id = $1 AND part = $2
            "#,
        )
        .bind(external_id)
        .bind(partition.as_i32())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_transfer).transpose()
    }

    async fn find_by_suit(&self, suit: &str, partition: Partition) -> Result<Option<Transfer>> {
        let row = sqlx::query(
            r#"
            SELECT id, part, ext_id, suit, status_value, create_date, next_date_for_retry, is_sent_to_kafka
            FROM transfer
            WHERE suit = $1 AND part = $2
            "#,
        )
        .bind(suit)
        .bind(partition.as_i32())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_transfer).transpose()
    }

    async fn find_unpublished(&self, query: OutboxQuery) -> Result<Vec<TransferKey>> {
        let rows = sqlx::query(
            r#"
            SELECT id, part FROM transfer
            WHERE NOT is_sent_to_kafka AND create_date < $1 AND part >= $2 AND part <= $3
            LIMIT $4
            "#,
        )
        .bind(query.older_than)
        .bind(query.range.from().as_i32())
        .bind(query.range.to().as_i32())
        .bind(i64::from(query.limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_key).collect()
    }

    async fn find_due_for_retry(&self, query: RetryQuery) -> Result<Vec<TransferKey>> {
        let rows = sqlx::query(
            r#"
            SELECT id, part FROM transfer
            WHERE status_value = $1 AND next_date_for_retry <= $2 AND part >= $3 AND part <= $4
            LIMIT $5
            "#,
        )
        .bind(query.status.as_str())
        .bind(query.not_after)
        .bind(query.range.from().as_i32())
        .bind(query.range.to().as_i32())
        .bind(i64::from(query.limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_key).collect()
    }

    async fn find_orphans(&self, query: OrphanQuery) -> Result<Vec<TransferKey>> {
        let statuses: Vec<String> = query
            .statuses
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        // Two partition-local anti-joins unioned under one limit, the shape
        // that stays index-friendly on (part, status_value).
        let rows = sqlx::query(
            r#"
            (SELECT a.id, a.part FROM transfer a
             WHERE a.part = $1 AND a.status_value = ANY($2) AND a.create_date <= $3
               AND a.id NOT IN (SELECT b.id FROM task_journal b WHERE b.part = $1 AND b.task_type = $4))
            UNION ALL
            (SELECT a.id, a.part FROM transfer a
             WHERE a.part = $5 AND a.status_value = ANY($2) AND a.create_date <= $3
               AND a.id NOT IN (SELECT b.id FROM task_journal b WHERE b.part = $5 AND b.task_type = $4))
            LIMIT $6
            "#,
        )
        .bind(query.pair.lower().as_i32())
        .bind(&statuses)
        .bind(query.created_before)
        .bind(query.task_type.as_str())
        .bind(query.pair.upper().as_i32())
        .bind(i64::from(query.limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_key).collect()
    }

    async fn mark_published(&self, key: TransferKey) -> Result<()> {
        sqlx::query("UPDATE transfer SET is_sent_to_kafka = TRUE WHERE id = $1 AND part = $2")
            .bind(key.id.as_i64())
            .bind(key.partition.as_i32())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_retry_state(
        &self,
        key: TransferKey,
        status: TransferStatus,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE transfer SET status_value = $3, next_date_for_retry = $4 WHERE id = $1 AND part = $2",
        )
        .bind(key.id.as_i64())
        .bind(key.partition.as_i32())
        .bind(status.as_str())
        .bind(next_retry_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TaskJournal for PostgresTransferStore {
    async fn record(&self, key: TransferKey, task_type: &TaskType) -> Result<RecordOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO task_journal (id, part, task_type, create_date)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id, part, task_type) DO NOTHING
            "#,
        )
        .bind(key.id.as_i64())
        .bind(key.partition.as_i32())
        .bind(task_type.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            Ok(RecordOutcome::Recorded)
        } else {
            Ok(RecordOutcome::AlreadyRecorded)
        }
    }

    async fn contains(&self, key: TransferKey, task_type: &TaskType) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM task_journal WHERE id = $1 AND part = $2 AND task_type = $3)",
        )
        .bind(key.id.as_i64())
        .bind(key.partition.as_i32())
        .bind(task_type.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

/// Sequence allocator backed by a PostgreSQL sequence.
///
/// Fetches N values in a single round trip; uniqueness under concurrency is
/// the sequence's own guarantee, so concurrent callers can never receive
/// overlapping ranges.
#[derive(Clone)]
pub struct PostgresSequenceAllocator {
    pool: PgPool,
    sequence: String,
}

impl PostgresSequenceAllocator {
    /// Creates an allocator over the default `transfer_id_seq` sequence.
    pub fn new(pool: PgPool) -> Self {
        Self::with_sequence(pool, "transfer_id_seq")
    }

    /// Creates an allocator over a named sequence.
    pub fn with_sequence(pool: PgPool, sequence: impl Into<String>) -> Self {
        Self {
            pool,
            sequence: sequence.into(),
        }
    }
}

#[async_trait]
impl SequenceAllocator for PostgresSequenceAllocator {
    async fn allocate(&self, count: usize) -> std::result::Result<Vec<TransferId>, SequenceError> {
        let values: Vec<i64> =
            sqlx::query_scalar("SELECT nextval($1::regclass) FROM generate_series(1, $2)")
                .bind(&self.sequence)
                .bind(count as i64)
                .fetch_all(&self.pool)
                .await?;

        Ok(values.into_iter().map(TransferId::new).collect())
    }
}
