//! Checkpoint store implementation for PostgreSQL.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use scribe_core::error::{StorageError, StorageResult};
use scribe_core::models::{Address, CheckpointRecord};
use scribe_core::ports::CheckpointStore;

use super::database::Database;

/// PostgreSQL implementation of [`CheckpointStore`].
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn get_metadata(&self, id: &str) -> StorageResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM _metadata WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(|r| r.try_get::<String, _>("value"))
            .transpose()
            .map_err(|e| StorageError::QueryError(e.to_string()))
    }

    async fn set_metadata(&self, id: &str, value: &str) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO _metadata (id, value)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(id)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    async fn insert_checkpoints(&self, records: &[CheckpointRecord]) -> StorageResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        build_checkpoint_insert(records)
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    async fn next_checkpoint_blocks(
        &self,
        from_block: u64,
        contracts: &[Address],
        limit: u64,
    ) -> StorageResult<Vec<u64>> {
        if contracts.is_empty() {
            return Ok(Vec::new());
        }
        let addresses: Vec<String> = contracts.iter().map(|a| a.as_str().to_string()).collect();

        let rows = sqlx::query(
            r#"
            SELECT DISTINCT block_number
            FROM _checkpoints
            WHERE block_number >= $1 AND contract_address = ANY($2)
            ORDER BY block_number ASC
            LIMIT $3
            "#,
        )
        .bind(from_block as i64)
        .bind(&addresses)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        rows.iter()
            .map(|r| {
                r.try_get::<i64, _>("block_number")
                    .map(|n| n as u64)
                    .map_err(|e| StorageError::QueryError(e.to_string()))
            })
            .collect()
    }
}

/// Bulk insert for a non-empty batch of checkpoint records.
///
/// Re-inserting an existing `(block, contract)` pair must stay a silent
/// no-op, so the statement always carries the conflict clause.
fn build_checkpoint_insert<'a>(records: &'a [CheckpointRecord]) -> QueryBuilder<'a, Postgres> {
    let mut builder =
        QueryBuilder::new("INSERT INTO _checkpoints (block_number, contract_address) ");
    builder.push_values(records, |mut b, record| {
        b.push_bind(record.block_number as i64)
            .push_bind(record.contract_address.as_str());
    });
    builder.push(" ON CONFLICT (block_number, contract_address) DO NOTHING");
    builder
}
