//! Checkpoint and metadata store port.

use async_trait::async_trait;

use crate::error::{QueryError, StorageError, StorageResult};
use crate::models::{Address, CheckpointRecord};

/// Page size used when the indexer replays checkpointed history for a
/// freshly instantiated source.
pub const DEFAULT_CHECKPOINT_FETCH_LIMIT: u64 = 15;

/// Hard cap on the page size of the public checkpoint query.
pub const MAX_CHECKPOINT_QUERY_LIMIT: u64 = 1000;

/// Durable indexing progress: free-form metadata plus the set of
/// `(block, contract)` records the dispatcher produced.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Reads a metadata value, `None` when the key was never written.
    async fn get_metadata(&self, id: &str) -> StorageResult<Option<String>>;

    /// Writes a metadata value. Last write wins.
    async fn set_metadata(&self, id: &str, value: &str) -> StorageResult<()>;

    /// Records checkpoint rows. Idempotent: re-inserting an existing
    /// `(block, contract)` pair is a silent no-op, as is an empty slice.
    async fn insert_checkpoints(&self, records: &[CheckpointRecord]) -> StorageResult<()>;

    /// Distinct block numbers at or above `from_block` with recorded
    /// activity for any of `contracts`, ascending, at most `limit`.
    async fn next_checkpoint_blocks(
        &self,
        from_block: u64,
        contracts: &[Address],
        limit: u64,
    ) -> StorageResult<Vec<u64>>;

    /// Reads a metadata value and parses it as a block number.
    async fn get_metadata_u64(&self, id: &str) -> StorageResult<Option<u64>> {
        match self.get_metadata(id).await? {
            None => Ok(None),
            Some(raw) => raw
                .parse::<u64>()
                .map(Some)
                .map_err(|e| StorageError::SerializationError(format!("metadata '{id}': {e}"))),
        }
    }
}

/// Rejects checkpoint query limits above the hard cap.
///
/// Called by the query surface before the store is touched, so an
/// oversized request never reaches the database.
pub fn validate_checkpoint_limit(limit: u64) -> Result<(), QueryError> {
    if limit > MAX_CHECKPOINT_QUERY_LIMIT {
        return Err(QueryError::LimitExceeded {
            requested: limit,
            max: MAX_CHECKPOINT_QUERY_LIMIT,
        });
    }
    Ok(())
}
