//! Chain client port.

use async_trait::async_trait;

use crate::error::ChainResult;
use crate::models::Block;

/// Read access to a chain node.
///
/// The block loop drives this one block at a time; implementations do not
/// retry internally, the loop owns the retry policy.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Fetches a full block (transactions and receipts) by height.
    ///
    /// Returns [`crate::error::ChainError::NotFound`] when the node has not
    /// produced the block yet.
    async fn get_block(&self, number: u64) -> ChainResult<Block>;

    /// Height of the node's current head.
    async fn latest_block(&self) -> ChainResult<u64>;
}
