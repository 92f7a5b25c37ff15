//! Governance handler set: spaces, proposals, votes, users.
//!
//! A factory contract deploys spaces; each space emits proposal and vote
//! events. Event payloads are positional felt arrays, decoded here with
//! the small helpers below.

pub mod handlers;

use std::sync::Arc;

use scribe_core::error::{ChainError, IndexerResult};
use scribe_core::ports::{EntityStore, HandlerRegistry};

pub use handlers::{
    CancelHandler, ProposeHandler, SpaceCreatedHandler, SpaceDeployedHandler, VoteHandler,
};

/// Entity schema backing the governance handlers.
pub const GOVERNANCE_SCHEMA: &str = include_str!("schema.graphql");

/// Registers the whole governance handler set against one entity store.
pub fn register_governance_handlers(registry: &mut HandlerRegistry, store: Arc<dyn EntityStore>) {
    registry.register(Arc::new(SpaceDeployedHandler));
    registry.register(Arc::new(SpaceCreatedHandler::new(store.clone())));
    registry.register(Arc::new(ProposeHandler::new(store.clone())));
    registry.register(Arc::new(VoteHandler::new(store.clone())));
    registry.register(Arc::new(CancelHandler::new(store)));
}

/// Decodes a hex felt into a u64, rejecting values that do not fit.
pub(crate) fn felt_to_u64(raw: &str) -> IndexerResult<u64> {
    let hex_part = raw.strip_prefix("0x").unwrap_or(raw);
    u64::from_str_radix(hex_part, 16)
        .map_err(|e| ChainError::Decode(format!("felt '{raw}': {e}")).into())
}

/// Decodes an 18-decimal fixed-point voting power felt into a float.
pub(crate) fn felt_to_voting_power(raw: &str) -> IndexerResult<f64> {
    let hex_part = raw.strip_prefix("0x").unwrap_or(raw);
    let units = u128::from_str_radix(hex_part, 16)
        .map_err(|e| ChainError::Decode(format!("felt '{raw}': {e}")))?;
    Ok(units as f64 / 1e18)
}

/// Positional payload accessor with a decode error on short arrays.
pub(crate) fn payload_at<'a>(data: &'a [String], index: usize) -> IndexerResult<&'a str> {
    data.get(index)
        .map(String::as_str)
        .ok_or_else(|| ChainError::Decode(format!("event payload too short: want index {index}")).into())
}
