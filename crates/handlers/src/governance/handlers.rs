//! The governance event handlers.
//!
//! Counters (`proposal_count`, `vote_count`, the score columns) are
//! read-modify-write: handlers are the only writer and the block loop
//! runs them sequentially, so no two updates race.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use scribe_core::error::{ChainError, IndexerError, IndexerResult};
use scribe_core::models::Address;
use scribe_core::ports::{EntityStore, EventHandler, HandlerCtx};

use super::{felt_to_u64, felt_to_voting_power, payload_at};

/// Fetches an existing row or fails; used where a parent entity must
/// already exist (a vote on an unknown proposal is a hard error).
async fn require_row(store: &dyn EntityStore, entity: &str, id: &str) -> IndexerResult<Value> {
    store
        .get(entity, id)
        .await?
        .ok_or_else(|| IndexerError::ConfigError(format!("{entity} '{id}' not found")))
}

fn counter(row: &Value, field: &str) -> i64 {
    row[field].as_i64().unwrap_or(0)
}

fn score(row: &Value, field: &str) -> f64 {
    row[field].as_f64().unwrap_or(0.0)
}

// =============================================================================
// SpaceDeployed
// =============================================================================

/// Factory event: a new space contract was deployed.
///
/// Payload: `[space_address]`. Instantiates the `Space` template so the
/// new contract's history is picked up from the current block.
pub struct SpaceDeployedHandler;

#[async_trait]
impl EventHandler for SpaceDeployedHandler {
    fn id(&self) -> &'static str {
        "handle_space_deployed"
    }

    async fn call(&self, ctx: HandlerCtx<'_>) -> IndexerResult<()> {
        let Some(event) = ctx.event else {
            return Ok(());
        };
        let space = Address::parse(payload_at(&event.data, 0)?)?;

        info!("🚀 Space deployed at {}", space);
        ctx.registry
            .instantiate("Space", space, ctx.block.block_number)?;
        Ok(())
    }
}

// =============================================================================
// SpaceCreated
// =============================================================================

/// Space initialization event, emitted by the space contract itself.
///
/// Payload: `[space_address, controller, voting_delay]`.
pub struct SpaceCreatedHandler {
    store: Arc<dyn EntityStore>,
}

impl SpaceCreatedHandler {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for SpaceCreatedHandler {
    fn id(&self) -> &'static str {
        "handle_space_created"
    }

    async fn call(&self, ctx: HandlerCtx<'_>) -> IndexerResult<()> {
        let Some(event) = ctx.event else {
            return Ok(());
        };
        let space = Address::parse(payload_at(&event.data, 0)?)?;
        let controller = Address::parse(payload_at(&event.data, 1)?)?;
        let voting_delay = felt_to_u64(payload_at(&event.data, 2)?)?;

        debug!(space = %space, "Space created");
        // Replays are no-ops thanks to the id conflict
        self.store
            .insert_ignore(
                "Space",
                &json!({
                    "id": space.as_str(),
                    "controller": controller.as_str(),
                    "voting_delay": voting_delay,
                    "proposal_count": 0,
                    "vote_count": 0,
                    "created": ctx.block.timestamp,
                    "tx": ctx.transaction.hash,
                }),
            )
            .await?;
        Ok(())
    }
}

// =============================================================================
// Propose
// =============================================================================

/// New proposal event.
///
/// Payload: `[proposal_id, author]`. The emitting contract is the space.
pub struct ProposeHandler {
    store: Arc<dyn EntityStore>,
}

impl ProposeHandler {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for ProposeHandler {
    fn id(&self) -> &'static str {
        "handle_propose"
    }

    async fn call(&self, ctx: HandlerCtx<'_>) -> IndexerResult<()> {
        let Some(event) = ctx.event else {
            return Ok(());
        };
        let space = ctx.source.address.clone();
        let proposal_id = felt_to_u64(payload_at(&event.data, 0)?)?;
        let author = Address::parse(payload_at(&event.data, 1)?)?;
        let created = ctx.block.timestamp;

        debug!(space = %space, proposal = proposal_id, "Proposal created");
        self.store
            .insert_ignore(
                "Proposal",
                &json!({
                    "id": format!("{space}/{proposal_id}"),
                    "proposal_id": proposal_id,
                    "space": space.as_str(),
                    "author": author.as_str(),
                    "metadata_uri": null,
                    "scores_1": 0.0,
                    "scores_2": 0.0,
                    "scores_3": 0.0,
                    "scores_total": 0.0,
                    "vote_count": 0,
                    "cancelled": false,
                    "created": created,
                    "tx": ctx.transaction.hash,
                }),
            )
            .await?;

        let space_row = require_row(self.store.as_ref(), "Space", space.as_str()).await?;
        self.store
            .update_fields(
                "Space",
                space.as_str(),
                &json!({ "proposal_count": counter(&space_row, "proposal_count") + 1 }),
            )
            .await?;

        self.store
            .insert_ignore(
                "User",
                &json!({
                    "id": author.as_str(),
                    "proposal_count": 0,
                    "vote_count": 0,
                    "created": created,
                }),
            )
            .await?;
        let user_row = require_row(self.store.as_ref(), "User", author.as_str()).await?;
        self.store
            .update_fields(
                "User",
                author.as_str(),
                &json!({ "proposal_count": counter(&user_row, "proposal_count") + 1 }),
            )
            .await?;
        Ok(())
    }
}

// =============================================================================
// Vote
// =============================================================================

/// Vote cast event.
///
/// Payload: `[proposal_id, voter, choice, voting_power]`; `choice` is
/// 1 (for), 2 (against) or 3 (abstain) and selects the score column the
/// voting power lands in.
pub struct VoteHandler {
    store: Arc<dyn EntityStore>,
}

impl VoteHandler {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for VoteHandler {
    fn id(&self) -> &'static str {
        "handle_vote"
    }

    async fn call(&self, ctx: HandlerCtx<'_>) -> IndexerResult<()> {
        let Some(event) = ctx.event else {
            return Ok(());
        };
        let space = ctx.source.address.clone();
        let proposal_id = felt_to_u64(payload_at(&event.data, 0)?)?;
        let voter = Address::parse(payload_at(&event.data, 1)?)?;
        let choice = felt_to_u64(payload_at(&event.data, 2)?)?;
        let vp = felt_to_voting_power(payload_at(&event.data, 3)?)?;
        let created = ctx.block.timestamp;

        if !(1..=3).contains(&choice) {
            return Err(ChainError::Decode(format!("invalid vote choice {choice}")).into());
        }
        let score_column = format!("scores_{choice}");

        debug!(space = %space, proposal = proposal_id, voter = %voter, "Vote cast");
        self.store
            .insert_ignore(
                "Vote",
                &json!({
                    "id": format!("{space}/{proposal_id}/{voter}"),
                    "space": space.as_str(),
                    "proposal": proposal_id,
                    "voter": voter.as_str(),
                    "choice": choice,
                    "vp": vp,
                    "created": created,
                }),
            )
            .await?;

        let space_row = require_row(self.store.as_ref(), "Space", space.as_str()).await?;
        self.store
            .update_fields(
                "Space",
                space.as_str(),
                &json!({ "vote_count": counter(&space_row, "vote_count") + 1 }),
            )
            .await?;

        let proposal_key = format!("{space}/{proposal_id}");
        let proposal_row = require_row(self.store.as_ref(), "Proposal", &proposal_key).await?;
        let mut patch = serde_json::Map::new();
        patch.insert(
            "vote_count".into(),
            json!(counter(&proposal_row, "vote_count") + 1),
        );
        patch.insert(
            "scores_total".into(),
            json!(score(&proposal_row, "scores_total") + vp),
        );
        patch.insert(
            score_column.clone(),
            json!(score(&proposal_row, &score_column) + vp),
        );
        self.store
            .update_fields("Proposal", &proposal_key, &Value::Object(patch))
            .await?;

        self.store
            .insert_ignore(
                "User",
                &json!({
                    "id": voter.as_str(),
                    "proposal_count": 0,
                    "vote_count": 0,
                    "created": created,
                }),
            )
            .await?;
        let user_row = require_row(self.store.as_ref(), "User", voter.as_str()).await?;
        self.store
            .update_fields(
                "User",
                voter.as_str(),
                &json!({ "vote_count": counter(&user_row, "vote_count") + 1 }),
            )
            .await?;
        Ok(())
    }
}

// =============================================================================
// Cancel
// =============================================================================

/// Proposal cancellation event.
///
/// Payload: `[proposal_id]`. Marks the proposal cancelled and takes its
/// votes back out of the space totals.
pub struct CancelHandler {
    store: Arc<dyn EntityStore>,
}

impl CancelHandler {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for CancelHandler {
    fn id(&self) -> &'static str {
        "handle_cancel"
    }

    async fn call(&self, ctx: HandlerCtx<'_>) -> IndexerResult<()> {
        let Some(event) = ctx.event else {
            return Ok(());
        };
        let space = ctx.source.address.clone();
        let proposal_id = felt_to_u64(payload_at(&event.data, 0)?)?;
        let proposal_key = format!("{space}/{proposal_id}");

        debug!(space = %space, proposal = proposal_id, "Proposal cancelled");
        let proposal_row = require_row(self.store.as_ref(), "Proposal", &proposal_key).await?;
        let votes = counter(&proposal_row, "vote_count");

        self.store
            .update_fields("Proposal", &proposal_key, &json!({ "cancelled": true }))
            .await?;

        let space_row = require_row(self.store.as_ref(), "Space", space.as_str()).await?;
        self.store
            .update_fields(
                "Space",
                space.as_str(),
                &json!({
                    "proposal_count": counter(&space_row, "proposal_count") - 1,
                    "vote_count": counter(&space_row, "vote_count") - votes,
                }),
            )
            .await?;
        Ok(())
    }
}
