//! Ports (interfaces) for the hexagonal architecture.
//!
//! These traits define the boundaries between the domain core and the
//! outside world. Adapters (chain client, PostgreSQL stores) implement
//! them; services depend only on the traits.

pub mod chain_client;
pub mod checkpoint_store;
pub mod entity_store;
pub mod handler;

pub use chain_client::ChainClient;
pub use checkpoint_store::{
    validate_checkpoint_limit, CheckpointStore, DEFAULT_CHECKPOINT_FETCH_LIMIT,
    MAX_CHECKPOINT_QUERY_LIMIT,
};
pub use entity_store::{EntityFilter, EntityQuery, EntityStore, FilterOp};
pub use handler::{EventHandler, HandlerCtx, HandlerRegistry};
