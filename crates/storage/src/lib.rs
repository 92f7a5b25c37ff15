//! Scribe storage - PostgreSQL adapters.
//!
//! Implements the core's storage ports: the checkpoint/metadata store and
//! the entity store backed by the tables the schema compiler generated.

pub mod postgres;

pub use postgres::{Database, DatabaseConfig, PgCheckpointStore, PgEntityStore};
