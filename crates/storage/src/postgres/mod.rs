//! PostgreSQL implementations of the storage ports.

pub mod checkpoint_repo;
pub mod database;
pub mod entity_store;

pub use checkpoint_repo::PgCheckpointStore;
pub use database::{Database, DatabaseConfig};
pub use entity_store::PgEntityStore;
