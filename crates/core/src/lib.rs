//! Scribe core - domain models, ports and services.
//!
//! This crate is the hexagon's center: it defines what the indexer does
//! (block loop, dispatcher, source registry, schema compiler) and the
//! ports adapters plug into (chain client, checkpoint store, entity
//! store). It knows nothing about PostgreSQL, HTTP or GraphQL servers.

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod ports;
pub mod registry;
pub mod schema;
pub mod services;

pub use error::{
    ChainError, ChainResult, IndexerError, IndexerResult, QueryError, RegistryError,
    RegistryResult, SchemaError, SchemaResult, StorageError, StorageResult,
};
pub use models::{Address, Block, CheckpointRecord, Event, Receipt, Selector, Transaction, TxType};
pub use registry::{EventBinding, RegistryHandle, Source, Template};
