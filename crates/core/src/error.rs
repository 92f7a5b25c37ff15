//! Error types for the indexer domain layer.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`ChainError`] - Chain node RPC errors (transient, retried by the loop)
//! - [`StorageError`] - Database/store errors (fatal for the current block)
//! - [`SchemaError`] - Entity schema compilation errors (prevent startup)
//! - [`RegistryError`] - Source/template/handler registry errors
//! - [`QueryError`] - Query surface argument violations
//! - [`IndexerError`] - Top-level orchestration errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

// =============================================================================
// Chain Errors
// =============================================================================

/// Chain node RPC and connectivity errors.
///
/// These are the only errors the block loop treats as transient: a failed
/// fetch is retried indefinitely with a fixed backoff and never skips a
/// block.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The requested block does not exist on the node (yet).
    #[error("Block not found: {0}")]
    NotFound(u64),

    /// Network-level failure talking to the node.
    #[error("Network error: {0}")]
    Network(String),

    /// The node answered with an RPC-level error.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// The node's response could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Database and store errors.
///
/// Store operations are not retried internally; a storage failure
/// propagates to the caller and aborts the in-flight block.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to establish a database connection.
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    /// SQL query execution failed.
    #[error("Query execution error: {0}")]
    QueryError(String),

    /// Transaction commit/rollback failed.
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// Data serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A handler targeted an entity or column the compiled schema
    /// does not declare.
    #[error("Unknown entity or column: {0}")]
    UnknownEntity(String),
}

// =============================================================================
// Schema Errors
// =============================================================================

/// Entity schema compilation errors.
///
/// Raised once, at startup, when the declarative schema is compiled into
/// its typed representation. Any of these prevents the process from
/// starting.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// An entity does not declare the mandatory `id` field.
    #[error("'id' field is missing in entity '{0}'. All entities must declare an id field")]
    MissingIdField(String),

    /// An entity's `id` field is not a scalar type.
    #[error("'id' field of entity '{entity}' has non-scalar type '{ty}'")]
    NonScalarId { entity: String, ty: String },

    /// A field uses a type the column rule table does not know.
    #[error("Unknown field type '{ty}' on '{entity}.{field}'")]
    UnknownFieldType {
        entity: String,
        field: String,
        ty: String,
    },

    /// The schema document itself could not be parsed.
    #[error("Invalid schema: {0}")]
    Invalid(String),
}

// =============================================================================
// Registry Errors
// =============================================================================

/// Source registry and handler resolution errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A handler referenced a template name that was never declared.
    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    /// A manifest entry referenced a handler id that is not registered.
    #[error("Unknown handler: {0}")]
    UnknownHandler(String),

    /// A contract address failed canonicalization.
    #[error("Invalid contract address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
}

// =============================================================================
// Query Errors
// =============================================================================

/// Query surface argument violations.
///
/// These fail fast with a descriptive error instead of silently clamping.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Requested page size exceeds the configured maximum.
    #[error("Requested limit {requested} exceeds maximum of {max}")]
    LimitExceeded { requested: u64, max: u64 },
}

// =============================================================================
// Indexer Errors
// =============================================================================

/// Top-level indexer orchestration errors.
///
/// This is the main error type returned by the indexer service. It wraps
/// all lower-level errors and adds orchestration-specific variants.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Chain connectivity error that escaped the retry loop (fatal
    /// contexts only, e.g. resolving the node's head at startup).
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    /// Storage/database error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Schema compilation error.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Registry error.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// A handler failed while processing a block.
    #[error("Handler '{handler}' failed at block {block}: {message}")]
    HandlerFailed {
        handler: String,
        block: u64,
        message: String,
    },

    /// Invalid configuration or manifest.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Graceful shutdown was requested.
    ///
    /// Not really an error but uses the error type for control flow.
    #[error("Indexer shutdown requested")]
    ShutdownRequested,
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for indexer operations.
pub type IndexerResult<T> = Result<T, IndexerError>;

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for schema compilation.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
