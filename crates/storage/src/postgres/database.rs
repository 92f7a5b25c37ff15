//! PostgreSQL database connection and configuration.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info, instrument};

use scribe_core::error::{StorageError, StorageResult};
use scribe_core::schema::ddl::{create_schema_statements, drop_schema_statements};
use scribe_core::schema::EntitySchema;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Minimum number of connections to maintain.
    pub min_connections: u32,
    /// Connection acquisition timeout.
    pub acquire_timeout: Duration,
    /// Idle connection timeout.
    pub idle_timeout: Duration,
    /// Maximum connection lifetime.
    pub max_lifetime: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/scribe".to_string(),
            max_connections: 20,
            min_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl DatabaseConfig {
    /// Create a configuration optimized for the indexer write path.
    pub fn for_indexer(url: &str) -> Self {
        Self {
            url: url.to_string(),
            max_connections: 10,
            min_connections: 3,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }

    /// Create a configuration optimized for GraphQL queries.
    pub fn for_graphql(url: &str) -> Self {
        Self {
            url: url.to_string(),
            max_connections: 15,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
            max_lifetime: Duration::from_secs(900),
        }
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to the database with the given configuration.
    #[instrument(skip_all)]
    pub async fn connect(config: &DatabaseConfig) -> StorageResult<Self> {
        debug!(
            max_conn = config.max_connections,
            min_conn = config.min_connections,
            "Creating connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .connect(&config.url)
            .await
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;

        debug!("Connection pool created");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the internal progress tables if they do not exist.
    ///
    /// `_metadata` holds free-form key/value progress (the cursor lives
    /// under `last_indexed_block`); `_checkpoints` records which contract
    /// was active at which block.
    #[instrument(skip(self))]
    pub async fn init_core_tables(&self) -> StorageResult<()> {
        debug!("Creating core tables");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _metadata (
                id VARCHAR(64) NOT NULL,
                value VARCHAR(128) NOT NULL,
                PRIMARY KEY (id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _checkpoints (
                block_number BIGINT NOT NULL,
                contract_address VARCHAR(66) NOT NULL,
                PRIMARY KEY (block_number, contract_address)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        debug!("Core tables ready");
        Ok(())
    }

    /// Create the entity tables and indexes for a compiled schema.
    #[instrument(skip_all)]
    pub async fn create_entity_tables(&self, schema: &EntitySchema) -> StorageResult<()> {
        for statement in create_schema_statements(schema) {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::QueryError(e.to_string()))?;
        }
        info!(entities = schema.entities.len(), "🗄️  Entity tables ready");
        Ok(())
    }

    /// Drop all indexed state and start over: entity tables, checkpoint
    /// records and the cursor.
    #[instrument(skip_all)]
    pub async fn reset(&self, schema: &EntitySchema) -> StorageResult<()> {
        for statement in drop_schema_statements(schema) {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::QueryError(e.to_string()))?;
        }

        sqlx::query("TRUNCATE _checkpoints")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;
        sqlx::query("TRUNCATE _metadata")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        self.create_entity_tables(schema).await?;

        info!("🗑️  Indexed state reset");
        Ok(())
    }

    /// Check if the database connection is healthy.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
