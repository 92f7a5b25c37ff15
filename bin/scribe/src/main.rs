//! Scribe - checkpoint-based contract event indexer.
//!
//! # Usage
//!
//! ```bash
//! # Start with default config
//! scribe --manifest manifest.json
//!
//! # Start with environment overrides
//! DATABASE_URL=postgres://localhost/scribe GATEWAY_URL=https://gateway.example scribe
//! ```

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use tracing_subscriber::{fmt, EnvFilter};

use scribe_chain::HttpChainClient;
use scribe_core::config::{parse_checkpoint_seeds, Manifest};
use scribe_core::error::IndexerError;
use scribe_core::metrics::init_metrics;
use scribe_core::ports::{ChainClient, CheckpointStore, EntityStore, HandlerRegistry};
use scribe_core::registry::RegistryHandle;
use scribe_core::schema::{self, EntitySchema};
use scribe_core::services::{IndexerConfig, IndexerService, TokioSleeper};
use scribe_graphql::{build_schema, serve_with_shutdown, ServerConfig};
use scribe_handlers::{register_governance_handlers, GOVERNANCE_SCHEMA};
use scribe_storage::{Database, DatabaseConfig, PgCheckpointStore, PgEntityStore};

/// Scribe CLI - contract event indexer.
#[derive(Parser, Debug)]
#[command(name = "scribe")]
#[command(about = "Scribe - checkpoint-based contract event indexer")]
#[command(version)]
struct Cli {
    /// Chain gateway base URL.
    #[arg(long, env = "GATEWAY_URL", default_value = "http://127.0.0.1:5050")]
    gateway_url: String,

    /// PostgreSQL database URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost/scribe"
    )]
    database_url: String,

    /// Path to the source manifest (contracts, events, templates).
    #[arg(long, env = "MANIFEST_PATH", default_value = "manifest.json")]
    manifest: String,

    /// Path to an entity schema file. Defaults to the built-in
    /// governance schema.
    #[arg(long, env = "SCHEMA_PATH")]
    schema: Option<String>,

    /// GraphQL server port.
    #[arg(long, env = "GRAPHQL_PORT", default_value = "4000")]
    graphql_port: u16,

    /// Prometheus metrics port.
    #[arg(long, env = "METRICS_PORT", default_value = "9090")]
    metrics_port: u16,

    /// Enable JSON log output.
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,

    /// Drop all indexed state (entity tables, checkpoints, cursor) and exit.
    ///
    /// The internal tables are recreated empty; the indexer will start
    /// from the manifest start blocks on next run.
    #[arg(long)]
    reset: bool,

    /// Skip confirmation prompt for destructive operations (like --reset).
    #[arg(long, short = 'y')]
    yes: bool,

    /// Load checkpoint records from a JSON seed file before starting.
    ///
    /// Useful to pre-populate the replay index from an export, so a fresh
    /// deployment can backfill without re-scanning the chain.
    #[arg(long)]
    seed_checkpoints: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    // Prometheus metrics exporter (optional - failures don't crash the app)
    let metrics_enabled = match format!("0.0.0.0:{}", cli.metrics_port).parse::<std::net::SocketAddr>()
    {
        Ok(metrics_addr) => {
            match PrometheusBuilder::new()
                .with_http_listener(metrics_addr)
                .install()
            {
                Ok(()) => {
                    init_metrics();
                    true
                }
                Err(e) => {
                    warn!(
                        "⚠️  Failed to start metrics exporter: {}. Continuing without metrics.",
                        e
                    );
                    false
                }
            }
        }
        Err(e) => {
            warn!("⚠️  Invalid metrics address: {}. Continuing without metrics.", e);
            false
        }
    };

    // ─────────────────────────────────────────────────────────────────────────
    // 🚀 STARTUP
    // ─────────────────────────────────────────────────────────────────────────
    info!("🚀 Starting Scribe");
    debug!(gateway_url = %cli.gateway_url, "Chain gateway");
    debug!(database_url = %mask_password(&cli.database_url), "Database endpoint");

    // ─────────────────────────────────────────────────────────────────────────
    // 📜 SCHEMA
    // ─────────────────────────────────────────────────────────────────────────
    let sdl = match &cli.schema {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read schema file '{path}'"))?,
        None => GOVERNANCE_SCHEMA.to_string(),
    };
    let entities = Arc::new(schema::compile(&sdl).context("Failed to compile entity schema")?);
    info!(entities = entities.entities.len(), "📜 Entity schema compiled");

    // ─────────────────────────────────────────────────────────────────────────
    // 🗄️ DATABASE
    // ─────────────────────────────────────────────────────────────────────────
    let indexer_db_config = DatabaseConfig::for_indexer(&cli.database_url);
    let graphql_db_config = DatabaseConfig::for_graphql(&cli.database_url);

    info!("🗄️  Connecting to database...");
    let db = Database::connect(&indexer_db_config)
        .await
        .context("Failed to connect to database")?;

    db.init_core_tables()
        .await
        .context("Failed to create core tables")?;

    if cli.reset {
        return handle_reset(&db, &entities, cli.yes).await;
    }

    db.create_entity_tables(&entities)
        .await
        .context("Failed to create entity tables")?;

    let checkpoints: Arc<PgCheckpointStore> = Arc::new(PgCheckpointStore::new(&db));

    if let Some(path) = &cli.seed_checkpoints {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read checkpoint seed file '{path}'"))?;
        let records = parse_checkpoint_seeds(&raw)?;
        let count = records.len();
        checkpoints
            .insert_checkpoints(&records)
            .await
            .context("Failed to seed checkpoints")?;
        info!(count, "⏪ Checkpoint seeds loaded");
    }

    let graphql_db = Database::connect(&graphql_db_config)
        .await
        .context("Failed to create GraphQL database pool")?;

    let indexer_store: Arc<dyn EntityStore> =
        Arc::new(PgEntityStore::new(&db, entities.clone()));
    let graphql_store: Arc<dyn EntityStore> =
        Arc::new(PgEntityStore::new(&graphql_db, entities.clone()));
    let graphql_checkpoints: Arc<dyn CheckpointStore> =
        Arc::new(PgCheckpointStore::new(&graphql_db));

    // ─────────────────────────────────────────────────────────────────────────
    // 📦 HANDLERS + MANIFEST
    // ─────────────────────────────────────────────────────────────────────────
    let mut handlers = HandlerRegistry::new();
    register_governance_handlers(&mut handlers, indexer_store);
    info!(handlers = handlers.len(), "📦 Handlers registered");

    let raw_manifest = std::fs::read_to_string(&cli.manifest)
        .with_context(|| format!("Failed to read manifest '{}'", cli.manifest))?;
    let manifest = Manifest::from_json(&raw_manifest)?;

    let registry = RegistryHandle::new();
    manifest
        .seed_registry(&handlers, &registry)
        .context("Failed to seed the source registry")?;
    info!(
        sources = registry.sources().len(),
        "📦 Source registry seeded"
    );

    // ─────────────────────────────────────────────────────────────────────────
    // ⛓️ CHAIN CONNECTION
    // ─────────────────────────────────────────────────────────────────────────
    let chain = Arc::new(HttpChainClient::new(&cli.gateway_url)?);
    let head = chain.latest_block().await?;
    info!(head, "⛓️  Chain gateway reachable");

    let indexer = IndexerService::new(
        IndexerConfig::default(),
        chain.clone(),
        checkpoints.clone(),
        registry.clone(),
        Arc::new(TokioSleeper),
    );

    // ─────────────────────────────────────────────────────────────────────────
    // ⚡ SERVICES START
    // ─────────────────────────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut graphql_shutdown_rx = shutdown_tx.subscribe();

    let graphql_config = ServerConfig {
        host: "0.0.0.0".to_string(),
        port: cli.graphql_port,
        enable_playground: true,
    };

    let graphql_chain: Arc<dyn ChainClient> = chain.clone();
    let graphql_schema = build_schema(
        entities.clone(),
        graphql_store,
        graphql_checkpoints.clone(),
        graphql_chain,
        registry.clone(),
    )
    .context("Failed to build the GraphQL schema")?;

    let graphql_port = cli.graphql_port;
    let graphql_registry = registry.clone();
    let graphql_handle = tokio::spawn(
        async move {
            let shutdown_signal = async move {
                while !*graphql_shutdown_rx.borrow() {
                    if graphql_shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            };

            if let Err(e) =
                serve_with_shutdown(
                    graphql_schema,
                    graphql_checkpoints,
                    graphql_registry,
                    graphql_config,
                    shutdown_signal,
                )
                .await
            {
                error!(error = %e, "❌ Server error");
            }
            debug!("Server stopped");
        }
        .instrument(info_span!("graphql")),
    );

    let indexer_handle = tokio::spawn(
        async move {
            if let Err(e) = indexer.run(shutdown_rx).await {
                match &e {
                    IndexerError::ShutdownRequested => {}
                    _ => error!(error = ?e, "❌ Indexer error"),
                }
            }
        }
        .instrument(info_span!("indexer")),
    );

    // ─────────────────────────────────────────────────────────────────────────
    // ✅ READY
    // ─────────────────────────────────────────────────────────────────────────
    info!("✅ Scribe ready");
    info!("   ⚡ GraphQL:  http://localhost:{}/graphql", graphql_port);
    if metrics_enabled {
        info!(
            "   📊 Metrics:  http://localhost:{}/metrics",
            cli.metrics_port
        );
    } else {
        info!("   📊 Metrics:  disabled");
    }
    info!("   Press Ctrl+C to stop");

    shutdown_signal().await;

    // ─────────────────────────────────────────────────────────────────────────
    // 🛑 SHUTDOWN
    // ─────────────────────────────────────────────────────────────────────────
    info!("🛑 Shutting down...");
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(std::time::Duration::from_secs(30), indexer_handle).await {
        Ok(_) => debug!("Indexer stopped"),
        Err(_) => warn!("⚠️  Indexer shutdown timed out"),
    }

    match tokio::time::timeout(std::time::Duration::from_secs(10), graphql_handle).await {
        Ok(_) => debug!("GraphQL stopped"),
        Err(_) => warn!("⚠️  GraphQL shutdown timed out"),
    }

    db.close().await;
    graphql_db.close().await;

    info!("🛑 Shutdown complete");
    Ok(())
}

/// Initialize tracing subscriber.
fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}

/// Mask password in database URL for logging.
fn mask_password(url_str: &str) -> String {
    match url::Url::parse(url_str) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("****"));
            }
            url.to_string()
        }
        Err(_) => url_str.to_string(),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Handle the --reset command.
async fn handle_reset(db: &Database, entities: &EntitySchema, skip_confirmation: bool) -> Result<()> {
    warn!("⚠️  RESET MODE: This will delete ALL indexed state!");
    warn!("   - All entity tables");
    warn!("   - All checkpoint records");
    warn!("   - The indexer cursor");

    if !skip_confirmation {
        print!("\n🔴 Are you sure you want to reset all indexed state? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            info!("❌ Reset cancelled");
            return Ok(());
        }
    }

    db.reset(entities).await.context("Failed to reset database")?;

    info!("✅ Indexed state reset");
    info!("   The indexer will start from the manifest start blocks on next run");
    Ok(())
}
