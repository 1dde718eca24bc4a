//! kbase — personal knowledge-base ingestion and research engine.
//!
//! Connectors ingest raw items from a search space's configured sources,
//! convert them into canonical, deduplicated documents with chunks and
//! embeddings, and a research agent answers queries over them with
//! streamed, cited output. See `config::Config` for the TOML layout and
//! `server` for the HTTP surface.
//!
//! ## Modules
//!
//! - [`config`] — TOML configuration parsing and validation
//! - [`db`] — SQLite connection management
//! - [`migrate`] — database schema migrations
//! - [`store`] — the `Store` trait's SQLite implementation
//! - [`connectors`] — per-source adapters and the adapter registry
//! - [`embedding`] — concrete embedding providers (OpenAI, local)
//! - [`indexer`] — the generic per-connector ingestion pipeline
//! - [`scheduler`] — periodic and on-demand run scheduling
//! - [`retrieval`] — multi-connector fan-out, dedup, and rerank
//! - [`agent`] — the research graph (reformulate, outline, sections, Q&A)
//! - [`server`] — the HTTP/SSE API
//! - [`crypto`] — connector credential encryption at rest

mod agent;
mod config;
mod connectors;
mod crypto;
mod db;
mod embedding;
mod indexer;
mod migrate;
mod retrieval;
mod scheduler;
mod server;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use connectors::registry::AdapterRegistry;
use scheduler::Scheduler;
use store::SqliteStore;

#[derive(Parser)]
#[command(name = "kbase", about = "Personal knowledge-base ingestion and research engine", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "./config/kbase.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    Init,

    /// List configured connectors and their indexing status.
    Sources {
        /// Restrict the listing to one search space.
        #[arg(long)]
        search_space_id: Option<i64>,
    },

    /// Run a single indexer pass for one connector.
    Sync {
        /// Connector id to index.
        connector_id: i64,

        /// Treat this as a full resync rather than a delta sync (clears the
        /// delta cursor before running).
        #[arg(long)]
        full: bool,
    },

    /// Start the HTTP API, the scheduler's worker pool, and its periodic loop.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = Arc::new(config::load_config(&cli.config)?);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("database initialized");
        }

        Commands::Sources { search_space_id } => {
            let pool = db::connect(&cfg).await?;
            let store = SqliteStore::new(pool);
            for connector in store.list_connectors(search_space_id).await? {
                println!(
                    "{:>4}  {:<24} {:<16} indexable={:<5} periodic={:<5} last_indexed_at={}",
                    connector.id,
                    connector.name,
                    connector.connector_type.as_str(),
                    connector.is_indexable,
                    connector.periodic_indexing_enabled,
                    connector.last_indexed_at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".to_string()),
                );
            }
        }

        Commands::Sync { connector_id, full } => {
            let pool = db::connect(&cfg).await?;
            let store = SqliteStore::new(pool);
            let mut connector = store
                .get_connector(connector_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("connector {connector_id} not found"))?;
            if full {
                connector.delta_cursor = None;
                connector.last_indexed_at = None;
            }

            let registry = AdapterRegistry::new(std::env::temp_dir());
            let adapter = registry
                .adapter_for(connector.connector_type)
                .ok_or_else(|| anyhow::anyhow!("no adapter registered for {:?}", connector.connector_type))?;
            let embedder = embedding::build_embedder(&cfg.embedding)?;

            let counters =
                indexer::run_indexer_pass(&store, adapter.as_ref(), embedder.as_deref(), &connector, &cfg, true)
                    .await?;
            println!(
                "indexed {} inserted, {} updated, {} unchanged, {} duplicate, {} errors",
                counters.inserted, counters.updated, counters.skipped_unchanged, counters.skipped_duplicate, counters.errors
            );
        }

        Commands::Serve => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations_on(&pool).await?;
            let store = Arc::new(SqliteStore::new(pool));
            let registry = Arc::new(AdapterRegistry::new(std::env::temp_dir()));
            let embedder = embedding::build_embedder(&cfg.embedding)?.map(Arc::from);

            let scheduler = Arc::new(Scheduler::new(store.clone(), registry, embedder.clone(), cfg.clone()));

            let worker_pool = tokio::spawn(scheduler.clone().run_worker_pool());
            let periodic_loop = tokio::spawn(scheduler.clone().run_periodic_loop());

            server::run_server(cfg, store, embedder, scheduler).await?;

            worker_pool.abort();
            periodic_loop.abort();
        }
    }

    Ok(())
}
