//! On-demand and periodic run scheduling (spec.md §4.5 C5).
//!
//! The teacher has no scheduler or durable task-log analog — `progress.rs`
//! is CLI-only and stderr-based. Built fresh in the teacher's idiom: plain
//! `tokio::time::interval` per periodic connector rather than a cron crate,
//! a `Semaphore`-bounded worker pool, and a per-connector mutex map giving
//! enqueue-behind (not cancelling) at-most-one-in-flight semantics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::Result;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Semaphore};

use kbase_core::embedding::EmbeddingProvider;

use crate::config::Config;
use crate::connectors::registry::AdapterRegistry;
use crate::indexer::{run_indexer_pass, IndexCounters};
use crate::store::SqliteStore;

/// One unit of work submitted either by the on-demand API path or by the
/// periodic loop (spec.md §4.5: "`(connector_id, space_id, user_id, ...)`").
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub connector_id: i64,
    pub update_last_indexed: bool,
}

/// Per-connector serialization plus a bounded worker pool, backed by the
/// durable `task_log` table as the source of truth for UI progress rather
/// than any in-memory state here (spec.md §4.5).
pub struct Scheduler {
    store: Arc<SqliteStore>,
    registry: Arc<AdapterRegistry>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    config: Arc<Config>,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<StdMutex<HashMap<i64, Arc<AsyncMutex<()>>>>>,
    tx: mpsc::UnboundedSender<RunRequest>,
    rx: AsyncMutex<Option<mpsc::UnboundedReceiver<RunRequest>>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<SqliteStore>,
        registry: Arc<AdapterRegistry>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        config: Arc<Config>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            store,
            registry,
            embedder,
            semaphore: Arc::new(Semaphore::new(config.scheduler.max_concurrent_runs)),
            config,
            in_flight: Arc::new(StdMutex::new(HashMap::new())),
            tx,
            rx: AsyncMutex::new(Some(rx)),
        }
    }

    /// On-demand submission (spec.md §4.5: "API submits a run; scheduler
    /// enqueues a worker task").
    pub fn submit(&self, request: RunRequest) -> Result<()> {
        self.tx.send(request).map_err(|_| anyhow::anyhow!("scheduler channel closed"))?;
        Ok(())
    }

    fn mutex_for(&self, connector_id: i64) -> Arc<AsyncMutex<()>> {
        let mut map = self.in_flight.lock().expect("in_flight mutex poisoned");
        map.entry(connector_id).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Drains submitted runs, spawning at most `max_concurrent_runs` workers
    /// concurrently. Never returns under normal operation; intended to be
    /// spawned as a background task alongside `periodic_loop`.
    pub async fn run_worker_pool(self: Arc<Self>) {
        let mut rx = self.rx.lock().await.take().expect("run_worker_pool called more than once");
        while let Some(request) = rx.recv().await {
            let this = self.clone();
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let _permit = permit;
                this.execute(request).await;
            });
        }
    }

    /// Acquires the per-connector serialization lock (enqueue-behind: a
    /// second run for the same connector simply waits, it is never dropped
    /// or cancelled) and runs one indexer pass.
    async fn execute(&self, request: RunRequest) {
        let connector_lock = self.mutex_for(request.connector_id);
        let _guard = connector_lock.lock().await;

        let connector = match self.store.get_connector(request.connector_id).await {
            Ok(Some(c)) => c,
            Ok(None) => {
                eprintln!("scheduler: connector {} no longer exists, skipping run", request.connector_id);
                return;
            }
            Err(e) => {
                eprintln!("scheduler: failed to load connector {}: {e}", request.connector_id);
                return;
            }
        };

        let Some(adapter) = self.registry.adapter_for(connector.connector_type) else {
            eprintln!("scheduler: no adapter registered for {:?}", connector.connector_type);
            return;
        };

        let embedder = self.embedder.as_deref();
        match run_indexer_pass(&self.store, adapter.as_ref(), embedder, &connector, &self.config, request.update_last_indexed)
            .await
        {
            Ok(counters) => log_counters(&connector, &counters),
            Err(e) => eprintln!("scheduler: run for connector {} failed: {e}", connector.id),
        }
    }

    /// Periodic loop (spec.md §4.5: "maintains a recurring schedule at
    /// cadence `indexing_frequency_minutes`... idempotent and driven by
    /// changes to the connector row"). Polls the connectors table on a
    /// fixed cadence rather than maintaining one `tokio::time::interval`
    /// task per connector directly, since that would require tearing down
    /// and recreating tasks whenever a connector's frequency changes —
    /// re-reading `next_scheduled_at` each poll gets the same idempotent
    /// create/update/delete behavior from a single loop.
    pub async fn run_periodic_loop(self: Arc<Self>) -> Result<()> {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(self.config.scheduler.poll_interval_secs));
        loop {
            ticker.tick().await;
            if let Err(e) = self.poll_due_connectors().await {
                eprintln!("scheduler: periodic poll failed: {e}");
            }
        }
    }

    async fn poll_due_connectors(&self) -> Result<()> {
        let now = chrono::Utc::now();
        for connector in self.store.list_connectors(None).await? {
            if !connector.is_indexable || !connector.periodic_indexing_enabled {
                continue;
            }
            let Some(frequency_minutes) = connector.indexing_frequency_minutes else { continue };

            let due = match connector.next_scheduled_at {
                Some(scheduled) => now >= scheduled,
                None => true,
            };
            if !due {
                continue;
            }

            self.submit(RunRequest { connector_id: connector.id, update_last_indexed: true })?;

            let next = now + chrono::Duration::minutes(frequency_minutes as i64);
            self.store.set_connector_next_scheduled_at(connector.id, Some(next)).await?;
        }
        Ok(())
    }
}

fn log_counters(connector: &kbase_core::model::ConnectorRecord, counters: &IndexCounters) {
    println!(
        "scheduler: connector {} ({}) done: {} inserted, {} updated, {} unchanged, {} duplicate, {} errors",
        connector.id,
        connector.name,
        counters.inserted,
        counters.updated,
        counters.skipped_unchanged,
        counters.skipped_duplicate,
        counters.errors
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChunkingConfig, CryptoConfig, DbConfig, EmbeddingConfig, RetrievalConfig, SchedulerConfig, ServerConfig};
    use crate::migrate::run_migrations_on;
    use sqlx::sqlite::SqlitePoolOptions;

    fn test_config() -> Config {
        Config {
            db: DbConfig { path: std::path::PathBuf::from(":memory:") },
            chunking: ChunkingConfig { max_tokens: 200 },
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig { provider: "disabled".to_string(), ..EmbeddingConfig::default() },
            server: ServerConfig { bind: "127.0.0.1:0".to_string() },
            scheduler: SchedulerConfig { max_concurrent_runs: 2, poll_interval_secs: 1, ..SchedulerConfig::default() },
            crypto: CryptoConfig::default(),
        }
    }

    #[tokio::test]
    async fn at_most_one_in_flight_run_per_connector_is_serialized() {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        run_migrations_on(&pool).await.unwrap();
        let store = Arc::new(SqliteStore::new(pool));
        sqlx::query("INSERT INTO search_spaces (id, owner) VALUES (1, 'tester')").execute(store.pool()).await.unwrap();
        sqlx::query(
            "INSERT INTO connectors (search_space_id, name, connector_type, config_json) VALUES (1, 'docs', 'filesystem', '{}')",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let registry = Arc::new(AdapterRegistry::new(std::env::temp_dir()));
        let scheduler = Arc::new(Scheduler::new(store, registry, None, Arc::new(test_config())));

        let lock_a = scheduler.mutex_for(1);
        let lock_b = scheduler.mutex_for(1);
        assert!(Arc::ptr_eq(&lock_a, &lock_b));
    }
}
