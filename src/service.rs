//! Service wiring.
//!
//! Builds the batch store, the ledger adapter, the lifecycle engine and the
//! query service from environment configuration.

use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tracing::info;

use crate::infra::{
    BatchRepository, CircuitBreaker, CircuitBreakerConfig, PgBatchRepository,
    SqliteBatchRepository,
};
use crate::ledger::{
    CircuitBreakerLedger, DisabledLedger, EvmLedgerClient, LedgerClient, LedgerConfig,
};
use crate::lifecycle::{LifecycleConfig, LifecycleEngine};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::projection::QueryService;

/// Storage backend, chosen by the `DATABASE_URL` scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Sqlite,
}

impl Backend {
    pub fn from_url(url: &str) -> anyhow::Result<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Backend::Postgres)
        } else if url.starts_with("sqlite:") {
            Ok(Backend::Sqlite)
        } else {
            anyhow::bail!("unsupported DATABASE_URL scheme (expected postgres:// or sqlite:)")
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub migrate_on_startup: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/herbtrace".to_string());

        let max_connections: u32 = std::env::var("MAX_DB_CONNECTIONS")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(10);

        let migrate_on_startup = std::env::var("DB_MIGRATE_ON_STARTUP")
            .ok()
            .map(|v| {
                !matches!(
                    v.trim().to_ascii_lowercase().as_str(),
                    "0" | "false" | "off"
                )
            })
            .unwrap_or(true);

        Self {
            database_url,
            max_connections,
            migrate_on_startup,
        }
    }
}

/// Everything a caller needs to drive and read batches.
pub struct Services {
    pub repository: Arc<dyn BatchRepository>,
    pub ledger: Arc<dyn LedgerClient>,
    pub engine: LifecycleEngine,
    pub queries: QueryService,
    pub metrics: Arc<MetricsRegistry>,
}

impl Services {
    pub fn new(
        repository: Arc<dyn BatchRepository>,
        ledger: Arc<dyn LedgerClient>,
        metrics: Arc<MetricsRegistry>,
        config: LifecycleConfig,
    ) -> Self {
        let queries = QueryService::new(repository.clone(), ledger.clone(), config.ledger_timeout);
        let engine =
            LifecycleEngine::new(repository.clone(), ledger.clone(), metrics.clone(), config);
        Self {
            repository,
            ledger,
            engine,
            queries,
            metrics,
        }
    }

    pub async fn from_env() -> anyhow::Result<Self> {
        let config = Config::from_env();
        let lifecycle = LifecycleConfig::from_env()?;
        let metrics = Arc::new(MetricsRegistry::new());

        let repository = connect_repository(&config, &metrics).await?;
        let ledger = ledger_from_env(&lifecycle)?;

        info!(
            ledger_timeout_ms = lifecycle.ledger_timeout.as_millis() as u64,
            write_mode = ?lifecycle.write_mode,
            batch_id_prefix = %lifecycle.batch_id_prefix,
            "lifecycle engine configured"
        );
        Ok(Self::new(repository, ledger, metrics, lifecycle))
    }
}

/// Connect to the configured store, migrating first if enabled.
pub async fn connect_repository(
    config: &Config,
    metrics: &MetricsRegistry,
) -> anyhow::Result<Arc<dyn BatchRepository>> {
    let backend = Backend::from_url(&config.database_url)?;
    info!(
        backend = ?backend,
        max_connections = config.max_connections,
        "connecting to batch store"
    );
    metrics
        .set_gauge(metric_names::DB_POOL_SIZE, u64::from(config.max_connections))
        .await;

    let repository: Arc<dyn BatchRepository> = match backend {
        Backend::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(&config.database_url)
                .await?;
            let repo = PgBatchRepository::new(pool);
            if config.migrate_on_startup {
                repo.initialize().await?;
            }
            Arc::new(repo)
        }
        Backend::Sqlite => {
            // An in-memory database exists per connection.
            let max_connections = if config.database_url.contains(":memory:") {
                1
            } else {
                config.max_connections
            };
            let pool = SqlitePoolOptions::new()
                .max_connections(max_connections)
                .connect(&config.database_url)
                .await?;
            let repo = SqliteBatchRepository::new(pool);
            if config.migrate_on_startup {
                repo.initialize().await?;
            }
            Arc::new(repo)
        }
    };

    if !config.migrate_on_startup {
        info!("DB migrations skipped (DB_MIGRATE_ON_STARTUP=0)");
    }
    Ok(repository)
}

/// The EVM adapter behind a circuit breaker when configured, else a
/// [`DisabledLedger`].
pub fn ledger_from_env(lifecycle: &LifecycleConfig) -> anyhow::Result<Arc<dyn LedgerClient>> {
    match LedgerConfig::from_env() {
        Some(ledger_config) => {
            info!(
                rpc_url = %ledger_config.rpc_url,
                contract = %ledger_config.contract_address,
                chain_id = ledger_config.chain_id,
                "ledger adapter configured"
            );
            let client = EvmLedgerClient::new(ledger_config)?;
            let breaker = Arc::new(CircuitBreaker::with_config(
                "ledger",
                CircuitBreakerConfig::from_env(),
            ));
            Ok(Arc::new(CircuitBreakerLedger::new(
                Arc::new(client),
                breaker,
                lifecycle.ledger_timeout,
            )))
        }
        None => {
            info!(
                "ledger not configured (set LEDGER_RPC_URL, LEDGER_CONTRACT_ADDRESS and \
                 LEDGER_PRIVATE_KEY to enable); transitions will be marked failed"
            );
            Ok(Arc::new(DisabledLedger))
        }
    }
}
