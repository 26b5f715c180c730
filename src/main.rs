//! CoinVault service binary
//!
//! Boots the ledger engine context: configuration, logging, PostgreSQL and
//! Redis connections (with bounded retry), schema and seed. The HTTP façade
//! runs as a separate collaborator and embeds [`coinvault::TransactionExecutor`]
//! the same way this binary constructs it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use coinvault::kv::KvStore;
use coinvault::ledger::TransactionExecutor;
use coinvault::{AppConfig, Database, RedisKvStore};

const MAX_CONNECT_ATTEMPTS: u32 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = std::env::var("CVLT_ENV").unwrap_or_else(|_| "dev".to_string());
    let config = AppConfig::load(&env)?;
    let _log_guard = coinvault::logging::init_logging(&config);

    tracing::info!(env = %env, build = env!("GIT_HASH"), "Starting wallet ledger service");

    let db = connect_postgres(&config).await?;
    let kv = connect_redis(&config).await?;

    coinvault::db::schema::init_schema(db.pool())
        .await
        .context("Schema initialization failed")?;
    coinvault::db::schema::seed_minimal(db.pool())
        .await
        .context("Seed failed")?;

    let _executor = TransactionExecutor::new(
        db.pool().clone(),
        kv,
        config.lock_policy(),
        config.idempotency_ttls(),
        config.db_timeouts(),
    );

    tracing::info!("Transaction engine ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    Ok(())
}

async fn connect_postgres(config: &AppConfig) -> anyhow::Result<Database> {
    let mut retry_delay = Duration::from_secs(1);

    for attempt in 1..=MAX_CONNECT_ATTEMPTS {
        match Database::connect(&config.postgres.url, config.postgres.max_connections).await {
            Ok(db) => {
                tracing::info!(attempt, "Connected to PostgreSQL");
                return Ok(db);
            }
            Err(e) if attempt < MAX_CONNECT_ATTEMPTS => {
                tracing::warn!(attempt, error = %e, "PostgreSQL connection failed; retrying");
                tokio::time::sleep(retry_delay).await;
                retry_delay = (retry_delay * 2).min(Duration::from_secs(30));
            }
            Err(e) => return Err(e).context("PostgreSQL unavailable"),
        }
    }

    unreachable!("connection loop returns or errors")
}

async fn connect_redis(config: &AppConfig) -> anyhow::Result<Arc<dyn KvStore>> {
    let mut retry_delay = Duration::from_secs(1);

    for attempt in 1..=MAX_CONNECT_ATTEMPTS {
        match RedisKvStore::connect(&config.redis.url).await {
            Ok(kv) => {
                tracing::info!(attempt, "Connected to Redis");
                return Ok(Arc::new(kv));
            }
            Err(e) if attempt < MAX_CONNECT_ATTEMPTS => {
                tracing::warn!(attempt, error = %e, "Redis connection failed; retrying");
                tokio::time::sleep(retry_delay).await;
                retry_delay = (retry_delay * 2).min(Duration::from_secs(30));
            }
            Err(e) => anyhow::bail!("Redis unavailable: {e}"),
        }
    }

    unreachable!("connection loop returns or errors")
}
