//! CoinVault - Virtual-Currency Wallet Ledger
//!
//! An ACID double-entry ledger recording monetary movements between
//! wallets across multiple asset types. The authoritative record of
//! balances for the platform.
//!
//! # Modules
//!
//! - [`ledger`] - The transaction engine (executor, double-entry writer,
//!   ordered-lock coordinator, idempotency store, lock manager)
//! - [`kv`] - Key/value store seam (Redis in production, in-memory in tests)
//! - [`db`] - PostgreSQL pool, schema and seed
//! - [`config`] - Service configuration
//! - [`logging`] - Tracing subscriber setup

pub mod config;
pub mod db;
pub mod kv;
pub mod ledger;
pub mod logging;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use db::Database;
pub use kv::{KvStore, MemoryKvStore, RedisKvStore};
pub use ledger::{
    LedgerError, LedgerOperation, TransactionExecutor, TransactionResult, TransactionType,
};
