//! Transaction Executor
//!
//! Entry point of the transaction engine. Per idempotency key:
//!
//! ```text
//!   [unknown] ─ check ─► [cache-hit] ─► return cached
//!       │
//!   [claim] ── already claimed ──► REQUEST_ALREADY_PROCESSING
//!       │
//!   [locked serializable tx: header + double entry]
//!       │ ok                         │ failure
//!   store(result, 24h)          store cacheable failures (1h)
//!       │                           │
//!   unclaim ─► return           unclaim ─► raise
//! ```
//!
//! The idempotency cache is advisory; the unique index on
//! `transactions.idempotency_key` is the durable replay guard. A replay
//! that slips past a lost cache collides with that index and is answered
//! by reconstructing the original result from the committed rows.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::kv::KvStore;

use super::amount::format_balance;
use super::coordinator::{LockPolicy, OrderedLockCoordinator};
use super::error::LedgerError;
use super::idempotency::{IdempotencyStore, IdempotencyTtls};
use super::lock::LockManager;
use super::types::{
    LedgerOperation, TransactionId, TransactionResult, TransactionStatus, TransactionType,
    WalletId,
};
use super::wallets::reconstruct_result;
use super::writer::write_double_entry;

/// Timeouts applied inside the serializable database transaction. They must
/// leave margin under the wallet lock TTL so the transaction cannot outlive
/// the lock that serializes it.
#[derive(Debug, Clone, Copy)]
pub struct DbTimeouts {
    /// Bound on waiting for database-level locks. Default 5 s.
    pub lock_wait: Duration,
    /// Bound on any single statement. Default 10 s.
    pub statement: Duration,
}

impl Default for DbTimeouts {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_secs(5),
            statement: Duration::from_secs(10),
        }
    }
}

/// The transaction engine's public entry point.
pub struct TransactionExecutor {
    pool: PgPool,
    idempotency: IdempotencyStore,
    coordinator: OrderedLockCoordinator,
    timeouts: DbTimeouts,
}

impl TransactionExecutor {
    pub fn new(
        pool: PgPool,
        kv: Arc<dyn KvStore>,
        lock_policy: LockPolicy,
        ttls: IdempotencyTtls,
        timeouts: DbTimeouts,
    ) -> Self {
        Self {
            pool,
            idempotency: IdempotencyStore::new(kv.clone(), ttls),
            coordinator: OrderedLockCoordinator::new(LockManager::new(kv), lock_policy),
            timeouts,
        }
    }

    /// Execute a ledger operation exactly once per idempotency key.
    ///
    /// A repeated key returns the stored result of the first execution,
    /// byte-identical, without re-running any work.
    pub async fn execute(
        &self,
        tx_type: TransactionType,
        op: LedgerOperation,
        idempotency_key: &str,
    ) -> Result<TransactionResult, LedgerError> {
        if idempotency_key.trim().is_empty() {
            return Err(LedgerError::IdempotencyKeyRequired);
        }

        if let Some(cached) = self.idempotency.check(idempotency_key).await? {
            debug!(key = idempotency_key, "Idempotency cache hit");
            return Ok(cached);
        }

        if !self.idempotency.claim(idempotency_key).await? {
            return Err(LedgerError::RequestAlreadyProcessing);
        }

        let transaction_id = TransactionId::new();
        let outcome = self
            .run_locked(tx_type, &op, idempotency_key, transaction_id)
            .await;

        match &outcome {
            Ok(result) => {
                self.idempotency
                    .store(idempotency_key, result, self.idempotency.ttls().success)
                    .await;
                info!(
                    key = idempotency_key,
                    transaction_id = %result.transaction_id,
                    tx_type = %tx_type,
                    "Transaction completed"
                );
            }
            Err(e) if e.is_cacheable() => {
                let record = TransactionResult {
                    transaction_id,
                    status: TransactionStatus::Failed,
                    from_balance: None,
                    to_balance: None,
                    error: Some(e.code().to_string()),
                };
                self.idempotency
                    .store(idempotency_key, &record, self.idempotency.ttls().failure)
                    .await;
                warn!(key = idempotency_key, code = e.code(), "Transaction failed");
            }
            Err(e) => {
                // Transient: not cached, so a retry with the same key can
                // succeed once the contention or outage clears.
                warn!(key = idempotency_key, code = e.code(), "Transaction failed (transient)");
            }
        }

        self.idempotency.unclaim(idempotency_key).await;
        outcome
    }

    /// Acquire the wallet locks in canonical order and run the serializable
    /// database transaction inside them.
    async fn run_locked(
        &self,
        tx_type: TransactionType,
        op: &LedgerOperation,
        idempotency_key: &str,
        transaction_id: TransactionId,
    ) -> Result<TransactionResult, LedgerError> {
        let wallet_ids = operation_wallets(op);

        let attempt = self
            .coordinator
            .with_wallet_locks(&wallet_ids, || {
                self.write_transaction(tx_type, op, idempotency_key, transaction_id)
            })
            .await;

        match attempt {
            Err(LedgerError::RequestAlreadyProcessing) => {
                // The header insert hit the unique index: the key was already
                // executed durably even though the cache had no record of it.
                if let Some(result) = reconstruct_result(&self.pool, idempotency_key).await? {
                    info!(
                        key = idempotency_key,
                        transaction_id = %result.transaction_id,
                        "Replayed request recovered from durable rows"
                    );
                    return Ok(result);
                }
                Err(LedgerError::RequestAlreadyProcessing)
            }
            other => other,
        }
    }

    /// One serializable database transaction: header insert, double entry,
    /// commit. Aborting at any step leaves the database untouched.
    async fn write_transaction(
        &self,
        tx_type: TransactionType,
        op: &LedgerOperation,
        idempotency_key: &str,
        transaction_id: TransactionId,
    ) -> Result<TransactionResult, LedgerError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        // SET LOCAL takes no bind parameters; the values come from config.
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.timeouts.lock_wait.as_millis()
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = '{}ms'",
            self.timeouts.statement.as_millis()
        ))
        .execute(&mut *tx)
        .await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO transactions
                (id, idempotency_key, tx_type, status, metadata, created_at, completed_at)
            VALUES ($1, $2, $3::transaction_type, 'COMPLETED', $4, now(), now())
            "#,
        )
        .bind(transaction_id.as_uuid())
        .bind(idempotency_key)
        .bind(tx_type.as_str())
        .bind(op.metadata.clone())
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            if is_unique_violation(&e) {
                return Err(LedgerError::RequestAlreadyProcessing);
            }
            return Err(e.into());
        }

        let entries = write_double_entry(&mut tx, transaction_id, op).await?;

        tx.commit().await?;

        Ok(TransactionResult {
            transaction_id,
            status: TransactionStatus::Completed,
            from_balance: entries.from_balance.map(format_balance),
            to_balance: Some(format_balance(entries.to_balance)),
            error: None,
        })
    }
}

/// The wallet set an operation touches: source (when present) and
/// destination. Ordering is the coordinator's concern.
fn operation_wallets(op: &LedgerOperation) -> Vec<WalletId> {
    op.from_wallet_id
        .into_iter()
        .chain(std::iter::once(op.to_wallet_id))
        .collect()
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(from: Option<WalletId>) -> LedgerOperation {
        LedgerOperation {
            from_wallet_id: from,
            to_wallet_id: "00000000-0000-4000-8000-0000000000aa".parse().unwrap(),
            asset_type_id: crate::ledger::types::AssetTypeId::new(),
            amount: rust_decimal::Decimal::ONE,
            description: None,
            metadata: None,
        }
    }

    #[test]
    fn test_operation_wallets_includes_both_sides() {
        let from: WalletId = "00000000-0000-4000-8000-0000000000bb".parse().unwrap();
        let wallets = operation_wallets(&op(Some(from)));
        assert_eq!(wallets.len(), 2);
        assert!(wallets.contains(&from));
    }

    #[test]
    fn test_operation_wallets_mint_has_single_wallet() {
        let wallets = operation_wallets(&op(None));
        assert_eq!(wallets.len(), 1);
    }
}
