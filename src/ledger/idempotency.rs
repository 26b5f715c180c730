//! Idempotency Store
//!
//! Request → result bindings plus a short-lived in-flight marker, kept in
//! the shared key/value store. The store is advisory: it may lose records
//! at any time. Durable replay protection comes from the unique index on
//! `transactions.idempotency_key`; this cache only makes replays cheap.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::kv::KvStore;

use super::error::LedgerError;
use super::types::TransactionResult;

const RESULT_PREFIX: &str = "idempotency:";
const PROCESSING_PREFIX: &str = "processing:";
const PROCESSING_MARKER: &str = "1";

/// TTLs for the three record kinds the store keeps.
#[derive(Debug, Clone, Copy)]
pub struct IdempotencyTtls {
    /// Completed results. Default 24 h.
    pub success: Duration,
    /// Cached domain failures. Default 1 h.
    pub failure: Duration,
    /// In-flight marker. Default 30 s.
    pub claim: Duration,
}

impl Default for IdempotencyTtls {
    fn default() -> Self {
        Self {
            success: Duration::from_secs(86_400),
            failure: Duration::from_secs(3_600),
            claim: Duration::from_secs(30),
        }
    }
}

/// Cache of executor results keyed by idempotency key.
pub struct IdempotencyStore {
    kv: Arc<dyn KvStore>,
    ttls: IdempotencyTtls,
}

impl IdempotencyStore {
    pub fn new(kv: Arc<dyn KvStore>, ttls: IdempotencyTtls) -> Self {
        Self { kv, ttls }
    }

    pub fn ttls(&self) -> IdempotencyTtls {
        self.ttls
    }

    /// Look up a previously stored result for `key`.
    ///
    /// An unparseable record is treated as a miss: the durable unique index
    /// still protects against re-execution.
    pub async fn check(&self, key: &str) -> Result<Option<TransactionResult>, LedgerError> {
        let stored = self.kv.get(&format!("{RESULT_PREFIX}{key}")).await?;
        match stored {
            None => Ok(None),
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(result) => Ok(Some(result)),
                Err(e) => {
                    warn!(key, error = %e, "Discarding unparseable idempotency record");
                    Ok(None)
                }
            },
        }
    }

    /// Persist `result` under `key` with the TTL appropriate to its status.
    ///
    /// Storage failures are logged and swallowed: the result has already
    /// committed and must be returned to the caller regardless.
    pub async fn store(&self, key: &str, result: &TransactionResult, ttl: Duration) {
        let raw = match serde_json::to_string(result) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "Could not serialize idempotency record");
                return;
            }
        };

        // Unconditional write: last completed execution wins, and the value
        // is derived from the same durable rows either way.
        if let Err(e) = self.kv.set(&format!("{RESULT_PREFIX}{key}"), &raw, ttl).await {
            warn!(key, error = %e, "Could not store idempotency record");
        }
    }

    /// Claim the in-flight marker for `key`. Returns false when another
    /// request already holds it.
    pub async fn claim(&self, key: &str) -> Result<bool, LedgerError> {
        let claimed = self
            .kv
            .set_nx(
                &format!("{PROCESSING_PREFIX}{key}"),
                PROCESSING_MARKER,
                self.ttls.claim,
            )
            .await?;
        Ok(claimed)
    }

    /// Drop the in-flight marker. Errors are logged and swallowed; the
    /// claim TTL bounds a stuck marker either way.
    pub async fn unclaim(&self, key: &str) {
        if let Err(e) = self.kv.delete(&format!("{PROCESSING_PREFIX}{key}")).await {
            warn!(key, error = %e, "Could not clear in-flight marker; TTL will reap it");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use crate::ledger::types::{TransactionId, TransactionStatus};

    fn store() -> IdempotencyStore {
        IdempotencyStore::new(Arc::new(MemoryKvStore::new()), IdempotencyTtls::default())
    }

    fn sample_result() -> TransactionResult {
        TransactionResult {
            transaction_id: TransactionId::new(),
            status: TransactionStatus::Completed,
            from_balance: Some("9999900".to_string()),
            to_balance: Some("10100".to_string()),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_check_miss_then_hit() {
        let idem = store();
        assert!(idem.check("t1").await.unwrap().is_none());

        let result = sample_result();
        idem.store("t1", &result, idem.ttls().success).await;

        let cached = idem.check("t1").await.unwrap().unwrap();
        assert_eq!(cached, result);
    }

    #[tokio::test]
    async fn test_stored_failure_round_trips() {
        let idem = store();
        let failure = TransactionResult {
            transaction_id: TransactionId::new(),
            status: TransactionStatus::Failed,
            from_balance: None,
            to_balance: None,
            error: Some("INSUFFICIENT_BALANCE".to_string()),
        };

        idem.store("s2", &failure, idem.ttls().failure).await;

        let cached = idem.check("s2").await.unwrap().unwrap();
        assert_eq!(cached.status, TransactionStatus::Failed);
        assert_eq!(cached.error.as_deref(), Some("INSUFFICIENT_BALANCE"));
    }

    #[tokio::test]
    async fn test_claim_is_exclusive_until_unclaimed() {
        let idem = store();

        assert!(idem.claim("k").await.unwrap());
        assert!(!idem.claim("k").await.unwrap());

        idem.unclaim("k").await;
        assert!(idem.claim("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_claims_are_per_key() {
        let idem = store();

        assert!(idem.claim("k1").await.unwrap());
        assert!(idem.claim("k2").await.unwrap());
    }
}
