//! Ledger Error Taxonomy
//!
//! Closed set of error kinds surfaced by the transaction engine. Domain
//! errors are cacheable under the idempotency key; infrastructure errors
//! (database / key-value store connectivity) are not, so transient outages
//! never poison a retry of an otherwise healthy operation.

use thiserror::Error;

use crate::kv::KvError;

use super::types::WalletId;

/// Errors raised by the transaction engine.
#[derive(Debug, Error, Clone)]
pub enum LedgerError {
    #[error("Insufficient balance in source wallet")]
    InsufficientBalance,

    #[error("Source wallet not found: {0}")]
    SourceWalletNotFound(WalletId),

    #[error("Destination wallet not found: {0}")]
    DestinationWalletNotFound(WalletId),

    #[error("Source wallet version changed during update")]
    ConcurrentModificationSource,

    #[error("Destination wallet version changed during update")]
    ConcurrentModificationDestination,

    #[error("Could not acquire wallet locks within the retry budget")]
    LockUnavailable,

    #[error("A request with this idempotency key is already processing")]
    RequestAlreadyProcessing,

    #[error("Idempotency key is required")]
    IdempotencyKeyRequired,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Key/value store error: {0}")]
    Store(String),
}

impl LedgerError {
    /// Stable machine-readable code for API responses and cached failures.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            LedgerError::SourceWalletNotFound(_) => "SOURCE_WALLET_NOT_FOUND",
            LedgerError::DestinationWalletNotFound(_) => "DESTINATION_WALLET_NOT_FOUND",
            LedgerError::ConcurrentModificationSource => "CONCURRENT_MODIFICATION_SOURCE",
            LedgerError::ConcurrentModificationDestination => {
                "CONCURRENT_MODIFICATION_DESTINATION"
            }
            LedgerError::LockUnavailable => "LOCK_UNAVAILABLE",
            LedgerError::RequestAlreadyProcessing => "REQUEST_ALREADY_PROCESSING",
            LedgerError::IdempotencyKeyRequired => "IDEMPOTENCY_KEY_REQUIRED",
            LedgerError::InvalidAmount(_) => "INVALID_AMOUNT",
            LedgerError::Database(_) => "DATABASE_ERROR",
            LedgerError::Store(_) => "STORE_ERROR",
        }
    }

    /// Whether this is a domain failure (a fact about the request) as
    /// opposed to an infrastructure failure (a fact about the moment).
    pub fn is_domain(&self) -> bool {
        !matches!(self, LedgerError::Database(_) | LedgerError::Store(_))
    }

    /// Whether this failure may be recorded in the idempotency store.
    ///
    /// Deterministic domain failures are cached so replays answer fast.
    /// Contention outcomes (lock exhaustion, CAS races, in-flight marker)
    /// and infrastructure errors are not: the caller is expected to retry
    /// the same key and must not be served a stale failure.
    pub fn is_cacheable(&self) -> bool {
        matches!(
            self,
            LedgerError::InsufficientBalance
                | LedgerError::SourceWalletNotFound(_)
                | LedgerError::DestinationWalletNotFound(_)
                | LedgerError::InvalidAmount(_)
        )
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Database(e.to_string())
    }
}

impl From<KvError> for LedgerError {
    fn from(e: KvError) -> Self {
        LedgerError::Store(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            LedgerError::InsufficientBalance.code(),
            "INSUFFICIENT_BALANCE"
        );
        assert_eq!(LedgerError::LockUnavailable.code(), "LOCK_UNAVAILABLE");
        assert_eq!(
            LedgerError::RequestAlreadyProcessing.code(),
            "REQUEST_ALREADY_PROCESSING"
        );
        assert_eq!(
            LedgerError::ConcurrentModificationSource.code(),
            "CONCURRENT_MODIFICATION_SOURCE"
        );
    }

    #[test]
    fn test_domain_vs_infrastructure() {
        assert!(LedgerError::InsufficientBalance.is_domain());
        assert!(LedgerError::LockUnavailable.is_domain());
        assert!(LedgerError::RequestAlreadyProcessing.is_domain());
        assert!(!LedgerError::Database("connection reset".into()).is_domain());
        assert!(!LedgerError::Store("timeout".into()).is_domain());
    }

    #[test]
    fn test_only_deterministic_failures_are_cacheable() {
        assert!(LedgerError::InsufficientBalance.is_cacheable());
        assert!(LedgerError::InvalidAmount("0".into()).is_cacheable());

        assert!(!LedgerError::LockUnavailable.is_cacheable());
        assert!(!LedgerError::ConcurrentModificationSource.is_cacheable());
        assert!(!LedgerError::RequestAlreadyProcessing.is_cacheable());
        assert!(!LedgerError::Database("down".into()).is_cacheable());
    }
}
